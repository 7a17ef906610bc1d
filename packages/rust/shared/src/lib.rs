//! Shared types, error model, and configuration for cardsync.
//!
//! This crate is the foundation depended on by all other cardsync crates.
//! It provides:
//! - [`CardSyncError`], the unified error type
//! - Domain types ([`ContactRecord`], [`OrganizationEntity`], [`PersonEntity`], [`EntityRef`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrmConfig, FailurePolicy, ImportConfig, MandrillConfig, ServerConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, require_env,
};
pub use error::{CardSyncError, Result};
pub use types::{
    ActorIdentity, AddressFields, AddressKind, ContactRecord, Entity, EntityId, EntityKind,
    EntityRef, Gender, OrganizationEntity, PersonEntity, PhoneKind, PhoneNumber, PostalAddress,
};
