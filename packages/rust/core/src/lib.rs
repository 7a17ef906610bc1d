//! Contact reconciliation and import orchestration for cardsync.
//!
//! This crate ties the vCard parser and the CRM store together: company name
//! normalization, lookup resolvers, the per-record reconciliation engine, the
//! batch ingestion driver, and the Mandrill webhook and mail plumbing around it.

pub mod context;
pub mod ingest;
pub mod lookup;
pub mod normalize;
pub mod notify;
pub mod reconcile;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use context::BatchContext;
pub use ingest::{
    Attachment, ImportBatch, ImportReport, ProgressReporter, SilentProgress, import_batch,
    run_import,
};
pub use lookup::LookupOutcome;
pub use normalize::normalize_company_name;
pub use notify::{EmailMessage, LogNotifier, MandrillNotifier, Notifier, notifier_from_config};
pub use reconcile::{ReconcileOutcome, SkipReason, reconcile_contact};
