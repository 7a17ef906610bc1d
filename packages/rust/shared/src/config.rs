//! Application configuration for cardsync.
//!
//! User config lives at `~/.cardsync/cardsync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CardSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "cardsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".cardsync";

// ---------------------------------------------------------------------------
// Config structs (matching cardsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// CRM store settings.
    #[serde(default)]
    pub crm: CrmConfig,

    /// Batch import behaviour.
    #[serde(default)]
    pub import: ImportConfig,

    /// Mandrill webhook and mail settings.
    #[serde(default)]
    pub mandrill: MandrillConfig,

    /// Webhook server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// `[crm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Path of the libSQL database holding CRM entities.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "var/crm/cardsync.db".into()
}

/// What the ingestion driver does after a record fails with a hard error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Report the failure and keep processing the batch.
    #[default]
    Continue,
    /// Stop the batch; remaining records are reported as not processed.
    AbortBatch,
}

/// `[import]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Per-record failure policy.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// `[mandrill]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandrillConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Name of the env var holding the webhook signing key.
    #[serde(default = "default_webhook_key_env")]
    pub webhook_key_env: String,

    /// Base URL of the Mandrill REST API.
    #[serde(default = "default_mandrill_base_url")]
    pub base_url: String,

    /// From-address of report mails.
    #[serde(default = "default_sending_address")]
    pub sending_address: String,

    /// Recipient of error mails when the sender is unknown.
    #[serde(default = "default_error_recipient")]
    pub error_recipient: String,
}

impl Default for MandrillConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            webhook_key_env: default_webhook_key_env(),
            base_url: default_mandrill_base_url(),
            sending_address: default_sending_address(),
            error_recipient: default_error_recipient(),
        }
    }
}

fn default_api_key_env() -> String {
    "MANDRILL_API_KEY".into()
}
fn default_webhook_key_env() -> String {
    "MANDRILL_WEBHOOK_KEY".into()
}
fn default_mandrill_base_url() -> String {
    "https://mandrillapp.com/api/1.0".into()
}
fn default_sending_address() -> String {
    "crm-import@example.com".into()
}
fn default_error_recipient() -> String {
    "crm-admin@example.com".into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the webhook server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Public webhook URL as registered with Mandrill; part of the signed data.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}
fn default_public_url() -> String {
    "http://localhost:8080/vcard/webhook".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.cardsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CardSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.cardsync/cardsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CardSyncError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CardSyncError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CardSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CardSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CardSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the env var named in config. Errors if unset or empty.
pub fn require_env(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(CardSyncError::config(format!(
            "secret not found. Set the {var_name} environment variable."
        ))),
    }
}
