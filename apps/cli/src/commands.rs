//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cardsync_core::notify::{REPORT_SUBJECT, Recipient};
use cardsync_core::{
    Attachment, EmailMessage, ImportBatch, ImportReport, ProgressReporter, notifier_from_config,
    run_import,
};
use cardsync_shared::{AppConfig, FailurePolicy, init_config, load_config, require_env};
use cardsync_storage::CrmDatabase;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::server::{self, AppState};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// cardsync: import vCards into the CRM.
#[derive(Parser)]
#[command(
    name = "cardsync",
    version,
    about = "Import vCards sent to a Mandrill inbound address into the CRM.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// CRM database file (overrides `crm.database_path`).
    #[arg(long, global = true, env = "CARDSYNC_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the Mandrill inbound webhook server.
    Serve {
        /// Socket address to bind (defaults to `server.bind`).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Import local vCard files as if they had been mailed by `--sender`.
    Import {
        /// `.vcf` files to import, in order.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Email address of the CRM user the import acts as.
        #[arg(long)]
        sender: String,

        /// Stop at the first failed file instead of continuing.
        #[arg(long)]
        abort_on_failure: bool,
    },

    /// CRM store management.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Send a test mail through the configured notifier.
    NotifyTest {
        /// Recipient (defaults to `mandrill.error_recipient`).
        #[arg(long)]
        to: Option<String>,
    },
}

/// Store subcommands.
#[derive(Subcommand)]
pub(crate) enum StoreAction {
    /// Create the database file and apply migrations.
    Init,
    /// Load reference data from a JSON file (`{"<kind>": [{..}, ..]}`).
    Seed {
        /// Seed file path.
        file: PathBuf,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "cardsync=info",
        1 => "cardsync=debug",
        _ => "cardsync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let database = cli.database;
    match cli.command {
        Command::Serve { bind } => cmd_serve(database, bind).await,
        Command::Import {
            files,
            sender,
            abort_on_failure,
        } => cmd_import(database, &files, &sender, abort_on_failure).await,
        Command::Store { action } => match action {
            StoreAction::Init => cmd_store_init(database).await,
            StoreAction::Seed { file } => cmd_store_seed(database, &file).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
        Command::NotifyTest { to } => cmd_notify_test(to).await,
    }
}

fn database_path(config: &AppConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| PathBuf::from(&config.crm.database_path))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(database: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let config = load_config()?;
    let webhook_key = require_env(&config.mandrill.webhook_key_env)?;
    let db = CrmDatabase::open(&database_path(&config, database)).await?;
    let notifier = notifier_from_config(&config.mandrill)?;

    let state = AppState {
        db: Arc::new(db),
        notifier: Arc::from(notifier),
        policy: config.import.failure_policy,
        webhook_key,
        public_url: config.server.public_url.clone(),
        sending_address: config.mandrill.sending_address.clone(),
        error_recipient: config.mandrill.error_recipient.clone(),
    };

    let bind = bind.unwrap_or(config.server.bind);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| eyre!("cannot bind {bind}: {e}"))?;

    info!(%bind, public_url = %config.server.public_url, "webhook server listening");
    println!("Listening on http://{bind}/vcard/webhook");

    axum::serve(listener, server::router(state)).await?;
    Ok(())
}

async fn cmd_import(
    database: Option<PathBuf>,
    files: &[PathBuf],
    sender: &str,
    abort_on_failure: bool,
) -> Result<()> {
    let config = load_config()?;
    let policy = if abort_on_failure {
        FailurePolicy::AbortBatch
    } else {
        config.import.failure_policy
    };

    let attachments = files
        .iter()
        .map(|path| read_attachment(path))
        .collect::<Result<Vec<_>>>()?;

    let db = CrmDatabase::open(&database_path(&config, database)).await?;
    let batch = ImportBatch {
        sender: sender.to_string(),
        attachments,
    };

    info!(sender, files = files.len(), ?policy, "importing local files");

    let reporter = CliProgress::new();
    let report = run_import(&db, vec![batch], policy, &reporter).await?;

    println!();
    println!("  Results:");
    for line in &report.lines {
        println!("    {line}");
    }
    println!();
    println!("  Files:    {}", report.lines.len());
    println!("  Failures: {}", report.failures);
    println!();

    Ok(())
}

/// Local files are typed by extension; anything but `.vcf` is reported as not imported.
fn read_attachment(path: &Path) -> Result<Attachment> {
    let content =
        std::fs::read(path).map_err(|e| eyre!("cannot read '{}': {e}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = if name.ends_with(".vcf") {
        "text/vcard"
    } else {
        "application/octet-stream"
    };

    Ok(Attachment {
        name,
        mime_type: mime_type.to_string(),
        content,
    })
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn batch_started(&self, sender: &str, attachments: usize) {
        self.spinner
            .set_message(format!("Importing {attachments} file(s) as {sender}"));
    }

    fn file_done(&self, line: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}] {line}"));
    }

    fn done(&self, _report: &ImportReport) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_store_init(database: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let path = database_path(&config, database);
    let db = CrmDatabase::open(&path).await?;
    let version = db.session()?.schema_version().await;
    println!("CRM store ready at: {} (schema v{version})", path.display());
    Ok(())
}

async fn cmd_store_seed(database: Option<PathBuf>, file: &Path) -> Result<()> {
    let config = load_config()?;
    let content =
        std::fs::read_to_string(file).map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let seed: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| eyre!("'{}' is not valid JSON: {e}", file.display()))?;

    let db = CrmDatabase::open(&database_path(&config, database)).await?;
    let rows = db.session()?.seed_from_json(&seed).await?;

    info!(file = %file.display(), rows, "store seeded");
    println!("Seeded {rows} row(s) from {}", file.display());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

async fn cmd_notify_test(to: Option<String>) -> Result<()> {
    let config = load_config()?;
    let notifier = notifier_from_config(&config.mandrill)?;
    let to = to.unwrap_or(config.mandrill.error_recipient);

    let message = EmailMessage {
        from_email: config.mandrill.sending_address,
        to: vec![Recipient::to(&to)],
        subject: REPORT_SUBJECT.to_string(),
        text: "This is a test mail from cardsync.".to_string(),
        html: None,
    };
    notifier.send(&message).await?;

    println!("Test mail sent to {to}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_import_flags() {
        let cli = Cli::try_parse_from([
            "cardsync",
            "-vv",
            "import",
            "a.vcf",
            "b.vcf",
            "--sender",
            "sales@example.com",
            "--abort-on-failure",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Import {
                files,
                sender,
                abort_on_failure,
            } => {
                assert_eq!(files, vec![PathBuf::from("a.vcf"), PathBuf::from("b.vcf")]);
                assert_eq!(sender, "sales@example.com");
                assert!(abort_on_failure);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn import_requires_files_and_sender() {
        assert!(Cli::try_parse_from(["cardsync", "import", "--sender", "x@example.com"]).is_err());
        assert!(Cli::try_parse_from(["cardsync", "import", "a.vcf"]).is_err());
    }

    #[test]
    fn database_flag_overrides_config() {
        let config = AppConfig::default();
        assert_eq!(
            database_path(&config, None),
            PathBuf::from("var/crm/cardsync.db")
        );
        assert_eq!(
            database_path(&config, Some(PathBuf::from("/tmp/other.db"))),
            PathBuf::from("/tmp/other.db")
        );
    }

    #[test]
    fn local_files_are_typed_by_extension() {
        let dir = std::env::temp_dir().join(format!("cs_cli_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let card = dir.join("jane.vcf");
        let other = dir.join("notes.txt");
        std::fs::write(&card, "BEGIN:VCARD\r\nEND:VCARD\r\n").unwrap();
        std::fs::write(&other, "hello").unwrap();

        let a = read_attachment(&card).unwrap();
        assert_eq!(a.name, "jane.vcf");
        assert_eq!(a.mime_type, "text/vcard");
        assert!(a.is_vcard());

        let b = read_attachment(&other).unwrap();
        assert_eq!(b.mime_type, "application/octet-stream");
        assert!(!b.is_vcard());

        assert!(read_attachment(&dir.join("missing.vcf")).is_err());
    }
}
