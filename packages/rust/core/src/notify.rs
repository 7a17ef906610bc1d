//! Outbound email for import reports and request errors.

use async_trait::async_trait;
use cardsync_shared::{CardSyncError, MandrillConfig, Result, require_env};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use url::Url;

use crate::ingest::ImportReport;

/// Subject of the per-request result mail.
pub const REPORT_SUBJECT: &str = "VCard import finished";
/// Subject of the mail sent when a request fails as a whole.
pub const ERROR_SUBJECT: &str = "Error in VCard Import";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A single outbound mail in Mandrill's message shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from_email: String,
    pub to: Vec<Recipient>,
    pub subject: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub email: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Recipient {
    pub fn to(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            kind: "to".into(),
        }
    }
}

/// Delivers outbound mail.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Message builders
// ---------------------------------------------------------------------------

/// Result mail listing one outcome line per file.
pub fn report_email(from: &str, to: &str, report: &ImportReport) -> EmailMessage {
    let html_lines: Vec<String> = report.lines.iter().map(|l| escape_html(l)).collect();
    EmailMessage {
        from_email: from.to_string(),
        to: vec![Recipient::to(to)],
        subject: REPORT_SUBJECT.to_string(),
        text: format!("Results:\t\n\t\n{}", report.lines.join("\t\n")),
        html: Some(format!(
            "Results:<br/>\t\n <br/>\t\n{}",
            html_lines.join("<br/>\t\n")
        )),
    }
}

/// Error mail for a request that failed before producing a report.
pub fn error_email(from: &str, to: &str, error: &CardSyncError) -> EmailMessage {
    EmailMessage {
        from_email: from.to_string(),
        to: vec![Recipient::to(to)],
        subject: ERROR_SUBJECT.to_string(),
        text: format!("{error}\n\n{error:#?}"),
        html: None,
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ---------------------------------------------------------------------------
// Mandrill
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SendRequest<'a> {
    key: &'a str,
    message: &'a EmailMessage,
}

#[derive(Debug, Deserialize)]
struct SendResult {
    email: String,
    status: String,
    #[serde(default)]
    reject_reason: Option<String>,
}

/// Sends mail through Mandrill's `messages/send` API.
pub struct MandrillNotifier {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl MandrillNotifier {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let endpoint = format!("{}/messages/send.json", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| CardSyncError::config(format!("invalid Mandrill base URL '{base_url}': {e}")))?;
        let client = Client::builder()
            .user_agent(concat!("cardsync/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CardSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Notifier for MandrillNotifier {
    #[instrument(skip_all, fields(subject = %message.subject))]
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&SendRequest {
                key: &self.api_key,
                message,
            })
            .send()
            .await
            .map_err(|e| CardSyncError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CardSyncError::Network(format!(
                "Mandrill send failed: HTTP {status}: {body}"
            )));
        }

        let results: Vec<SendResult> = response
            .json()
            .await
            .map_err(|e| CardSyncError::Network(format!("unexpected Mandrill response: {e}")))?;

        for result in &results {
            if matches!(result.status.as_str(), "rejected" | "invalid") {
                return Err(CardSyncError::Network(format!(
                    "Mandrill {} mail to {}: {}",
                    result.status,
                    result.email,
                    result.reject_reason.as_deref().unwrap_or("no reason given")
                )));
            }
        }

        info!(recipients = results.len(), "mail sent");
        Ok(())
    }
}

/// Logs mail instead of sending it. Used when no API key is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let to: Vec<&str> = message.to.iter().map(|r| r.email.as_str()).collect();
        info!(?to, subject = %message.subject, body = %message.text, "mail not sent (no Mandrill API key)");
        Ok(())
    }
}

/// Mandrill when its API key is set, otherwise the logging fallback.
pub fn notifier_from_config(config: &MandrillConfig) -> Result<Box<dyn Notifier>> {
    match require_env(&config.api_key_env) {
        Ok(key) => Ok(Box::new(MandrillNotifier::new(&config.base_url, key)?)),
        Err(e) => {
            warn!(error = %e, "outbound mail disabled");
            Ok(Box::new(LogNotifier))
        }
    }
}
