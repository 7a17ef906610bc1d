//! Mandrill inbound webhook: payload model and signature check.
//!
//! Mandrill posts a form with a single `mandrill_events` field holding a JSON
//! array of events. Each inbound event carries the sender, SPF/DKIM results
//! and the attachments keyed by file name.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cardsync_shared::{CardSyncError, Result};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use sha1::Sha1;
use tracing::{debug, warn};

use crate::ingest::{Attachment, ImportBatch};

/// Header carrying Mandrill's request signature.
pub const SIGNATURE_HEADER: &str = "X-Mandrill-Signature";

/// Form field carrying the event array.
pub const EVENTS_FIELD: &str = "mandrill_events";

/// RFC 2047 encoded-word as used by mail clients for attachment names.
static ENCODED_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^=\?utf-8\?B\?(?P<base64>.+)\?=$").expect("encoded name regex")
});

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// One webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: String,
    pub msg: InboundMessage,
}

/// The inbound mail of an event.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub from_email: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub spf: Option<SpfCheck>,
    #[serde(default)]
    pub dkim: Option<DkimCheck>,
    #[serde(default)]
    pub attachments: BTreeMap<String, InboundAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpfCheck {
    pub result: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DkimCheck {
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub valid: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundAttachment {
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub base64: bool,
}

impl InboundMessage {
    /// A sender is trusted if SPF passed or the DKIM signature is valid.
    pub fn is_sender_authorized(&self) -> bool {
        self.spf.as_ref().is_some_and(|s| s.result == "pass")
            || self.dkim.as_ref().is_some_and(|d| d.valid)
    }
}

impl WebhookEvent {
    /// Check the sender and decode the attachments into an import batch.
    pub fn into_batch(self) -> Result<ImportBatch> {
        if !self.msg.is_sender_authorized() {
            warn!(sender = %self.msg.from_email, "SPF and DKIM checks failed");
            return Err(CardSyncError::unauthorized(
                "Sender not authorized: SPF / DKIM Check failed.",
            ));
        }

        let attachments = self
            .msg
            .attachments
            .into_iter()
            .map(|(key, attachment)| {
                let content = if attachment.base64 {
                    BASE64.decode(attachment.content.trim()).map_err(|e| {
                        CardSyncError::parse(format!("attachment '{key}' is not valid base64: {e}"))
                    })?
                } else {
                    attachment.content.into_bytes()
                };
                Ok(Attachment {
                    name: decode_mime_name(&key),
                    mime_type: attachment.mime_type,
                    content,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            sender = %self.msg.from_email,
            attachments = attachments.len(),
            "webhook event accepted"
        );
        Ok(ImportBatch {
            sender: self.msg.from_email,
            attachments,
        })
    }
}

/// Parse the `mandrill_events` form value. Empty or malformed payloads are
/// validation errors.
pub fn parse_events(raw: &str) -> Result<Vec<WebhookEvent>> {
    let json = raw.trim().trim_start_matches("mandrill_events=");
    if json.trim().is_empty() {
        return Err(CardSyncError::validation("mandrill_events is empty"));
    }
    serde_json::from_str(json)
        .map_err(|e| CardSyncError::validation(format!("invalid mandrill_events: {e}")))
}

/// Decode `=?utf-8?B?...?=` attachment names; anything else is returned as is.
pub fn decode_mime_name(input: &str) -> String {
    ENCODED_NAME_RE
        .captures(input)
        .and_then(|caps| BASE64.decode(&caps["base64"]).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| input.to_string())
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

fn signature_mac(key: &str, url: &str, form: &[(String, String)]) -> Result<Hmac<Sha1>> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| CardSyncError::config(format!("invalid webhook key: {e}")))?;

    let mut params: Vec<&(String, String)> = form.iter().collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));

    mac.update(url.as_bytes());
    for (name, value) in params {
        mac.update(name.as_bytes());
        mac.update(value.as_bytes());
    }
    Ok(mac)
}

/// base64(HMAC-SHA1(key, url + sorted form names and values)).
pub fn compute_signature(key: &str, url: &str, form: &[(String, String)]) -> Result<String> {
    let mac = signature_mac(key, url, form)?;
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Check `provided` against the expected signature for this request.
pub fn verify_signature(
    key: &str,
    url: &str,
    form: &[(String, String)],
    provided: Option<&str>,
) -> Result<()> {
    let unauthorized = || CardSyncError::unauthorized("The webhook call was not properly authorized.");

    let provided = provided.ok_or_else(unauthorized)?;
    let provided = BASE64.decode(provided.trim()).map_err(|_| unauthorized())?;

    signature_mac(key, url, form)?
        .verify_slice(&provided)
        .map_err(|_| unauthorized())
}
