//! Mandrill inbound webhook server.
//!
//! `POST /vcard/webhook` verifies the request signature, turns every event
//! into an import batch, runs the batches, and mails the outcome lines back
//! to the sender. `HEAD /vcard/webhook` answers Mandrill's URL check.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Router};
use cardsync_core::notify::{error_email, report_email};
use cardsync_core::webhook::{EVENTS_FIELD, SIGNATURE_HEADER, parse_events, verify_signature};
use cardsync_core::{ImportReport, Notifier, SilentProgress, import_batch};
use cardsync_shared::{FailurePolicy, Result};
use cardsync_storage::CrmDatabase;
use tracing::{error, info, warn};

/// Shared state of the webhook routes.
#[derive(Clone)]
pub(crate) struct AppState {
    pub db: Arc<CrmDatabase>,
    pub notifier: Arc<dyn Notifier>,
    pub policy: FailurePolicy,
    pub webhook_key: String,
    /// URL Mandrill signs; must match the registered webhook URL exactly.
    pub public_url: String,
    pub sending_address: String,
    pub error_recipient: String,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/vcard/webhook",
            post(receive_webhook).head(|| async { StatusCode::OK }),
        )
        .route("/healthz", get(|| async { "ok" }))
        .with_state(Arc::new(state))
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(e) = verify_signature(&state.webhook_key, &state.public_url, &form, signature) {
        warn!(error = %e, "webhook call rejected");
        return StatusCode::UNAUTHORIZED;
    }

    let raw = form
        .iter()
        .find(|(name, _)| name == EVENTS_FIELD)
        .map(|(_, value)| value.as_str())
        .unwrap_or_default();
    let events = match parse_events(raw) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "bad webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    let mut sender = None;
    match import_events(&state, events, &mut sender).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            let to = sender.as_deref().unwrap_or(&state.error_recipient);
            error!(error = %e, recipient = to, "webhook import failed");
            let mail = error_email(&state.sending_address, to, &e);
            if let Err(mail_err) = state.notifier.send(&mail).await {
                error!(error = %mail_err, "error mail not sent");
            }
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Events are handled in order; `sender` tracks the latest one so a failure
/// can be reported to whoever triggered it.
async fn import_events(
    state: &AppState,
    events: Vec<cardsync_core::webhook::WebhookEvent>,
    sender: &mut Option<String>,
) -> Result<()> {
    let mut report = ImportReport::default();

    for event in events {
        *sender = Some(event.msg.from_email.clone());
        let batch = event.into_batch()?;
        let outcome = import_batch(state.db.session()?, &batch, state.policy, &SilentProgress).await?;
        report.lines.extend(outcome.lines);
        report.failures += outcome.failures;
        report.recipient = outcome.recipient;
    }

    let to = report
        .recipient
        .as_deref()
        .unwrap_or(&state.error_recipient);
    info!(
        recipient = to,
        files = report.lines.len(),
        failures = report.failures,
        "webhook import finished"
    );
    state
        .notifier
        .send(&report_email(&state.sending_address, to, &report))
        .await
}
