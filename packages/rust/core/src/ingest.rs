//! Ingestion driver: turns batches of attachments into per-file outcome lines.
//!
//! A batch is one sender plus its attachments. Records inside a batch are
//! reconciled strictly one after another on a single store session, since
//! several cards may name the same company and must not race to create it.

use cardsync_shared::{FailurePolicy, Result};
use cardsync_storage::{CrmDatabase, EntityStore};
use tracing::{error, info, instrument, warn};

use crate::context::BatchContext;
use crate::reconcile::reconcile_contact;

/// MIME types accepted as vCards.
const VCARD_MIME_TYPES: [&str; 2] = ["text/vcard", "text/x-vcard"];

/// One file received for import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    /// Only `.vcf` files with a vCard MIME type are imported.
    pub fn is_vcard(&self) -> bool {
        VCARD_MIME_TYPES.contains(&self.mime_type.as_str()) && self.name.ends_with(".vcf")
    }
}

/// Attachments sent by one sender; writes are attributed to that sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBatch {
    pub sender: String,
    pub attachments: Vec<Attachment>,
}

/// Outcome lines of all batches of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Sender of the last batch; the report goes back to them.
    pub recipient: Option<String>,
    pub lines: Vec<String>,
    /// Number of files that failed with an error.
    pub failures: usize,
}

/// Progress callback for reporting import status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a batch's actor has been resolved.
    fn batch_started(&self, sender: &str, attachments: usize);
    /// Called after each attachment with its outcome line.
    fn file_done(&self, line: &str, current: usize, total: usize);
    /// Called when all batches are done.
    fn done(&self, report: &ImportReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn batch_started(&self, _sender: &str, _attachments: usize) {}
    fn file_done(&self, _line: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &ImportReport) {}
}

/// Import every batch, each on its own store session.
///
/// Record failures become outcome lines. An error is returned only when a
/// batch cannot start (unknown sender, store unavailable).
pub async fn run_import(
    db: &CrmDatabase,
    batches: Vec<ImportBatch>,
    policy: FailurePolicy,
    progress: &dyn ProgressReporter,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for batch in &batches {
        let session = db.session()?;
        let outcome = import_batch(session, batch, policy, progress).await?;
        report.lines.extend(outcome.lines);
        report.failures += outcome.failures;
        report.recipient = Some(batch.sender.clone());
    }

    info!(
        batches = batches.len(),
        files = report.lines.len(),
        failures = report.failures,
        "import finished"
    );
    progress.done(&report);
    Ok(report)
}

/// Import the attachments of one batch on `store`. The store is released when
/// the batch ends, whatever the per-record outcomes.
#[instrument(skip_all, fields(sender = %batch.sender, attachments = batch.attachments.len()))]
pub async fn import_batch<S: EntityStore>(
    store: S,
    batch: &ImportBatch,
    policy: FailurePolicy,
    progress: &dyn ProgressReporter,
) -> Result<ImportReport> {
    let ctx = BatchContext::begin(store, &batch.sender).await?;
    progress.batch_started(&batch.sender, batch.attachments.len());

    let total = batch.attachments.len();
    let mut report = ImportReport {
        recipient: Some(batch.sender.clone()),
        ..Default::default()
    };
    let mut aborted = false;

    for (i, attachment) in batch.attachments.iter().enumerate() {
        let line = if aborted {
            format!("{}: not processed (batch aborted)", attachment.name)
        } else if !attachment.is_vcard() {
            info!(file = %attachment.name, mime_type = %attachment.mime_type, "not a vCard");
            format!(
                "{}: not imported (mime-type: {})",
                attachment.name, attachment.mime_type
            )
        } else {
            match import_file(&ctx, attachment).await {
                Ok(outcome) => format!("{}: {outcome}", attachment.name),
                Err(e) => {
                    warn!(file = %attachment.name, error = %e, "record failed");
                    report.failures += 1;
                    if policy == FailurePolicy::AbortBatch {
                        error!(file = %attachment.name, "aborting batch after failure");
                        aborted = true;
                    }
                    format!("{}: failed ({e})", attachment.name)
                }
            }
        };

        progress.file_done(&line, i + 1, total);
        report.lines.push(line);
    }

    Ok(report)
}

async fn import_file<S: EntityStore>(
    ctx: &BatchContext<S>,
    attachment: &Attachment,
) -> Result<crate::reconcile::ReconcileOutcome> {
    let record = cardsync_vcard::parse_bytes(&attachment.content)?;
    reconcile_contact(ctx, &record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingStore, seed_actor, test_db};
    use std::sync::Mutex;

    fn vcf(name: &str, body: &str) -> Attachment {
        Attachment {
            name: name.into(),
            mime_type: "text/vcard".into(),
            content: body.as_bytes().to_vec(),
        }
    }

    fn card(given: &str, family: &str, org: &str, email: &str) -> String {
        format!(
            "BEGIN:VCARD\r\nVERSION:3.0\r\nN:{family};{given};;;\r\nORG:{org}\r\nEMAIL:{email}\r\nEND:VCARD\r\n"
        )
    }

    #[derive(Default)]
    struct RecordingProgress {
        lines: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn batch_started(&self, _sender: &str, _attachments: usize) {}
        fn file_done(&self, line: &str, _current: usize, _total: usize) {
            self.lines.lock().unwrap().push(line.to_string());
        }
        fn done(&self, _report: &ImportReport) {}
    }

    #[test]
    fn vcard_detection() {
        assert!(vcf("a.vcf", "").is_vcard());
        let mut att = vcf("a.vcf", "");
        att.mime_type = "text/x-vcard".into();
        assert!(att.is_vcard());
        att.mime_type = "application/pdf".into();
        assert!(!att.is_vcard());
        assert!(!vcf("a.txt", "").is_vcard());
    }

    #[tokio::test]
    async fn one_line_per_attachment() {
        let db = test_db().await;
        seed_actor(&db.session().unwrap(), "sales@example.com").await;

        let batch = ImportBatch {
            sender: "sales@example.com".into(),
            attachments: vec![
                vcf("ada.vcf", &card("Ada", "Lovelace", "Engines Ltd", "ada@example.com")),
                Attachment {
                    name: "logo.png".into(),
                    mime_type: "image/png".into(),
                    content: vec![0x89, 0x50],
                },
                vcf("nameless.vcf", &card("", "", "Engines Ltd", "x@example.com")),
                vcf("broken.vcf", "not a card"),
                vcf("ada-again.vcf", &card("Ada", "Lovelace", "Engines Ltd", "ada@example.com")),
            ],
        };

        let progress = RecordingProgress::default();
        let report = run_import(&db, vec![batch], FailurePolicy::Continue, &progress)
            .await
            .unwrap();

        assert_eq!(
            report.lines,
            vec![
                "ada.vcf: New account created, New contact created",
                "logo.png: not imported (mime-type: image/png)",
                "nameless.vcf: Skipped: family name not provided",
                "broken.vcf: failed (parse error: vCard must start with BEGIN:VCARD)",
                "ada-again.vcf: Existing account updated, Existing contact updated",
            ]
        );
        assert_eq!(report.failures, 1);
        assert_eq!(report.recipient.as_deref(), Some("sales@example.com"));
        assert_eq!(*progress.lines.lock().unwrap(), report.lines);
    }

    #[tokio::test]
    async fn abort_policy_stops_the_batch() {
        let db = test_db().await;
        seed_actor(&db.session().unwrap(), "sales@example.com").await;

        let batch = ImportBatch {
            sender: "sales@example.com".into(),
            attachments: vec![
                vcf("broken.vcf", "garbage"),
                vcf("ada.vcf", &card("Ada", "Lovelace", "Engines Ltd", "ada@example.com")),
            ],
        };

        let report = run_import(&db, vec![batch], FailurePolicy::AbortBatch, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.lines[1], "ada.vcf: not processed (batch aborted)");

        let session = db.session().unwrap();
        let contacts = session
            .find_by_equals(cardsync_shared::EntityKind::Contact, "lastname", "Lovelace")
            .await
            .unwrap();
        assert!(contacts.is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_reported_and_the_batch_continues() {
        let db = test_db().await;
        seed_actor(&db.session().unwrap(), "sales@example.com").await;

        let batch = ImportBatch {
            sender: "sales@example.com".into(),
            attachments: vec![
                vcf("ada.vcf", &card("Ada", "Lovelace", "Engines Ltd", "ada@example.com")),
                vcf("grace.vcf", &card("Grace", "Hopper", "Navy Labs", "grace@example.com")),
            ],
        };

        // The first save (Ada's account) fails.
        let store = FailingStore::new(db.session().unwrap(), 1);
        let report = import_batch(store, &batch, FailurePolicy::Continue, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(
            report.lines,
            vec![
                "ada.vcf: failed (storage error: connection reset by peer)",
                "grace.vcf: New account created, New contact created",
            ]
        );
        assert_eq!(report.failures, 1);
    }

    #[tokio::test]
    async fn unknown_sender_fails_the_request() {
        let db = test_db().await;
        let batch = ImportBatch {
            sender: "stranger@example.com".into(),
            attachments: vec![vcf("ada.vcf", &card("Ada", "Lovelace", "Engines", "a@b.c"))],
        };
        let err = run_import(&db, vec![batch], FailurePolicy::Continue, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "not found: User not found in CRM");
    }

    #[tokio::test]
    async fn report_goes_to_the_last_sender() {
        let db = test_db().await;
        let session = db.session().unwrap();
        seed_actor(&session, "first@example.com").await;
        seed_actor(&session, "second@example.com").await;

        let batches = vec![
            ImportBatch {
                sender: "first@example.com".into(),
                attachments: vec![vcf("a.vcf", &card("A", "One", "Shared GmbH", "a@x.example"))],
            },
            ImportBatch {
                sender: "second@example.com".into(),
                attachments: vec![vcf("b.vcf", &card("B", "Two", "Shared AG", "b@x.example"))],
            },
        ];
        let report = run_import(&db, batches, FailurePolicy::Continue, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.recipient.as_deref(), Some("second@example.com"));
        assert_eq!(
            report.lines,
            vec![
                "a.vcf: New account created, New contact created",
                "b.vcf: Existing account updated, New contact created",
            ]
        );
    }
}
