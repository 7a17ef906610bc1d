//! vCard text parsing for cardsync.
//!
//! Turns one vCard (2.1, 3.0 or 4.0) into a [`ContactRecord`]. Only the
//! properties the CRM mapping consumes are interpreted; everything else is
//! skipped.

mod parser;

use cardsync_shared::{ContactRecord, Result};

/// Parse the first card in `text`.
///
/// Fails with a parse error when the text does not start with `BEGIN:VCARD`.
pub fn parse(text: &str) -> Result<ContactRecord> {
    parser::parse_card(text)
}

/// Parse a vCard from raw attachment bytes, tolerating invalid UTF-8.
pub fn parse_bytes(bytes: &[u8]) -> Result<ContactRecord> {
    let text = String::from_utf8_lossy(bytes);
    parser::parse_card(text.trim_start_matches('\u{feff}'))
}
