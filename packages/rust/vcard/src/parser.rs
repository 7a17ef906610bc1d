//! vCard content-line parser.
//!
//! Handles the subset of RFC 2426 / RFC 6350 (and the older 2.1 dialect that
//! Outlook still emits) needed for contact import:
//! - line folding and quoted-printable soft line breaks
//! - `group.` prefixes (`item1.EMAIL`)
//! - `TYPE=a,b` as well as bare 2.1 type parameters (`TEL;WORK;FAX`)
//! - `ENCODING=QUOTED-PRINTABLE` with UTF-8 or Latin-1 charsets
//! - backslash escapes in text values

use cardsync_shared::{
    AddressKind, CardSyncError, ContactRecord, Gender, PhoneKind, PhoneNumber, PostalAddress,
    Result,
};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

/// `YYYY-MM-DD` or `YYYYMMDD`, optionally followed by a time part.
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-?(\d{2})-?(\d{2})").expect("date regex")
});

// ---------------------------------------------------------------------------
// Content lines
// ---------------------------------------------------------------------------

/// One unfolded `NAME;PARAMS:VALUE` line with its value already decoded
/// from any transfer encoding (but not yet unescaped).
#[derive(Debug)]
struct ContentLine {
    name: String,
    types: Vec<String>,
    value: String,
}

impl ContentLine {
    fn parse(line: &str) -> Option<Self> {
        let colon = value_separator(line)?;
        let (head, value) = (&line[..colon], &line[colon + 1..]);

        let mut parts = head.split(';');
        let name = parts.next()?.rsplit('.').next()?.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }

        let mut types = Vec::new();
        let mut quoted_printable = false;
        let mut latin1 = false;
        for param in parts {
            match param.split_once('=') {
                Some((key, val)) => {
                    let val = val.trim_matches('"');
                    match key.trim().to_ascii_uppercase().as_str() {
                        "TYPE" => types.extend(
                            val.split(',')
                                .map(|t| t.trim().to_ascii_lowercase())
                                .filter(|t| !t.is_empty()),
                        ),
                        "ENCODING" => {
                            quoted_printable = val.eq_ignore_ascii_case("QUOTED-PRINTABLE")
                        }
                        "CHARSET" => {
                            latin1 = matches!(
                                val.to_ascii_lowercase().as_str(),
                                "iso-8859-1" | "windows-1252" | "latin1"
                            )
                        }
                        _ => {}
                    }
                }
                None if param.eq_ignore_ascii_case("QUOTED-PRINTABLE") => quoted_printable = true,
                None => types.push(param.trim().to_ascii_lowercase()),
            }
        }

        let value = if quoted_printable {
            let bytes = decode_quoted_printable(value);
            if latin1 {
                bytes.iter().map(|&b| b as char).collect()
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        } else {
            value.to_string()
        };

        Some(Self { name, types, value })
    }

    fn has_type(&self, wanted: &str) -> bool {
        self.types.iter().any(|t| t == wanted)
    }

    /// Structured value components, unescaped.
    fn components(&self) -> Vec<String> {
        split_escaped(&self.value, ';')
    }

    fn text(&self) -> Option<String> {
        non_empty(&unescape(&self.value))
    }
}

/// Position of the `:` separating parameters from the value, ignoring colons
/// inside quoted parameter values.
fn value_separator(line: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse the first vCard in `text` into a [`ContactRecord`].
pub(crate) fn parse_card(text: &str) -> Result<ContactRecord> {
    let lines = unfold(text);
    let mut lines = lines.iter().map(|l| l.trim_end()).filter(|l| !l.is_empty());

    match lines.next() {
        Some(first) if first.trim().eq_ignore_ascii_case("BEGIN:VCARD") => {}
        Some(_) => return Err(CardSyncError::parse("vCard must start with BEGIN:VCARD")),
        None => return Err(CardSyncError::parse("vCard is empty")),
    }

    let mut record = ContactRecord::default();
    let mut role = None;

    for line in lines {
        if line.trim().eq_ignore_ascii_case("END:VCARD") {
            break;
        }
        let Some(prop) = ContentLine::parse(line) else {
            trace!(line, "skipping malformed content line");
            continue;
        };

        match prop.name.as_str() {
            "N" => {
                let parts = prop.components();
                record.family_name = parts.first().and_then(|s| non_empty(s));
                record.given_name = parts.get(1).and_then(|s| non_empty(s));
            }
            "ORG" => {
                let parts = prop.components();
                record.organization = parts.first().and_then(|s| non_empty(s));
                record.department = parts.get(1).and_then(|s| non_empty(s));
            }
            "TITLE" => record.job_title = prop.text(),
            "ROLE" => role = prop.text(),
            "BDAY" => record.birth_date = parse_date(&prop.value),
            "GENDER" | "X-GENDER" | "X-WAB-GENDER" => {
                let gender = parse_gender(&prop.name, &prop.value);
                if gender != Gender::Unknown {
                    record.gender = gender;
                }
            }
            "NOTE" => record.notes.extend(prop.text()),
            "TEL" => {
                if let Some(number) = prop.text() {
                    let number = strip_scheme(&number, "tel:").to_string();
                    record.phones.push(PhoneNumber::new(number, &phone_kinds(&prop)));
                }
            }
            "EMAIL" => {
                if let Some(email) = prop.text() {
                    record.emails.push(strip_scheme(&email, "mailto:").to_string());
                }
            }
            "URL" => record.websites.extend(prop.text()),
            "ADR" => record.addresses.push(parse_address(&prop)),
            "CATEGORIES" => record.categories.extend(
                split_escaped(&prop.value, ',')
                    .iter()
                    .filter_map(|c| non_empty(c)),
            ),
            _ => {}
        }
    }

    if record.job_title.is_none() {
        record.job_title = role;
    }

    Ok(record)
}

/// Join folded lines and quoted-printable soft line breaks.
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut soft_break = false;

    for raw in text.lines() {
        match lines.last_mut() {
            Some(last) if soft_break => {
                last.pop();
                last.push_str(raw);
            }
            Some(last) if raw.starts_with([' ', '\t']) => last.push_str(&raw[1..]),
            _ => lines.push(raw.to_string()),
        }
        soft_break = lines
            .last()
            .is_some_and(|l| l.ends_with('=') && is_quoted_printable(l));
    }

    lines
}

fn is_quoted_printable(line: &str) -> bool {
    value_separator(line)
        .map(|i| &line[..i])
        .is_some_and(|head| head.to_ascii_uppercase().contains("QUOTED-PRINTABLE"))
}

fn decode_quoted_printable(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' && i + 2 < bytes.len() {
            let byte = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = byte {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Split on unescaped `sep` and unescape each component.
fn split_escaped(value: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == sep {
            parts.push(unescape(&current));
            current.clear();
        } else {
            current.push(c);
        }
    }
    parts.push(unescape(&current));
    parts
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> &'a str {
    match value.get(..scheme.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(scheme) => &value[scheme.len()..],
        _ => value,
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let caps = DATE_RE.captures(value.trim())?;
    let date = NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    );
    if date.is_none() {
        trace!(value, "ignoring invalid birth date");
    }
    date
}

fn parse_gender(property: &str, value: &str) -> Gender {
    let value = value.split(';').next().unwrap_or_default().trim();
    match property {
        // Outlook: 1 = female, 2 = male
        "X-WAB-GENDER" => match value {
            "2" => Gender::Male,
            "1" => Gender::Female,
            _ => Gender::Unknown,
        },
        _ => match value.to_ascii_lowercase().as_str() {
            "m" | "male" => Gender::Male,
            "f" | "female" => Gender::Female,
            _ => Gender::Unknown,
        },
    }
}

fn phone_kinds(prop: &ContentLine) -> Vec<PhoneKind> {
    prop.types
        .iter()
        .filter_map(|t| match t.as_str() {
            "work" => Some(PhoneKind::Work),
            "fax" => Some(PhoneKind::Fax),
            "cell" | "mobile" => Some(PhoneKind::Cellular),
            "home" => Some(PhoneKind::Home),
            _ => None,
        })
        .collect()
}

/// `ADR`: post office box; extended; street; locality; region; postal code; country.
fn parse_address(prop: &ContentLine) -> PostalAddress {
    let parts = prop.components();
    let field = |i: usize| parts.get(i).and_then(|s| non_empty(s));
    PostalAddress {
        kind: if prop.has_type("work") {
            AddressKind::Work
        } else {
            AddressKind::Other
        },
        street: field(2),
        city: field(3),
        region: field(4),
        postal_code: field(5),
        country: field(6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V3_CARD: &str = "BEGIN:VCARD\r\n\
VERSION:3.0\r\n\
N:Lovelace;Ada;;;\r\n\
FN:Ada Lovelace\r\n\
ORG:Analytical Engines GmbH;Research\r\n\
TITLE:Chief Mathematician\r\n\
TEL;TYPE=WORK,VOICE:+44 20 1234\r\n\
TEL;TYPE=WORK,FAX:+44 20 9999\r\n\
TEL;TYPE=CELL:+44 7700 900000\r\n\
item1.EMAIL;type=INTERNET;type=pref:ada@engines.example\r\n\
EMAIL;TYPE=INTERNET:ada@home.example\r\n\
URL:https://engines.example\r\n\
ADR;TYPE=HOME:;;1 Home Road;London;;N1 1AA;UK\r\n\
ADR;TYPE=WORK:;;12 St James\\, Square;London;Greater London;SW1Y 4JH;United Kingdom\r\n\
BDAY:1815-12-10\r\n\
NOTE:Met at the\\nRoyal Society\r\n\
CATEGORIES:Verlag,Customer\r\n\
END:VCARD\r\n";

    #[test]
    fn parse_full_v3_card() {
        let card = parse_card(V3_CARD).unwrap();
        assert_eq!(card.family_name.as_deref(), Some("Lovelace"));
        assert_eq!(card.given_name.as_deref(), Some("Ada"));
        assert_eq!(card.organization.as_deref(), Some("Analytical Engines GmbH"));
        assert_eq!(card.department.as_deref(), Some("Research"));
        assert_eq!(card.job_title.as_deref(), Some("Chief Mathematician"));
        assert_eq!(card.birth_date, NaiveDate::from_ymd_opt(1815, 12, 10));
        assert_eq!(card.emails, vec!["ada@engines.example", "ada@home.example"]);
        assert_eq!(card.websites, vec!["https://engines.example"]);
        assert_eq!(card.notes, vec!["Met at the\nRoyal Society"]);
        assert_eq!(card.categories, vec!["Verlag", "Customer"]);

        assert_eq!(card.first_phone(PhoneKind::Work), Some("+44 20 1234"));
        assert_eq!(card.first_phone(PhoneKind::Fax), Some("+44 20 9999"));
        assert_eq!(card.first_phone(PhoneKind::Cellular), Some("+44 7700 900000"));

        let work = card.work_address().expect("work address");
        assert_eq!(work.street.as_deref(), Some("12 St James, Square"));
        assert_eq!(work.region.as_deref(), Some("Greater London"));
        assert_eq!(work.postal_code.as_deref(), Some("SW1Y 4JH"));
        assert_eq!(work.country.as_deref(), Some("United Kingdom"));
        assert_eq!(card.addresses.len(), 2);
    }

    #[test]
    fn parse_outlook_21_card() {
        let text = "BEGIN:VCARD\n\
VERSION:2.1\n\
N;CHARSET=utf-8:M=C3=BCller;J=C3=BCrgen\n\
ORG:M=FCller Druck KG\n\
TEL;WORK;VOICE:0711 123\n\
TEL;CELL:0170 456\n\
EMAIL;PREF;INTERNET:jm@druck.example\n\
NOTE;ENCODING=QUOTED-PRINTABLE;CHARSET=utf-8:Erste Zeile=0D=0A=\n\
zweite Zeile\n\
X-WAB-GENDER:2\n\
ROLE:Gesch=C3=A4ftsf=C3=BChrer\n\
END:VCARD\n";
        let card = parse_card(text).unwrap();

        // Only explicitly QP-encoded values are decoded.
        assert_eq!(card.family_name.as_deref(), Some("M=C3=BCller"));
        assert_eq!(card.organization.as_deref(), Some("M=FCller Druck KG"));
        assert_eq!(card.notes, vec!["Erste Zeile\r\nzweite Zeile"]);
        assert_eq!(card.gender, Gender::Male);
        assert_eq!(card.first_phone(PhoneKind::Work), Some("0711 123"));
        assert_eq!(card.first_phone(PhoneKind::Cellular), Some("0170 456"));
        assert_eq!(card.primary_email(), Some("jm@druck.example"));
        assert_eq!(card.job_title.as_deref(), Some("Gesch=C3=A4ftsf=C3=BChrer"));
    }

    #[test]
    fn quoted_printable_charsets() {
        let utf8 = ContentLine::parse("N;ENCODING=QUOTED-PRINTABLE;CHARSET=UTF-8:M=C3=BCller;J=C3=BCrgen")
            .unwrap();
        assert_eq!(utf8.components(), vec!["Müller", "Jürgen"]);

        let latin1 = ContentLine::parse("ORG;QUOTED-PRINTABLE;CHARSET=ISO-8859-1:M=FCller Druck KG")
            .unwrap();
        assert_eq!(latin1.text().as_deref(), Some("Müller Druck KG"));
    }

    #[test]
    fn folded_lines_are_joined() {
        let text = "BEGIN:VCARD\r\nNOTE:This is a long\r\n  note that was folded\r\nEND:VCARD";
        let card = parse_card(text).unwrap();
        assert_eq!(card.notes, vec!["This is a long note that was folded"]);
    }

    #[test]
    fn title_wins_over_role_in_any_order() {
        let text = "BEGIN:VCARD\nROLE:Editor\nTITLE:Head of Sales\nEND:VCARD";
        let card = parse_card(text).unwrap();
        assert_eq!(card.job_title.as_deref(), Some("Head of Sales"));

        let text = "BEGIN:VCARD\nROLE:Editor\nEND:VCARD";
        let card = parse_card(text).unwrap();
        assert_eq!(card.job_title.as_deref(), Some("Editor"));
    }

    #[test]
    fn vcard4_gender_and_uris() {
        let text = "BEGIN:VCARD\n\
VERSION:4.0\n\
GENDER:F;she/her\n\
TEL;VALUE=uri;TYPE=\"work,voice\":tel:+49-30-1234\n\
EMAIL:mailto:grace@example.org\n\
BDAY:19061209\n\
END:VCARD";
        let card = parse_card(text).unwrap();
        assert_eq!(card.gender, Gender::Female);
        assert_eq!(card.first_phone(PhoneKind::Work), Some("+49-30-1234"));
        assert_eq!(card.primary_email(), Some("grace@example.org"));
        assert_eq!(card.birth_date, NaiveDate::from_ymd_opt(1906, 12, 9));
    }

    #[test]
    fn missing_begin_is_an_error() {
        let err = parse_card("N:Doe;John\nEND:VCARD").unwrap_err();
        assert!(err.to_string().contains("BEGIN:VCARD"));
        assert!(parse_card("   \n").is_err());
    }

    #[test]
    fn missing_fields_stay_absent() {
        let card = parse_card("BEGIN:VCARD\nN:;;;;\nORG:\nBDAY:--1210\nEND:VCARD").unwrap();
        assert_eq!(card.family_name, None);
        assert_eq!(card.given_name, None);
        assert_eq!(card.organization, None);
        assert_eq!(card.birth_date, None);
        assert!(card.emails.is_empty());
    }

    #[test]
    fn only_the_first_card_is_read() {
        let text = "BEGIN:VCARD\nN:One;A\nEND:VCARD\nBEGIN:VCARD\nN:Two;B\nEND:VCARD";
        let card = parse_card(text).unwrap();
        assert_eq!(card.family_name.as_deref(), Some("One"));
    }

    #[test]
    fn escaped_separators() {
        assert_eq!(split_escaped(r"a\;b;c\,d", ';'), vec!["a;b", "c,d"]);
        assert_eq!(unescape(r"line\Nbreak\\"), "line\nbreak\\");
    }
}
