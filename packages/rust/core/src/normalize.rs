//! Company name normalization for fuzzy account matching.
//!
//! The normalized form is only ever used to build begins-with queries; account
//! names are always stored verbatim.

use std::cmp::Reverse;
use std::sync::LazyLock;

/// Legal-entity suffixes, matched as a trailing space-delimited token.
const LEGAL_SUFFIXES: [&str; 22] = [
    "gmbh & co kg",
    "gmbh",
    "mbh",
    "kgaa",
    "se",
    "ag",
    "gbr",
    "kg",
    "& co",
    "inc",
    "ltd",
    "ug",
    "ug (haftungsbeschränkt)",
    "ug haftungsbeschränkt",
    "ohg",
    "ggmbh",
    "sa",
    "sarl",
    "sl",
    "srl",
    "ab",
    "corp",
];

/// Suffix patterns (`" gmbh"`, ...) longest first, so compound suffixes are
/// tried before their shorter constituents.
static SUFFIX_PATTERNS: LazyLock<Vec<String>> = LazyLock::new(|| {
    let mut suffixes = LEGAL_SUFFIXES.to_vec();
    suffixes.sort_by_key(|s| Reverse(s.chars().count()));
    suffixes.into_iter().map(|s| format!(" {s}")).collect()
});

/// Lowercase `name`, trim whitespace and trailing periods, and strip known
/// legal suffixes.
///
/// Each pass walks the whole suffix list and strips every suffix that matches
/// the current tail. Passes repeat until nothing changes, so the result is
/// stable under repeated normalization:
///
/// - `"Acme Inc."` becomes `"acme"`
/// - `"Foo GmbH & Co KG"` becomes `"foo"`
/// - `"Foo Gmbh Kg"` becomes `"foo"`
pub fn normalize_company_name(name: &str) -> String {
    let mut current = clean(&name.to_lowercase());

    loop {
        let before = current.len();
        for pattern in SUFFIX_PATTERNS.iter() {
            if let Some(stripped) = current.strip_suffix(pattern.as_str()) {
                current = clean(stripped);
            }
        }
        if current.len() == before {
            return current;
        }
    }
}

fn clean(name: &str) -> String {
    name.trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}
