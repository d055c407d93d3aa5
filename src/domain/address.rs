use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

/// Pulls every address out of a header value such as `"Jane" <jane@co.io>, bob@co.io`.
pub fn extract_addresses(header: &str) -> Vec<String> {
    EMAIL_REGEX
        .find_iter(header)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// First address in a header value, if any.
pub fn first_address(header: &str) -> Option<String> {
    EMAIL_REGEX
        .find(header)
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Lower-cases and drops repeats while keeping first-seen order.
pub fn dedup_addresses<I, S>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for address in addresses {
        let normalized = address.as_ref().trim().to_ascii_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}
