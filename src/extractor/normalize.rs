use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use url::Url;

const DATETIME_FORMATS: &[&str] = &[
    "%d-%b-%Y %I:%M%p",
    "%d-%b-%Y %I:%M %p",
    "%d-%b-%Y %H:%M",
    "%d/%m/%Y %I:%M%p",
    "%d/%m/%Y %I:%M %p",
    "%d/%m/%Y %H:%M",
    "%d %b %Y %I:%M%p",
    "%d %b %Y %I:%M %p",
    "%d %b %Y %H:%M",
    "%d %B %Y %I:%M%p",
    "%d %B %Y %I:%M %p",
    "%d %B %Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%d-%b-%Y",
    "%d/%m/%Y",
    "%Y-%m-%d",
    "%d %b %Y",
    "%d %b, %Y",
    "%d %B %Y",
    "%d %B, %Y",
];

// Timezone labels and bracketed notes the portals append to closing times.
static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\([^)]*\)|\b(?:AEST|AEDT|ACST|ACDT|AWST|AET|Brisbane time|Melbourne time)\b")
        .expect("static regex")
});

static EMBEDDED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2})?)?|\d{1,2}[-/ ](?:\d{1,2}|[a-z]{3,9}),?[-/ ]\d{4}(?:,?\s+\d{1,2}:\d{2}\s*(?:[ap]m)?)?",
    )
    .expect("static regex")
});

/// Collapse runs of whitespace and drop control characters.
pub fn clean_text(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cleaned text, or `None` when nothing is left.
pub fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(clean_text).filter(|s| !s.is_empty())
}

/// Resolve `raw` against `base` and normalise it: lower-case scheme and host
/// (done by `Url`), query pairs sorted, fragment dropped.
pub fn canonicalize_url(raw: &str, base: Option<&Url>) -> Option<Url> {
    let raw = raw.trim();
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };

    if !matches!(url.scheme(), "http" | "https" | "file") {
        return None;
    }

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Some(url)
}

/// Stable id for listings that carry no reference number.
pub fn derive_external_id(canonical_url: &str) -> String {
    let digest = Sha256::digest(canonical_url.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("url-{}", hex)
}

/// Parse a closing date as published. Date-only values become midnight.
pub fn parse_deadline(raw: &str) -> Option<NaiveDateTime> {
    let cleaned = clean_text(&NOISE.replace_all(raw, " "));
    if cleaned.is_empty() {
        return None;
    }

    parse_exact(&cleaned).or_else(|| {
        EMBEDDED_DATE
            .find_iter(&cleaned)
            .find_map(|m| parse_exact(m.as_str()))
    })
}

fn parse_exact(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_end_matches(',');

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
