//! Turns fetched page bodies into tender records.
//!
//! Extraction is pure: the same `RawContent` and source rules always yield the
//! same records, so a failed pass can simply be re-run.

pub mod html;
pub mod json;
pub mod normalize;

use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

use crate::fetcher::RawContent;
use crate::models::{ExtractRules, RecordKey, SourceConfig, TenderRecord};
use crate::utils::error::ExtractError;

use normalize::{canonicalize_url, derive_external_id, non_empty, parse_deadline};

/// Field values read from one listing entry, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub title: Option<String>,
    pub link: Option<String>,
    pub id: Option<String>,
    pub deadline: Option<String>,
    pub buyer: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<TenderRecord>,
    /// Rows that were skipped.
    pub errors: Vec<ExtractError>,
    /// Rows whose key already appeared earlier in the same content.
    pub repeated: usize,
    /// Records dropped by the per-source cap.
    pub truncated: usize,
}

impl Extraction {
    pub fn cap(&mut self, limit: usize) {
        if self.records.len() > limit {
            self.truncated += self.records.len() - limit;
            self.records.truncate(limit);
        }
    }
}

pub fn extract(raw: &RawContent, source: &SourceConfig) -> Result<Extraction, ExtractError> {
    let rows = match &source.extract {
        ExtractRules::Html(rules) => html::extract_rows(&raw.pages, rules)?,
        ExtractRules::Json(rules) => json::extract_rows(&raw.pages, raw.kind, rules)?,
    };

    let id_pattern = source
        .id_pattern()
        .map(Regex::new)
        .transpose()
        .map_err(|e| ExtractError::InvalidSelector {
            selector: source.id_pattern().unwrap_or_default().to_string(),
            message: e.to_string(),
        })?;

    let base = Url::parse(&raw.url).ok();
    let mut extraction = Extraction::default();
    let mut seen: HashSet<RecordKey> = HashSet::new();

    for (index, row) in rows.into_iter().enumerate() {
        match build_record(index + 1, row, raw, base.as_ref(), id_pattern.as_ref()) {
            Ok(record) => {
                if seen.insert(record.key()) {
                    extraction.records.push(record);
                } else {
                    extraction.repeated += 1;
                }
            }
            Err(e) => {
                warn!(source = %raw.source, error = %e, "Skipping listing row");
                extraction.errors.push(e);
            }
        }
    }

    if let Some(limit) = source.max_items {
        extraction.cap(limit);
    }

    debug!(
        source = %raw.source,
        records = extraction.records.len(),
        skipped = extraction.errors.len(),
        repeated = extraction.repeated,
        "Extraction complete"
    );
    Ok(extraction)
}

fn build_record(
    row_number: usize,
    row: RawRow,
    raw: &RawContent,
    base: Option<&Url>,
    id_pattern: Option<&Regex>,
) -> Result<TenderRecord, ExtractError> {
    let title = non_empty(row.title.as_deref()).ok_or(ExtractError::MissingField {
        row: row_number,
        field: "title",
    })?;

    let explicit_id = non_empty(row.id.as_deref());

    let url = match non_empty(row.link.as_deref()) {
        Some(link) => canonicalize_url(&link, base).ok_or(ExtractError::InvalidUrl {
            row: row_number,
            url: link,
        })?,
        // Listings without their own page point back at the listing.
        None if explicit_id.is_some() => base.cloned().ok_or(ExtractError::InvalidUrl {
            row: row_number,
            url: raw.url.clone(),
        })?,
        None => {
            return Err(ExtractError::MissingField {
                row: row_number,
                field: "link",
            })
        }
    };

    let external_id = explicit_id
        .or_else(|| {
            id_pattern
                .and_then(|re| re.captures(url.as_str()))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|id| !id.is_empty())
        })
        .unwrap_or_else(|| derive_external_id(url.as_str()));

    Ok(TenderRecord {
        source: raw.source.clone(),
        external_id,
        title,
        url: url.to_string(),
        deadline: row.deadline.as_deref().and_then(parse_deadline),
        buyer: non_empty(row.buyer.as_deref()),
        category: non_empty(row.category.as_deref()),
        description: non_empty(row.description.as_deref()),
        fetched_at: raw.fetched_at,
    })
}
