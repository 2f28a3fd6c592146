use serde_json::Value;

use super::html::body_text;
use super::RawRow;
use crate::fetcher::ContentKind;
use crate::models::JsonRules;
use crate::utils::error::ExtractError;

fn parse_page(page: &str, kind: ContentKind) -> Result<Value, ExtractError> {
    match serde_json::from_str(page) {
        Ok(value) => Ok(value),
        // Chrome wraps a JSON response in a <pre> element.
        Err(e) if kind == ContentKind::Html => serde_json::from_str(body_text(page).trim())
            .map_err(|_| ExtractError::MalformedContent(format!("expected JSON: {}", e))),
        Err(e) => Err(ExtractError::MalformedContent(format!("expected JSON: {}", e))),
    }
}

fn scalar(item: &Value, pointer: Option<&str>) -> Option<String> {
    match item.pointer(pointer?)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn extract_rows(pages: &[String], kind: ContentKind, rules: &JsonRules) -> Result<Vec<RawRow>, ExtractError> {
    let mut rows = Vec::new();

    for page in pages {
        let document = parse_page(page, kind)?;
        let items = document
            .pointer(&rules.items)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ExtractError::MalformedContent(format!("no array at pointer '{}'", rules.items))
            })?;

        for item in items {
            rows.push(RawRow {
                title: scalar(item, Some(&rules.title)),
                link: scalar(item, rules.link.as_deref()),
                id: scalar(item, rules.id.as_deref()),
                deadline: scalar(item, rules.deadline.as_deref()),
                buyer: scalar(item, rules.buyer.as_deref()),
                category: scalar(item, rules.category.as_deref()),
                description: scalar(item, rules.description.as_deref()),
            });
        }
    }

    Ok(rows)
}
