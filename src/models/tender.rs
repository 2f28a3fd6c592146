use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// One tender posting as extracted from a source listing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TenderRecord {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub deadline: Option<NaiveDateTime>,
    pub buyer: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// The `(source, external_id)` identity of a tender; unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub source: String,
    pub external_id: String,
}

impl RecordKey {
    pub fn new(source: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.external_id)
    }
}

impl TenderRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.source.clone(), self.external_id.clone())
    }

    /// Short human line used in logs and notifications.
    pub fn summary(&self) -> String {
        match self.deadline {
            Some(deadline) => format!(
                "{} ({}) closes {}",
                self.title,
                self.external_id,
                deadline.format("%Y-%m-%d %H:%M")
            ),
            None => format!("{} ({})", self.title, self.external_id),
        }
    }
}
