pub mod sqlite;

use async_trait::async_trait;

use crate::dedup::KnownKeySet;
use crate::models::{RecordKey, TenderRecord};
use crate::utils::error::PersistError;

pub use sqlite::SqliteStore;

/// Outcome of writing one batch of new records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistResult {
    pub inserted: Vec<RecordKey>,
    /// Inserts the unique key turned into no-ops.
    pub duplicates: usize,
    pub failed: Vec<PersistError>,
    /// Records never attempted because the connection went away.
    pub skipped: usize,
    pub connection_lost: bool,
}

impl PersistResult {
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.connection_lost
    }
}

#[async_trait]
pub trait TenderStore: Send + Sync {
    /// Insert each record unless its `(source, external_id)` already exists.
    async fn persist(&self, records: &[TenderRecord]) -> PersistResult;

    async fn load_known_keys(&self, source: &str) -> Result<KnownKeySet, PersistError>;

    async fn health_check(&self) -> bool;
}
