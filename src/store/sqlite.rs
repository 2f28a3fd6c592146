use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{PersistResult, TenderStore};
use crate::config::DatabaseConfig;
use crate::dedup::KnownKeySet;
use crate::models::{RecordKey, TenderRecord};
use crate::utils::error::{is_connection_error, AppError, PersistError};

pub const TENDERS_TABLE: &str = "tenders";
const KEY_COLUMNS: [&str; 2] = ["source", "external_id"];

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        let filename = options.clone().get_filename().to_path_buf();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database that lives as long as the store.
    pub async fn in_memory() -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the bundled schema. Administrative; a pass never calls this.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Confirm the tenders table and its unique `(source, external_id)` index exist.
    pub async fn verify_schema(&self) -> Result<(), AppError> {
        let table: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(TENDERS_TABLE)
                .fetch_optional(&self.pool)
                .await?;

        if table.is_none() {
            return Err(AppError::Schema(format!("table '{}' is missing", TENDERS_TABLE)));
        }

        let unique_indexes: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_index_list(?) WHERE \"unique\" = 1")
                .bind(TENDERS_TABLE)
                .fetch_all(&self.pool)
                .await?;

        for index in unique_indexes {
            let columns: Vec<String> =
                sqlx::query_scalar("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(&index)
                    .fetch_all(&self.pool)
                    .await?;

            if columns == KEY_COLUMNS {
                debug!(index = %index, "Found unique key index");
                return Ok(());
            }
        }

        Err(AppError::Schema(format!(
            "no unique index on {}({})",
            TENDERS_TABLE,
            KEY_COLUMNS.join(", ")
        )))
    }

    pub async fn fetch_stored(&self, source: &str) -> Result<Vec<TenderRecord>, PersistError> {
        sqlx::query_as::<_, TenderRecord>(
            "SELECT source, external_id, title, url, deadline, buyer, category, description, fetched_at \
             FROM tenders WHERE source = ? ORDER BY id",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistError::from_sqlx(&e))
    }

    pub async fn count(&self) -> Result<i64, PersistError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tenders")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PersistError::from_sqlx(&e))
    }

    async fn insert(&self, record: &TenderRecord) -> Result<bool, sqlx::Error> {
        let done = sqlx::query(
            "INSERT INTO tenders \
             (source, external_id, title, url, deadline, buyer, category, description, fetched_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (source, external_id) DO NOTHING",
        )
        .bind(&record.source)
        .bind(&record.external_id)
        .bind(&record.title)
        .bind(&record.url)
        .bind(record.deadline)
        .bind(&record.buyer)
        .bind(&record.category)
        .bind(&record.description)
        .bind(record.fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }
}

#[async_trait]
impl TenderStore for SqliteStore {
    async fn persist(&self, records: &[TenderRecord]) -> PersistResult {
        let mut result = PersistResult::default();

        for (index, record) in records.iter().enumerate() {
            match self.insert(record).await {
                Ok(true) => result.inserted.push(record.key()),
                Ok(false) => {
                    debug!(key = %record.key(), "Record already stored");
                    result.duplicates += 1;
                }
                Err(e) if is_connection_error(&e) => {
                    error!(source = %record.source, error = %e, "Database connection lost");
                    result.connection_lost = true;
                    result.skipped = records.len() - index - 1;
                    result.failed.push(PersistError::ConnectionLost(e.to_string()));
                    break;
                }
                Err(e) => {
                    warn!(key = %record.key(), error = %e, "Insert failed");
                    result.failed.push(PersistError::Insert {
                        source_name: record.source.clone(),
                        external_id: record.external_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        result
    }

    async fn load_known_keys(&self, source: &str) -> Result<KnownKeySet, PersistError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT external_id FROM tenders WHERE source = ?")
            .bind(source)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistError::from_sqlx(&e))?;

        Ok(ids.into_iter().map(|id| RecordKey::new(source, id)).collect())
    }

    async fn health_check(&self) -> bool {
        match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.pool).await {
            Ok(1) => true,
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    async fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn record(id: &str, title: &str) -> TenderRecord {
        TenderRecord {
            source: "austender".to_string(),
            external_id: id.to_string(),
            title: title.to_string(),
            url: format!("https://www.tenders.gov.au/atm/show/{}", id),
            deadline: NaiveDate::from_ymd_opt(2025, 8, 25).and_then(|d| d.and_hms_opt(14, 0, 0)),
            buyer: Some("Department of Finance".to_string()),
            category: None,
            description: Some("Whole-of-government cloud hosting".to_string()),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_persist_and_load_known_keys() {
        let store = store().await;
        let result = store.persist(&[record("1", "One"), record("2", "Two")]).await;

        assert_eq!(result.inserted_count(), 2);
        assert!(result.is_clean());

        let known = store.load_known_keys("austender").await.unwrap();
        assert_eq!(known.len(), 2);
        assert!(known.contains(&RecordKey::new("austender", "1")));
        assert!(store.load_known_keys("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let store = store().await;
        let batch = vec![record("1", "One"), record("2", "Two")];

        store.persist(&batch).await;
        let again = store.persist(&batch).await;

        assert_eq!(again.inserted_count(), 0);
        assert_eq!(again.duplicates, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_conflict_keeps_first_version() {
        let store = store().await;
        store.persist(&[record("1", "Original title")]).await;
        store.persist(&[record("1", "Changed title")]).await;

        let stored = store.fetch_stored("austender").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Original title");
        assert_eq!(stored[0].deadline, record("1", "").deadline);
        assert_eq!(
            stored[0].description.as_deref(),
            Some("Whole-of-government cloud hosting")
        );
    }

    #[tokio::test]
    async fn test_record_failure_does_not_stop_batch() {
        let store = store().await;
        let result = store
            .persist(&[record("1", "One"), record("", "Bad"), record("3", "Three")])
            .await;

        assert_eq!(result.inserted_count(), 2);
        assert_eq!(result.failed.len(), 1);
        assert!(!result.connection_lost);
        assert!(matches!(
            &result.failed[0],
            PersistError::Insert { source_name, external_id, .. }
                if source_name == "austender" && external_id.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_connection_lost_stops_batch() {
        let store = store().await;
        store.pool().close().await;

        let result = store.persist(&[record("1", "One"), record("2", "Two")]).await;
        assert!(result.connection_lost);
        assert_eq!(result.inserted_count(), 0);
        assert_eq!(result.skipped, 1);

        let err = store.load_known_keys("austender").await.unwrap_err();
        assert!(err.is_connection_lost());
        assert!(!store.health_check().await);
    }

    #[tokio::test]
    async fn test_verify_schema() {
        let bare = SqliteStore::in_memory().await.unwrap();
        assert!(bare.health_check().await);
        assert!(matches!(bare.verify_schema().await, Err(AppError::Schema(_))));

        bare.migrate().await.unwrap();
        assert!(bare.verify_schema().await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_schema_requires_unique_index() {
        let store = store().await;
        sqlx::query("DROP INDEX idx_tenders_source_external_id")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.verify_schema().await.unwrap_err();
        assert!(err.to_string().contains("no unique index"));
    }
}
