use super::*;
use chrono::Utc;
use tenderbot::models::{RecordKey, TenderRecord};
use tenderbot::store::TenderStore;

fn record(id: &str) -> TenderRecord {
    TenderRecord {
        source: "qtenders".to_string(),
        external_id: id.to_string(),
        title: format!("Tender {}", id),
        url: format!("https://qtenders.example.gov.au/t/{}", id),
        deadline: None,
        buyer: None,
        category: None,
        description: None,
        fetched_at: Utc::now(),
    }
}

fn file_database(dir: &Path) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}", dir.join("data").join("tenders.db").display()),
        max_connections: 2,
        acquire_timeout: 5,
    }
}

#[tokio::test]
async fn test_records_survive_reconnect() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = file_database(dir.path());

    {
        let store = SqliteStore::connect(&config).await?;
        store.migrate().await?;
        store.verify_schema().await?;

        let result = store.persist(&[record("VP1"), record("VP2")]).await;
        assert_eq!(result.inserted_count(), 2);
        store.pool().close().await;
    }

    let store = SqliteStore::connect(&config).await?;
    assert!(store.health_check().await);
    store.verify_schema().await?;

    let known = store.load_known_keys("qtenders").await?;
    assert_eq!(known.len(), 2);
    assert!(known.contains(&RecordKey::new("qtenders", "VP2")));

    let again = store.persist(&[record("VP2"), record("VP3")]).await;
    assert_eq!(again.inserted_count(), 1);
    assert_eq!(again.duplicates, 1);
    assert_eq!(store.count().await?, 3);

    Ok(())
}

#[tokio::test]
async fn test_fresh_database_needs_migration() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SqliteStore::connect(&file_database(dir.path())).await?;

    assert!(store.health_check().await);
    assert!(store.verify_schema().await.is_err());

    store.migrate().await?;
    assert!(store.verify_schema().await.is_ok());

    // Re-running the migrations is a no-op.
    store.migrate().await?;
    assert!(store.verify_schema().await.is_ok());

    Ok(())
}
