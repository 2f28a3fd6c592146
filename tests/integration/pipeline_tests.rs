use super::*;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tenderbot::dedup::KnownKeySet;
use tenderbot::models::{FailurePolicy, FailureStage, TenderRecord};
use tenderbot::relevance::RelevanceFilter;
use tenderbot::store::PersistResult;
use tenderbot::utils::error::PersistError;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pass_survives_unreachable_source() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listing = write_fixture(dir.path(), "a.html", LISTING_A);
    let missing = dir.path().join("b.html");

    let store = create_test_store().await?;
    let config = get_test_config();
    let pipeline = build_pipeline(
        &config,
        vec![html_file_source("a", &listing), html_file_source("b", &missing)],
        store.clone(),
    );

    let result = pipeline.run_pass(&CancellationToken::new()).await;

    assert_eq!(result.sources_attempted, 2);
    assert_eq!(result.extracted, 3);
    assert_eq!(result.malformed, 1);
    assert_eq!(result.new, 3);
    assert_eq!(result.persisted, 3);
    assert_eq!(result.failed_sources(), vec!["b"]);
    assert_eq!(result.failures[0].stage, FailureStage::Fetch);
    assert!(!result.persistence_failed);

    // One source succeeded, so only the strict policy calls this a failure.
    assert!(!result.is_failure(FailurePolicy::AllSources));
    assert!(result.is_failure(FailurePolicy::AnySource));

    let stored = store.fetch_stored("a").await?;
    let ids: Vec<_> = stored.iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["QLD-1001", "QLD-1002", "QLD-1003"]);

    assert_eq!(
        stored[0].deadline,
        NaiveDate::from_ymd_opt(2030, 2, 1).and_then(|d| d.and_hms_opt(14, 0, 0))
    );
    assert_eq!(
        stored[1].deadline,
        NaiveDate::from_ymd_opt(2030, 3, 15).and_then(|d| d.and_hms_opt(0, 0, 0))
    );
    assert_eq!(stored[2].deadline, None);
    assert_eq!(stored[0].buyer.as_deref(), Some("Department of Transport"));
    assert_eq!(stored[0].description, None);
    assert_eq!(
        stored[1].description.as_deref(),
        Some("Standing offer for commercial and procurement advice.")
    );
    assert_eq!(stored[0].url, "https://tenders.example.gov.au/t/1001");

    Ok(())
}

#[tokio::test]
async fn test_later_pass_persists_only_added_rows() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listing = write_fixture(dir.path(), "a.html", LISTING_A);

    let store = create_test_store().await?;
    let pipeline = build_pipeline(&get_test_config(), vec![html_file_source("a", &listing)], store.clone());
    let token = CancellationToken::new();

    let first = pipeline.run_pass(&token).await;
    assert_eq!(first.persisted, 3);

    let updated = LISTING_A.replace(
        "</ul>",
        r#"<li><span class="ref">QLD-1005</span><a class="title" href="https://tenders.example.gov.au/t/1005">Bridge inspection</a></li></ul>"#,
    );
    write_fixture(dir.path(), "a.html", &updated);

    let second = pipeline.run_pass(&token).await;
    assert_eq!(second.extracted, 4);
    assert_eq!(second.new, 1);
    assert_eq!(second.persisted, 1);
    assert_eq!(store.count().await?, 4);

    let third = pipeline.run_pass(&token).await;
    assert_eq!(third.new, 0);
    assert_eq!(third.persisted, 0);
    assert_eq!(store.count().await?, 4);

    Ok(())
}

#[tokio::test]
async fn test_json_feed_over_http() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tenders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "reference": "VT-88", "title": "Road resurfacing", "url": "/tenders/88", "closes": "2030-06-30" },
                { "reference": "VT-89", "title": "Library fit-out", "url": "/tenders/89" },
                { "reference": "VT-90", "url": "/tenders/90" }
            ]
        })))
        .mount(&server)
        .await;

    let store = create_test_store().await?;
    let source = json_http_source("vic", &format!("{}/api/tenders", server.uri()));
    let pipeline = build_pipeline(&get_test_config(), vec![source], store.clone());

    let result = pipeline.run_pass(&CancellationToken::new()).await;

    assert!(result.failures.is_empty());
    assert_eq!(result.extracted, 2);
    assert_eq!(result.malformed, 1);
    assert_eq!(result.persisted, 2);

    let stored = store.fetch_stored("vic").await?;
    assert_eq!(stored[0].external_id, "VT-88");
    assert_eq!(stored[0].url, format!("{}/tenders/88", server.uri()));

    Ok(())
}

#[tokio::test]
async fn test_transient_http_error_is_retried() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tenders"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tenders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "reference": "VT-1", "title": "Waste collection", "url": "/tenders/1" }]
        })))
        .mount(&server)
        .await;

    let store = create_test_store().await?;
    let source = json_http_source("vic", &format!("{}/api/tenders", server.uri()));
    let pipeline = build_pipeline(&get_test_config(), vec![source], store);

    let result = pipeline.run_pass(&CancellationToken::new()).await;

    assert!(result.failures.is_empty());
    assert_eq!(result.persisted, 1);

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_not_found_fails_source_without_retry() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = create_test_store().await?;
    let source = json_http_source("gone", &format!("{}/api/tenders", server.uri()));
    let pipeline = build_pipeline(&get_test_config(), vec![source], store);

    let result = pipeline.run_pass(&CancellationToken::new()).await;

    assert_eq!(result.failed_sources(), vec!["gone"]);
    assert!(result.is_failure(FailurePolicy::AllSources));
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_keywords_narrow_what_is_stored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listing = write_fixture(dir.path(), "a.html", LISTING_A);

    let store = create_test_store().await?;
    let pipeline = build_pipeline(&get_test_config(), vec![html_file_source("a", &listing)], store.clone())
        .with_relevance(RelevanceFilter::new(&["software".to_string(), "transport".to_string()]));

    let result = pipeline.run_pass(&CancellationToken::new()).await;

    // Matches on title for 1003 and on buyer for 1001.
    assert_eq!(result.irrelevant, 1);
    assert_eq!(result.persisted, 2);
    assert!(store.fetch_stored("a").await?.iter().all(|r| r.external_id != "QLD-1002"));

    Ok(())
}

#[tokio::test]
async fn test_cancelled_pass_attempts_no_sources() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listing = write_fixture(dir.path(), "a.html", LISTING_A);

    let store = create_test_store().await?;
    let pipeline = build_pipeline(&get_test_config(), vec![html_file_source("a", &listing)], store.clone());

    let token = CancellationToken::new();
    token.cancel();
    let result = pipeline.run_pass(&token).await;

    assert!(result.interrupted);
    assert_eq!(result.sources_attempted, 0);
    assert_eq!(store.count().await?, 0);

    Ok(())
}

/// Stores the first record of each batch, then drops the connection.
struct LosingStore;

#[async_trait]
impl TenderStore for LosingStore {
    async fn persist(&self, records: &[TenderRecord]) -> PersistResult {
        PersistResult {
            inserted: records.iter().take(1).map(TenderRecord::key).collect(),
            failed: vec![PersistError::ConnectionLost("gone".to_string())],
            skipped: records.len().saturating_sub(2),
            connection_lost: true,
            ..Default::default()
        }
    }

    async fn load_known_keys(&self, _source: &str) -> Result<KnownKeySet, PersistError> {
        Ok(KnownKeySet::new())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_lost_connection_fails_each_source_at_persist() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = write_fixture(dir.path(), "a.html", LISTING_A);
    let b = write_fixture(dir.path(), "b.html", LISTING_A);

    let pipeline = build_pipeline(
        &get_test_config(),
        vec![html_file_source("a", &a), html_file_source("b", &b)],
        Arc::new(LosingStore),
    );

    let result = pipeline.run_pass(&CancellationToken::new()).await;

    assert_eq!(result.sources_attempted, 2);
    assert!(result.persistence_failed);
    assert_eq!(result.failed_sources(), vec!["a", "b"]);
    for failure in &result.failures {
        assert_eq!(failure.stage, FailureStage::Persist);
        assert_eq!(failure.message, "connection lost: gone (1 records not attempted)");
    }

    // The record written before the connection dropped still counts.
    assert_eq!(result.new, 6);
    assert_eq!(result.persisted, 2);
    assert!(result.is_failure(FailurePolicy::AllSources));

    Ok(())
}
