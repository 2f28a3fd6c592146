// Integration tests for TenderBot
// These tests drive the real fetchers, extractor and SQLite store together

pub mod config_tests;
pub mod pipeline_tests;
pub mod scheduler_tests;
pub mod store_tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tenderbot::{
    AppConfig, Pipeline,
    config::{
        DatabaseConfig, LoggingConfig, MetricsConfig, NotificationsConfig, RelevanceConfig, SchedulerConfig,
        ScraperConfig,
    },
    fetcher::{BrowserFetcher, BrowserOptions, FileFetcher, HttpFetcher, RetryPolicy, RoutingFetcher},
    models::{FailurePolicy, SourceConfig},
    store::{SqliteStore, TenderStore},
};

/// Test configuration for integration tests
pub fn get_test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout: 5,
        },
        scraper: ScraperConfig {
            retry_attempts: 1,
            retry_delay_ms: 10,
            retry_max_delay_ms: 50,
            request_timeout: 5,
            step_timeout: 5,
            user_agent: "TenderBot-Test/1.0".to_string(),
            chrome_path: None,
            headless: true,
            max_items_per_source: 50,
        },
        scheduler: SchedulerConfig {
            interval_secs: 3600,
            fail_on: FailurePolicy::AllSources,
        },
        relevance: RelevanceConfig::default(),
        notifications: NotificationsConfig::default(),
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
        sources: Vec::new(),
    }
}

/// Migrated in-memory store
pub async fn create_test_store() -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::in_memory().await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

pub fn write_fixture(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

/// File-backed HTML source using the `ul.listing` fixture layout.
pub fn html_file_source(name: &str, path: &Path) -> SourceConfig {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "url": path.to_string_lossy(),
        "fetch": "file",
        "extract": {
            "format": "html",
            "row": "ul.listing li",
            "title": "a.title",
            "link": "a.title",
            "id": "span.ref",
            "deadline": "time.closes",
            "buyer": "span.agency",
            "description": "p.summary"
        }
    }))
    .expect("valid source")
}

pub fn json_http_source(name: &str, url: &str) -> SourceConfig {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "url": url,
        "fetch": "http",
        "extract": {
            "format": "json",
            "items": "/results",
            "title": "/title",
            "link": "/url",
            "id": "/reference",
            "deadline": "/closes"
        }
    }))
    .expect("valid source")
}

/// Pipeline wired the same way the binary wires it.
pub fn build_pipeline(config: &AppConfig, sources: Vec<SourceConfig>, store: Arc<dyn TenderStore>) -> Pipeline {
    let fetcher = RoutingFetcher::new(
        BrowserFetcher::new(BrowserOptions::from_config(&config.scraper)),
        HttpFetcher::new(&config.scraper).expect("http client"),
        FileFetcher,
    );

    Pipeline::new(
        sources,
        Arc::new(fetcher),
        store,
        RetryPolicy::from_config(&config.scraper),
        config.scraper.max_items_per_source,
    )
}

/// Three valid rows and one without a title.
pub const LISTING_A: &str = r#"<html><body>
<ul class="listing">
  <li><span class="ref">QLD-1001</span><a class="title" href="https://tenders.example.gov.au/t/1001">Fleet vehicle leasing</a>
      <time class="closes" datetime="2030-02-01T14:00:00">1 Feb 2030 2:00pm</time><span class="agency">Department of Transport</span></li>
  <li><span class="ref">QLD-1002</span><a class="title" href="https://tenders.example.gov.au/t/1002">Legal services panel</a>
      <time class="closes">15/03/2030</time><span class="agency">Crown Law</span>
      <p class="summary">Standing offer for commercial and procurement advice.</p></li>
  <li><span class="ref">QLD-1003</span><a class="title" href="https://tenders.example.gov.au/t/1003">Cloud hosting and managed software</a>
      <span class="agency">Digital Services</span></li>
  <li><span class="ref">QLD-1004</span><a class="title" href="https://tenders.example.gov.au/t/1004"></a></li>
</ul>
</body></html>"#;
