pub mod browser;
pub mod file;
pub mod http;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FetchMode, SourceConfig};
use crate::utils::error::FetchError;

pub use browser::{BrowserFetcher, BrowserOptions, BrowserSession};
pub use file::FileFetcher;
pub use http::HttpFetcher;
pub use retry::{fetch_with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Html,
    Json,
}

/// Raw page bodies captured for one source, one entry per page visited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawContent {
    pub source: String,
    /// Final URL after redirects; base for resolving relative links.
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub kind: ContentKind,
    pub pages: Vec<String>,
}

impl RawContent {
    pub fn single(source: &SourceConfig, url: impl Into<String>, kind: ContentKind, body: String) -> Self {
        Self {
            source: source.name.clone(),
            url: url.into(),
            fetched_at: Utc::now(),
            kind,
            pages: vec![body],
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.pages.iter().map(String::len).sum()
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> Result<RawContent, FetchError>;
}

/// Dispatches on the source's fetch mode.
pub struct RoutingFetcher {
    browser: BrowserFetcher,
    http: HttpFetcher,
    file: FileFetcher,
}

impl RoutingFetcher {
    pub fn new(browser: BrowserFetcher, http: HttpFetcher, file: FileFetcher) -> Self {
        Self { browser, http, file }
    }
}

#[async_trait]
impl PageFetcher for RoutingFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<RawContent, FetchError> {
        match source.fetch {
            FetchMode::Browser => self.browser.fetch(source).await,
            FetchMode::Http => self.http.fetch(source).await,
            FetchMode::File => self.file.fetch(source).await,
        }
    }
}

/// Guess the body type from a content type header or a file extension.
pub(crate) fn kind_from_hint(hint: &str) -> ContentKind {
    if hint.to_ascii_lowercase().contains("json") {
        ContentKind::Json
    } else {
        ContentKind::Html
    }
}
