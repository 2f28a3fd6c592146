use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::{kind_from_hint, PageFetcher, RawContent};
use crate::config::ScraperConfig;
use crate::models::SourceConfig;
use crate::utils::error::FetchError;

/// Plain GET for static listings and JSON feeds.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self, reqwest::Error> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .build()?;

        Ok(Self { client, timeout })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            return FetchError::Timeout(self.timeout);
        }

        let message = format!("{:#}", anyhow::Error::new(err));
        let lowered = message.to_lowercase();
        if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
            FetchError::Unreachable(message)
        } else if lowered.contains("builder error") || lowered.contains("relative url") {
            FetchError::InvalidResponse(message)
        } else {
            FetchError::Transient(message)
        }
    }
}

pub(crate) fn classify_status(status: StatusCode, url: &str) -> Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(FetchError::Transient(format!("{} returned {}", url, status)))
    } else {
        Err(FetchError::InvalidResponse(format!("{} returned {}", url, status)))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<RawContent, FetchError> {
        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        classify_status(response.status(), &source.url)?;

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        let body = response.text().await.map_err(|e| self.classify(e))?;

        debug!(source = %source.name, bytes = body.len(), %content_type, "HTTP fetch complete");
        Ok(RawContent::single(source, final_url, kind_from_hint(&content_type), body))
    }
}
