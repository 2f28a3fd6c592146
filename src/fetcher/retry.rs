use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{error, warn};

use super::{PageFetcher, RawContent};
use crate::config::ScraperConfig;
use crate::models::SourceConfig;
use crate::utils::error::FetchError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Default whole-attempt timeout; sources may override it.
    pub attempt_timeout_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            retries: config.retry_attempts,
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            attempt_timeout_secs: config.request_timeout,
        }
    }

    /// base, 2*base, 4*base ... capped at `max_delay`, each with up to 25% jitter added.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base_ms = (self.base_delay.as_millis() as u64).max(2);
        let max_delay = self.max_delay;
        ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .max_delay(max_delay)
            .map(move |d| (d + jitter(d / 4)).min(max_delay + max_delay / 4))
            .take(self.retries as usize)
    }
}

/// Fetch with a whole-attempt timeout and bounded exponential backoff.
///
/// Only retryable errors are retried; a terminal error or exhausting the
/// retries returns the last error.
pub async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    source: &SourceConfig,
    policy: &RetryPolicy,
) -> Result<RawContent, FetchError> {
    let attempt_timeout = source.attempt_timeout(policy.attempt_timeout_secs);
    let attempts = AtomicU32::new(0);
    let max_attempts = policy.retries + 1;

    let action = || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        async move {
            let result = match tokio::time::timeout(attempt_timeout, fetcher.fetch(source)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(attempt_timeout)),
            };
            result.inspect_err(|e| {
                if e.is_retryable() && attempt < max_attempts {
                    warn!(
                        source = %source.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Fetch attempt failed, retrying"
                    );
                }
            })
        }
    };

    let result = RetryIf::spawn(policy.delays(), action, |e: &FetchError| e.is_retryable()).await;

    if let Err(e) = &result {
        error!(
            source = %source.name,
            attempts = attempts.load(Ordering::Relaxed),
            error = %e,
            "Fetch failed"
        );
    }
    metrics::counter!("tenderbot_fetch_attempts_total", "source" => source.name.clone())
        .increment(u64::from(attempts.load(Ordering::Relaxed)));

    result
}
