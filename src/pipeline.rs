use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::dedup::filter_new;
use crate::extractor::extract;
use crate::fetcher::{fetch_with_retry, PageFetcher, RetryPolicy};
use crate::models::{FailureStage, PassResult, SourceConfig, SourceOutcome, TenderRecord};
use crate::notify::Notifier;
use crate::relevance::RelevanceFilter;
use crate::store::TenderStore;

/// One fetch → extract → dedup → persist run over the configured sources.
pub struct Pipeline {
    sources: Vec<SourceConfig>,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn TenderStore>,
    notifiers: Vec<Arc<dyn Notifier>>,
    relevance: RelevanceFilter,
    retry: RetryPolicy,
    max_items_per_source: usize,
}

impl Pipeline {
    pub fn new(
        sources: Vec<SourceConfig>,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn TenderStore>,
        retry: RetryPolicy,
        max_items_per_source: usize,
    ) -> Self {
        Self {
            sources,
            fetcher,
            store,
            notifiers: Vec::new(),
            relevance: RelevanceFilter::default(),
            retry,
            max_items_per_source,
        }
    }

    /// Add a delivery channel; every channel sees every announcement.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_relevance(mut self, relevance: RelevanceFilter) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Run every source in order. Failures are recorded per source and never
    /// abort the pass; a shutdown request is honoured between sources.
    pub async fn run_pass(&self, shutdown: &CancellationToken) -> PassResult {
        let mut result = PassResult::start();
        info!(
            pass_id = %result.pass_id,
            sources = self.sources.len(),
            keyword_filter = self.relevance.is_active(),
            notifiers = self.notifiers.len(),
            "Starting pass"
        );

        for source in &self.sources {
            if shutdown.is_cancelled() {
                warn!(pass_id = %result.pass_id, next = %source.name, "Shutdown requested, ending pass early");
                result.interrupted = true;
                break;
            }

            let span = info_span!("source", source = %source.name);
            let outcome = self.run_source(source).instrument(span).await;
            result.record(outcome);
        }

        result.finish();
        log_pass(&result);
        record_pass_metrics(&result);
        result
    }

    pub async fn run_source(&self, source: &SourceConfig) -> SourceOutcome {
        let mut outcome = SourceOutcome::new(&source.name);

        // Known keys are read fresh for every pass.
        let known = match self.store.load_known_keys(&source.name).await {
            Ok(known) => known,
            Err(e) => {
                error!(error = %e, "Could not load known keys");
                outcome.fail(FailureStage::LoadKnownKeys, e.to_string());
                return finish_source(outcome);
            }
        };

        let raw = match fetch_with_retry(self.fetcher.as_ref(), source, &self.retry).await {
            Ok(raw) => raw,
            Err(e) => {
                outcome.fail(FailureStage::Fetch, e.to_string());
                return finish_source(outcome);
            }
        };
        outcome.pages = raw.pages.len();

        let mut extraction = match extract(&raw, source) {
            Ok(extraction) => extraction,
            Err(e) => {
                error!(error = %e, "Extraction failed");
                outcome.fail(FailureStage::Extract, e.to_string());
                return finish_source(outcome);
            }
        };
        extraction.cap(source.item_limit(self.max_items_per_source));

        outcome.extracted = extraction.records.len();
        outcome.malformed = extraction.errors.len();
        outcome.truncated = extraction.truncated;
        outcome.errors.extend(
            extraction
                .errors
                .iter()
                .map(|e| format!("{}: {}", source.name, e)),
        );

        let (relevant, irrelevant) = self.relevance.apply(extraction.records);
        outcome.irrelevant = irrelevant;

        let new = filter_new(relevant, &known);
        outcome.new = new.len();

        if new.is_empty() {
            return finish_source(outcome);
        }

        let persisted = self.store.persist(&new).await;
        outcome.persisted = persisted.inserted_count();
        outcome.duplicates = persisted.duplicates;

        if !persisted.is_clean() {
            warn!(
                failed = persisted.failed.len(),
                skipped = persisted.skipped,
                "Some new records were not stored"
            );
        }

        if persisted.connection_lost {
            let message = persisted
                .failed
                .last()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "connection lost".to_string());
            outcome.fail(
                FailureStage::Persist,
                format!("{} ({} records not attempted)", message, persisted.skipped),
            );
        } else {
            outcome
                .errors
                .extend(persisted.failed.iter().map(|e| format!("{}: {}", source.name, e)));
        }

        let stored: Vec<TenderRecord> = new
            .into_iter()
            .filter(|r| persisted.inserted.contains(&r.key()))
            .collect();
        outcome.notified = self.announce(&source.name, &stored).await;

        finish_source(outcome)
    }

    /// Hand freshly stored records to every notifier. Returns how many
    /// records reached at least one channel.
    async fn announce(&self, source: &str, records: &[TenderRecord]) -> usize {
        if records.is_empty() {
            return 0;
        }

        let mut delivered = false;
        for notifier in &self.notifiers {
            match notifier.notify(source, records).await {
                Ok(()) => {
                    debug!(notifier = notifier.name(), records = records.len(), "Notification sent");
                    delivered = true;
                }
                Err(e) => warn!(notifier = notifier.name(), error = %e, "Notification failed"),
            }
        }

        if delivered { records.len() } else { 0 }
    }
}

fn finish_source(outcome: SourceOutcome) -> SourceOutcome {
    let source = outcome.source.clone();
    metrics::counter!("tenderbot_records_extracted_total", "source" => source.clone())
        .increment(outcome.extracted as u64);
    metrics::counter!("tenderbot_records_malformed_total", "source" => source.clone())
        .increment(outcome.malformed as u64);
    metrics::counter!("tenderbot_records_persisted_total", "source" => source)
        .increment(outcome.persisted as u64);

    match &outcome.failure {
        Some(failure) => {
            metrics::counter!(
                "tenderbot_source_failures_total",
                "source" => failure.source.clone(),
                "stage" => failure.stage.to_string()
            )
            .increment(1);
            error!(stage = %failure.stage, error = %failure.message, "Source failed");
        }
        None => info!(
            pages = outcome.pages,
            extracted = outcome.extracted,
            malformed = outcome.malformed,
            truncated = outcome.truncated,
            irrelevant = outcome.irrelevant,
            new = outcome.new,
            persisted = outcome.persisted,
            duplicates = outcome.duplicates,
            "Source complete"
        ),
    }
    outcome
}

fn log_pass(result: &PassResult) {
    info!(
        pass_id = %result.pass_id,
        duration_ms = result.duration_ms(),
        sources = result.sources_attempted,
        succeeded = result.succeeded_sources(),
        failed = ?result.failed_sources(),
        extracted = result.extracted,
        malformed = result.malformed,
        truncated = result.truncated,
        irrelevant = result.irrelevant,
        new = result.new,
        persisted = result.persisted,
        duplicates = result.duplicates,
        notified = result.notified,
        interrupted = result.interrupted,
        "Pass complete"
    );

    if result.persistence_failed {
        error!(pass_id = %result.pass_id, "Pass hit persistence failures");
    }
}

fn record_pass_metrics(result: &PassResult) {
    metrics::counter!("tenderbot_passes_total").increment(1);
    metrics::gauge!("tenderbot_last_pass_duration_ms").set(result.duration_ms() as f64);
    metrics::gauge!("tenderbot_last_pass_failed_sources").set(result.failures.len() as f64);
    metrics::gauge!("tenderbot_last_pass_persisted").set(result.persisted as f64);
}
