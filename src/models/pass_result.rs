use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where in the pipeline a source gave up for this pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Extract,
    LoadKnownKeys,
    Persist,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStage::Fetch => "fetch",
            FailureStage::Extract => "extract",
            FailureStage::LoadKnownKeys => "load_known_keys",
            FailureStage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub stage: FailureStage,
    pub message: String,
}

/// When a one-shot run should exit non-zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Only when every attempted source failed.
    #[default]
    AllSources,
    /// As soon as one source failed.
    AnySource,
}

/// What happened to one source during a pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceOutcome {
    pub source: String,
    pub pages: usize,
    pub extracted: usize,
    pub malformed: usize,
    /// Records dropped by the per-source item cap.
    pub truncated: usize,
    pub irrelevant: usize,
    pub new: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub notified: usize,
    pub errors: Vec<String>,
    pub failure: Option<SourceFailure>,
}

impl SourceOutcome {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn fail(&mut self, stage: FailureStage, message: impl Into<String>) {
        self.failure = Some(SourceFailure {
            source: self.source.clone(),
            stage,
            message: message.into(),
        });
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Summary of one pipeline execution across all sources. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassResult {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sources_attempted: usize,
    pub extracted: usize,
    pub malformed: usize,
    pub truncated: usize,
    pub irrelevant: usize,
    pub new: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub notified: usize,
    pub failures: Vec<SourceFailure>,
    pub errors: Vec<String>,
    pub persistence_failed: bool,
    pub interrupted: bool,
    pub outcomes: Vec<SourceOutcome>,
}

impl PassResult {
    pub fn start() -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            sources_attempted: 0,
            extracted: 0,
            malformed: 0,
            truncated: 0,
            irrelevant: 0,
            new: 0,
            persisted: 0,
            duplicates: 0,
            notified: 0,
            failures: Vec::new(),
            errors: Vec::new(),
            persistence_failed: false,
            interrupted: false,
            outcomes: Vec::new(),
        }
    }

    /// Fold a finished source into the totals, keeping source-list order.
    pub fn record(&mut self, outcome: SourceOutcome) {
        self.sources_attempted += 1;
        self.extracted += outcome.extracted;
        self.malformed += outcome.malformed;
        self.truncated += outcome.truncated;
        self.irrelevant += outcome.irrelevant;
        self.new += outcome.new;
        self.persisted += outcome.persisted;
        self.duplicates += outcome.duplicates;
        self.notified += outcome.notified;
        self.errors.extend(outcome.errors.iter().cloned());

        if let Some(failure) = &outcome.failure {
            if failure.stage == FailureStage::Persist || failure.stage == FailureStage::LoadKnownKeys {
                self.persistence_failed = true;
            }
            self.errors.push(format!("{} [{}]: {}", failure.source, failure.stage, failure.message));
            self.failures.push(failure.clone());
        }

        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.source.as_str()).collect()
    }

    pub fn succeeded_sources(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failed()).count()
    }

    pub fn duration_ms(&self) -> i64 {
        self.finished_at
            .map(|end| end.signed_duration_since(self.started_at).num_milliseconds())
            .unwrap_or(0)
    }

    pub fn is_failure(&self, policy: FailurePolicy) -> bool {
        if self.sources_attempted == 0 {
            return false;
        }
        match policy {
            FailurePolicy::AllSources => self.failures.len() >= self.sources_attempted,
            FailurePolicy::AnySource => !self.failures.is_empty(),
        }
    }
}
