use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::models::{FailurePolicy, PassResult};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Once,
    Loop(Duration),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub completed_passes: u64,
    pub failed_passes: u64,
    pub interrupted_passes: u64,
    pub total_persisted: u64,
    pub average_pass_time_ms: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_pass_at: Option<DateTime<Utc>>,
}

/// Drives the pipeline once or on a fixed interval until cancelled.
pub struct PassScheduler {
    pipeline: Pipeline,
    mode: RunMode,
    fail_on: FailurePolicy,
    state: watch::Sender<SchedulerState>,
    stats: Mutex<SchedulerStats>,
}

impl PassScheduler {
    pub fn new(pipeline: Pipeline, mode: RunMode, fail_on: FailurePolicy) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            pipeline,
            mode,
            fail_on,
            state,
            stats: Mutex::new(SchedulerStats::default()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn transition(&self, next: SchedulerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "Scheduler state change");
        }
    }

    /// Run until the mode is satisfied or `shutdown` fires. Returns the last
    /// pass, if any ran.
    pub async fn run(&self, shutdown: CancellationToken) -> Option<PassResult> {
        let mut last = None;
        if let Ok(mut stats) = self.stats.lock() {
            stats.started_at = Some(Utc::now());
        }

        tracing::info!(mode = ?self.mode, sources = self.pipeline.sources().len(), "Scheduler started");

        while !shutdown.is_cancelled() {
            self.transition(SchedulerState::Running);
            let result = self.pipeline.run_pass(&shutdown).await;
            self.update_stats(&result);
            last = Some(result);

            let RunMode::Loop(interval) = self.mode else {
                break;
            };
            if shutdown.is_cancelled() {
                break;
            }

            self.transition(SchedulerState::Sleeping);
            tracing::info!(next_pass_in_secs = interval.as_secs(), "Sleeping until next pass");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Stop requested while sleeping");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.transition(SchedulerState::Stopped);
        tracing::info!(passes = self.stats().completed_passes, "Scheduler stopped");
        last
    }

    fn update_stats(&self, result: &PassResult) {
        let Ok(mut stats) = self.stats.lock() else {
            return;
        };

        let n = stats.completed_passes as f64;
        stats.average_pass_time_ms = (stats.average_pass_time_ms * n + result.duration_ms() as f64) / (n + 1.0);
        stats.completed_passes += 1;
        stats.total_persisted += result.persisted as u64;
        stats.last_pass_at = result.finished_at;
        if result.is_failure(self.fail_on) {
            stats.failed_passes += 1;
        }
        if result.interrupted {
            stats.interrupted_passes += 1;
        }
    }

    /// Whether the process should exit successfully after `run` returned `last`.
    ///
    /// A loop that was stopped is a clean exit; a one-shot run fails when its
    /// pass is a failure under the configured policy.
    pub fn is_success(&self, last: Option<&PassResult>) -> bool {
        match self.mode {
            RunMode::Loop(_) => true,
            RunMode::Once => last.is_none_or(|result| !result.is_failure(self.fail_on)),
        }
    }
}
