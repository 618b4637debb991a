//! Batch execution of satellite tasks
//!
//! Each satellite runs on the tokio blocking pool. A semaphore caps the
//! number running at once; completion is a join-all over a `JoinSet`.
//! A failing or panicking task is recorded in the [`BatchReport`] and never
//! stops its siblings.

use serde::Serialize;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::satellite::Satellite;
use crate::sink::SinkFactory;
use crate::task::{AnalysisContext, RunSummary, SatelliteTask};
use crate::{AnalyzerError, Result};

// ============================================================================
// Cancellation
// ============================================================================

/// Observed by tasks once per time step.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx: Some(rx) })
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(RunSummary),
    /// Configuration was incomplete; nothing written
    Refused(String),
    Failed(String),
    Cancelled,
    Panicked(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    /// Outcome of a satellite stopped by `err`
    pub fn from_error(err: &AnalyzerError) -> Self {
        match err {
            AnalyzerError::Cancelled => TaskOutcome::Cancelled,
            AnalyzerError::Configuration(_) | AnalyzerError::Station(_) => TaskOutcome::Refused(err.to_string()),
            _ => TaskOutcome::Failed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchEntry {
    pub satellite: String,
    pub outcome: TaskOutcome,
}

/// Per-satellite outcomes, ordered by satellite id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    entries: Vec<BatchEntry>,
}

impl BatchReport {
    fn from_entries(mut entries: Vec<BatchEntry>) -> Self {
        entries.sort_by(|a, b| a.satellite.cmp(&b.satellite));
        Self { entries }
    }

    /// Add entries for satellites that never reached the scheduler
    pub fn merge(self, extra: impl IntoIterator<Item = BatchEntry>) -> Self {
        let mut entries = self.entries;
        entries.extend(extra);
        Self::from_entries(entries)
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn get(&self, satellite_id: &str) -> Option<&TaskOutcome> {
        self.entries
            .iter()
            .find(|e| e.satellite == satellite_id)
            .map(|e| &e.outcome)
    }

    pub fn failures(&self) -> Vec<&BatchEntry> {
        self.entries.iter().filter(|e| !e.outcome.is_success()).collect()
    }

    pub fn completed(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_success())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    workers: usize,
}

impl Default for BatchScheduler {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(workers)
    }
}

impl BatchScheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Blocking entry point: builds a multi-thread runtime and joins every task.
    pub fn run<F>(
        &self,
        satellites: Vec<Satellite>,
        ctx: Arc<AnalysisContext>,
        factory: Arc<F>,
        cancel: CancelToken,
    ) -> Result<BatchReport>
    where
        F: SinkFactory + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(AnalyzerError::Io)?;
        Ok(runtime.block_on(self.execute(satellites, ctx, factory, cancel)))
    }

    /// Run one [`SatelliteTask`] per satellite, at most `workers` at a time.
    pub async fn execute<F>(
        &self,
        satellites: Vec<Satellite>,
        ctx: Arc<AnalysisContext>,
        factory: Arc<F>,
        cancel: CancelToken,
    ) -> BatchReport
    where
        F: SinkFactory + 'static,
    {
        info!(
            "Scheduling {} satellite(s) on {} worker(s)",
            satellites.len(),
            self.workers
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();
        let mut pending = BTreeSet::new();
        let mut entries = Vec::with_capacity(satellites.len());

        for satellite in satellites {
            if cancel.is_cancelled() {
                entries.push(BatchEntry {
                    satellite: satellite.id.clone(),
                    outcome: TaskOutcome::Cancelled,
                });
                continue;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker pool closed: {}", e);
                    entries.push(BatchEntry {
                        satellite: satellite.id.clone(),
                        outcome: TaskOutcome::Failed(e.to_string()),
                    });
                    continue;
                },
            };

            let id = satellite.id.clone();
            pending.insert(id.clone());
            let ctx = ctx.clone();
            let factory = factory.clone();
            let cancel = cancel.clone();
            set.spawn_blocking(move || {
                let _permit = permit;
                let task = SatelliteTask::new(satellite);
                let result = panic::catch_unwind(AssertUnwindSafe(|| task.run(&ctx, factory.as_ref(), &cancel)));
                (id, outcome_of(result))
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((satellite, outcome)) => {
                    log_outcome(&satellite, &outcome);
                    pending.remove(&satellite);
                    entries.push(BatchEntry { satellite, outcome });
                },
                Err(e) => error!("Worker join failed: {}", e),
            }
        }
        // only reachable if the runtime dropped a task
        for satellite in pending {
            entries.push(BatchEntry {
                satellite,
                outcome: TaskOutcome::Failed("worker lost".into()),
            });
        }

        let report = BatchReport::from_entries(entries);
        info!(
            "Batch finished: {} completed, {} not completed",
            report.completed(),
            report.failures().len()
        );
        report
    }
}

fn outcome_of(result: std::thread::Result<Result<RunSummary>>) -> TaskOutcome {
    match result {
        Ok(Ok(summary)) => TaskOutcome::Completed(summary),
        Ok(Err(e)) => TaskOutcome::from_error(&e),
        Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_outcome(satellite: &str, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Completed(summary) => info!(
            satellite = %satellite,
            "Completed: {} samples, {} window(s)",
            summary.samples,
            summary.total_windows()
        ),
        TaskOutcome::Refused(reason) => warn!(satellite = %satellite, "Refused: {}", reason),
        TaskOutcome::Failed(reason) => error!(satellite = %satellite, "Failed: {}", reason),
        TaskOutcome::Cancelled => info!(satellite = %satellite, "Cancelled"),
        TaskOutcome::Panicked(reason) => error!(satellite = %satellite, "Panicked: {}", reason),
    }
}
