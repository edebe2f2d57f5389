//! Retry orchestration.
//!
//! A single coordinator owns the work queue and the [`RetryLedger`]. Workers
//! only ever see one job and hand back one result; every state transition
//! (requeue, permanent failure, success) happens here.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::browser::SessionProvider;
use crate::extractor::Extract;
use crate::models::{ExtractionResult, FailureReason, HarvestJob, Record};

/// Failure counts per external id for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryLedger {
    failures: HashMap<String, u32>,
}

impl RetryLedger {
    /// Increments and returns the failure count for `external_id`.
    pub fn record_failure(&mut self, external_id: &str) -> u32 {
        let count = self.failures.entry(external_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failures(&self, external_id: &str) -> u32 {
        self.failures.get(external_id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.failures.iter().map(|(id, count)| (id.as_str(), *count))
    }
}

/// Whole-run cancellation. Cheap to clone; raising it is permanent.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn raise(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the signal is raised.
    pub async fn raised(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|raised| *raised).await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Serial,
    Concurrent { workers: usize },
}

#[derive(Debug, Clone)]
pub struct OrchestratorParams {
    pub dispatch: DispatchMode,
    /// Attempts a job gets before it is dropped as permanently failed.
    pub retry_ceiling: u32,
    /// Delay between consecutive job dispatches.
    pub pacing_delay: Duration,
    /// Delay before each retry pass.
    pub pass_delay: Duration,
}

impl OrchestratorParams {
    fn workers(&self) -> usize {
        match self.dispatch {
            DispatchMode::Serial => 1,
            DispatchMode::Concurrent { workers } => workers.max(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct HarvestReport {
    /// Rows of every succeeded job, each job exactly once.
    pub records: Vec<Record>,
    pub succeeded: Vec<String>,
    pub permanently_failed: Vec<HarvestJob>,
    /// Jobs never dispatched because the run was aborted.
    pub aborted: Vec<HarvestJob>,
    pub ledger: RetryLedger,
    pub passes: usize,
}

impl HarvestReport {
    pub fn was_aborted(&self) -> bool {
        !self.aborted.is_empty()
    }
}

struct PassResult {
    results: Vec<(HarvestJob, ExtractionResult)>,
    /// Jobs left undispatched by an abort.
    undispatched: Vec<HarvestJob>,
    /// A sweep ran after the last job of the pass finished.
    swept_last: bool,
}

pub struct Orchestrator {
    extractor: Arc<dyn Extract>,
    provider: Arc<dyn SessionProvider>,
}

impl Orchestrator {
    pub fn new(extractor: Arc<dyn Extract>, provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            extractor,
            provider,
        }
    }

    /// Drives `jobs` to completion: every job ends up succeeded, permanently
    /// failed, or (after an abort) in `aborted`. Job failures never make this
    /// return early.
    pub async fn run(
        &self,
        jobs: Vec<HarvestJob>,
        params: &OrchestratorParams,
        abort: &AbortSignal,
    ) -> HarvestReport {
        let mut queue: VecDeque<HarvestJob> = jobs.into();
        let mut report = HarvestReport::default();

        while !queue.is_empty() {
            if report.passes > 0 && !params.pass_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(params.pass_delay) => {}
                    _ = abort.raised() => {}
                }
            }
            if abort.is_raised() {
                warn!("Run aborted with {} jobs pending", queue.len());
                report.aborted.extend(queue.drain(..));
                break;
            }

            report.passes += 1;
            info!("Pass {}: dispatching {} jobs", report.passes, queue.len());

            let started = Instant::now();
            let batch: VecDeque<HarvestJob> = queue.drain(..).collect();
            let pass = self.run_pass(batch, params, abort).await;
            metrics::histogram!("harvest_pass_duration_seconds")
                .record(started.elapsed().as_secs_f64());
            report.aborted.extend(pass.undispatched);

            for (job, result) in pass.results {
                match result {
                    ExtractionResult::Rows(records) => {
                        debug!("Job {} succeeded with {} rows", job.external_id, records.len());
                        metrics::counter!("harvest_jobs_succeeded_total").increment(1);
                        report.records.extend(records);
                        report.succeeded.push(job.external_id);
                    }
                    ExtractionResult::Failed { job, reason } => {
                        if let Some(job) = Self::settle_failure(job, &reason, params, &mut report) {
                            queue.push_back(job);
                        }
                    }
                }
            }

            if matches!(params.dispatch, DispatchMode::Concurrent { .. }) && !pass.swept_last {
                self.sweep_orphans().await;
            }
        }

        info!(
            "Orchestration finished after {} passes: {} succeeded, {} permanently failed, {} aborted",
            report.passes,
            report.succeeded.len(),
            report.permanently_failed.len(),
            report.aborted.len()
        );
        report
    }

    /// Updates the ledger and returns the job if it should be retried.
    fn settle_failure(
        mut job: HarvestJob,
        reason: &FailureReason,
        params: &OrchestratorParams,
        report: &mut HarvestReport,
    ) -> Option<HarvestJob> {
        let failures = report.ledger.record_failure(&job.external_id);
        job.retry_count = failures;
        metrics::counter!("harvest_jobs_failed_total").increment(1);

        if failures < params.retry_ceiling {
            warn!(
                "Job {} failed (attempt {}/{}): {}; requeued",
                job.external_id, failures, params.retry_ceiling, reason
            );
            Some(job)
        } else {
            error!(
                "Job {} permanently failed after {} attempts: {}",
                job.external_id, failures, reason
            );
            metrics::counter!("harvest_jobs_permanently_failed_total").increment(1);
            report.permanently_failed.push(job);
            None
        }
    }

    /// One pass over `batch` with at most `workers` jobs in flight. A failure
    /// that warrants a sweep pauses dispatch until in-flight jobs finish and
    /// the sweep has run.
    async fn run_pass(
        &self,
        mut pending: VecDeque<HarvestJob>,
        params: &OrchestratorParams,
        abort: &AbortSignal,
    ) -> PassResult {
        let workers = params.workers();
        let mut in_flight: JoinSet<(HarvestJob, ExtractionResult)> = JoinSet::new();
        let mut dispatched: HashMap<tokio::task::Id, HarvestJob> = HashMap::new();
        let mut results = Vec::new();
        let mut dispatch_count = 0usize;
        let mut sweep_pending = false;
        let mut swept_last = false;

        loop {
            if sweep_pending && in_flight.is_empty() {
                self.sweep_orphans().await;
                sweep_pending = false;
                swept_last = true;
            }

            while !sweep_pending && in_flight.len() < workers && !abort.is_raised() {
                let Some(job) = pending.pop_front() else {
                    break;
                };
                if dispatch_count > 0 && !params.pacing_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(params.pacing_delay) => {}
                        _ = abort.raised() => {}
                    }
                    if abort.is_raised() {
                        pending.push_front(job);
                        break;
                    }
                }
                dispatch_count += 1;

                let extractor = Arc::clone(&self.extractor);
                let task_job = job.clone();
                let handle = in_flight.spawn(async move {
                    let result = extractor.extract(&task_job).await;
                    (task_job, result)
                });
                dispatched.insert(handle.id(), job);
            }

            match in_flight.join_next_with_id().await {
                None => break,
                Some(Ok((id, (job, result)))) => {
                    dispatched.remove(&id);
                    if result.warrants_sweep() {
                        debug!("Job {} needs an orphan sweep; pausing dispatch", job.external_id);
                        sweep_pending = true;
                    }
                    swept_last = false;
                    results.push((job, result));
                }
                Some(Err(join_error)) => {
                    swept_last = false;
                    let Some(job) = dispatched.remove(&join_error.id()) else {
                        error!("Lost track of a worker task: {}", join_error);
                        continue;
                    };
                    let detail = panic_message(join_error);
                    error!("Worker for {} died: {}", job.external_id, detail);
                    sweep_pending = true;
                    let reason = FailureReason::WorkerPanicked(detail);
                    results.push((job.clone(), ExtractionResult::failed(job, reason)));
                }
            }
        }

        PassResult {
            results,
            undispatched: pending.into_iter().collect(),
            swept_last,
        }
    }

    async fn sweep_orphans(&self) {
        match self.provider.terminate_orphans().await {
            Ok(0) => debug!("Orphan sweep found nothing"),
            Ok(count) => {
                warn!("Orphan sweep terminated {} processes", count);
                metrics::counter!("harvest_orphans_terminated_total").increment(count as u64);
            }
            Err(e) => warn!("Orphan sweep failed: {}", e),
        }
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    if join_error.is_cancelled() {
        return "worker task cancelled".to_string();
    }
    match join_error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "worker panicked".to_string()),
        Err(e) => e.to_string(),
    }
}
