//! Multi-job orchestration.
//!
//! A batch is an ordered list of jobs run either one after another or all at once, sharing
//! one cancellation token:
//! - Sequential: a stop request aborts the running job and no later job starts. A job whose
//!   source cannot be read stops the queue and later jobs report `NotStarted`; a job paused
//!   by a blocked process does not, the next job still runs.
//! - Parallel: one thread per job. Failures, blocks and cancellations stay local to the job
//!   they happen in; the batch percentage is the mean of the per-job percentages.
//!
//! Only one batch runs per orchestrator at a time.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::EngineSettings;
use crate::error::OrchestratorError;
use crate::job::BackupEngine;
use crate::model::{BackupJob, BackupState, FileTransferRecord, ProgressSnapshot, RunOutcome};
use crate::progress::EventSink;

/// How the jobs of a batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// Outcome of one job in a batch.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_name: String,
    pub outcome: RunOutcome,
}

/// Result of a batch; `outcomes` follows the order of the submitted jobs.
#[derive(Debug)]
pub struct BatchReport {
    pub id: Uuid,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<JobOutcome>,
}

impl BatchReport {
    pub fn outcome_for(&self, job_name: &str) -> Option<&RunOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.job_name == job_name)
            .map(|o| &o.outcome)
    }

    pub fn all_completed(&self) -> bool {
        self.outcomes.iter().all(|o| o.outcome.is_completed())
    }
}

/// Per-job percentages of the running batch.
struct BatchProgress {
    percents: Mutex<Vec<u8>>,
}

impl BatchProgress {
    fn new(jobs: usize) -> Self {
        BatchProgress {
            percents: Mutex::new(vec![0; jobs]),
        }
    }

    /// Record one job's percentage and publish the new mean.
    fn update(&self, index: usize, percent: u8, sink: &dyn EventSink) {
        let mut percents = self.percents.lock().unwrap_or_else(PoisonError::into_inner);
        percents[index] = percent;
        let total: usize = percents.iter().map(|&p| usize::from(p)).sum();
        let mean = (total / percents.len()) as u8;
        // Published under the lock so batch percentages reach the sink in order
        sink.publish_batch_progress(mean);
    }
}

/// Forwards one job's events and feeds its percentage into the batch mean.
struct JobSink<'a> {
    inner: &'a dyn EventSink,
    batch: &'a BatchProgress,
    index: usize,
}

impl EventSink for JobSink<'_> {
    fn publish_progress(&self, job_name: &str, progress: &ProgressSnapshot) {
        self.inner.publish_progress(job_name, progress);
        self.batch
            .update(self.index, progress.percentage(), self.inner);
    }

    fn publish_transfer(&self, record: &FileTransferRecord) {
        self.inner.publish_transfer(record);
    }

    fn publish_run_state(
        &self,
        job_name: &str,
        state: BackupState,
        progress: Option<&ProgressSnapshot>,
    ) {
        self.inner.publish_run_state(job_name, state, progress);
    }
}

/// Clears the active batch slot when a batch ends, even by panic.
struct ActiveBatch<'a> {
    slot: &'a Mutex<Option<CancelToken>>,
}

impl Drop for ActiveBatch<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Runs batches of backup jobs.
pub struct JobOrchestrator {
    engine: BackupEngine,
    active: Mutex<Option<CancelToken>>,
}

impl JobOrchestrator {
    pub fn new(engine: BackupEngine) -> Self {
        JobOrchestrator {
            engine,
            active: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(BackupEngine::new(settings))
    }

    /// Returns true while a batch is running.
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Cancel the running batch. Does nothing when no batch is running.
    pub fn request_stop(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cancel) = active.as_ref() {
            tracing::info!("Stop requested");
            cancel.cancel();
        }
    }

    /// Run `jobs` in `mode`, returning one outcome per job in submission order.
    ///
    /// # Errors
    /// Fails without running anything if another batch is in progress or two jobs share a
    /// name.
    pub fn run(
        &self,
        jobs: &mut [BackupJob],
        mode: ExecutionMode,
        cancel: &CancelToken,
        sink: &dyn EventSink,
    ) -> Result<BatchReport, OrchestratorError> {
        let mut seen = HashSet::new();
        if let Some(job) = jobs.iter().find(|job| !seen.insert(job.name.as_str())) {
            return Err(OrchestratorError::DuplicateJobName {
                name: job.name.clone(),
            });
        }

        let _active = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if active.is_some() {
                return Err(OrchestratorError::BatchInProgress);
            }
            *active = Some(cancel.clone());
            ActiveBatch { slot: &self.active }
        };

        let id = Uuid::new_v4();
        let span = tracing::info_span!("batch", id = %id);
        let _enter = span.enter();
        tracing::info!("Running {} job(s) in {:?} mode", jobs.len(), mode);

        let started_at = Utc::now();
        let batch = BatchProgress::new(jobs.len());
        let names: Vec<String> = jobs.iter().map(|job| job.name.clone()).collect();

        let outcomes = match mode {
            ExecutionMode::Sequential => self.run_sequential(jobs, cancel, &batch, sink),
            ExecutionMode::Parallel => self.run_parallel(jobs, cancel, &batch, sink, &span),
        };

        Ok(BatchReport {
            id,
            mode,
            started_at,
            finished_at: Utc::now(),
            outcomes: names
                .into_iter()
                .zip(outcomes)
                .map(|(job_name, outcome)| JobOutcome { job_name, outcome })
                .collect(),
        })
    }

    fn run_sequential(
        &self,
        jobs: &mut [BackupJob],
        cancel: &CancelToken,
        batch: &BatchProgress,
        sink: &dyn EventSink,
    ) -> Vec<RunOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        let mut stopped_by: Option<String> = None;

        for (index, job) in jobs.iter_mut().enumerate() {
            let outcome = match &stopped_by {
                Some(failed_job) => {
                    tracing::info!("Not starting {}: {} could not start", job.name, failed_job);
                    RunOutcome::NotStarted {
                        failed_job: failed_job.clone(),
                    }
                }
                None => self.run_one(index, job, cancel, batch, sink),
            };
            if stopped_by.is_none() && outcome.stops_queue() {
                stopped_by = Some(job.name.clone());
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    fn run_parallel(
        &self,
        jobs: &mut [BackupJob],
        cancel: &CancelToken,
        batch: &BatchProgress,
        sink: &dyn EventSink,
        span: &tracing::Span,
    ) -> Vec<RunOutcome> {
        thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter_mut()
                .enumerate()
                .map(|(index, job)| {
                    let span = span.clone();
                    scope.spawn(move || {
                        let _enter = span.enter();
                        self.run_one(index, job, cancel, batch, sink)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect()
        })
    }

    fn run_one(
        &self,
        index: usize,
        job: &mut BackupJob,
        cancel: &CancelToken,
        batch: &BatchProgress,
        sink: &dyn EventSink,
    ) -> RunOutcome {
        if cancel.is_cancelled() {
            tracing::info!("Not starting {}: stop requested", job.name);
            return RunOutcome::Cancelled {
                progress: ProgressSnapshot::default(),
            };
        }

        let job_sink = JobSink {
            inner: sink,
            batch,
            index,
        };
        let outcome = self.engine.execute(job, cancel, &job_sink);
        if outcome.is_completed() {
            // A finished job counts as done even when it had no files to report
            batch.update(index, 100, sink);
        }
        tracing::info!("Job {} finished: {}", job.name, outcome);
        outcome
    }
}
