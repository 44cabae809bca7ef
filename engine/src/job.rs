//! Per-job backup execution.
//!
//! `BackupEngine::execute` runs one job to a terminal outcome:
//! - Enumerate the source tree once and fix the progress totals
//! - For each file: check cancellation, check blocked processes, decide, copy, encrypt
//! - Publish one progress snapshot per file and one transfer record per copy
//!
//! Per-file failures never abort the run. They are published with a negative duration and
//! turn the final outcome into an error once every file has been processed.

use std::path::Path;
use std::time::Instant;

use chrono::Utc;

use crate::cancel::CancelToken;
use crate::config::EngineSettings;
use crate::encryption::EncryptionGateway;
use crate::fs_ops;
use crate::model::{
    BackupJob, BackupState, FileRecord, FileTransferRecord, JobFailure, ProgressSnapshot,
    RunOutcome, FAILED_DURATION_MS,
};
use crate::policy::should_copy;
use crate::process_guard::{ProcessGuard, ProcessTable, SystemProcessTable};
use crate::progress::EventSink;

/// What happened to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileResult {
    Copied,
    Skipped,
    Failed,
}

/// Executes backup jobs with a fixed set of collaborators.
///
/// The engine holds no per-run state, so one instance can execute several jobs at once
/// from different threads.
pub struct BackupEngine {
    blocked_processes: Vec<String>,
    process_table: Box<dyn ProcessTable>,
    encryption: Option<EncryptionGateway>,
}

impl BackupEngine {
    /// Engine using the OS process table and the external encryptor from `settings`.
    pub fn new(settings: &EngineSettings) -> Self {
        BackupEngine {
            blocked_processes: settings.normalized_blocked_processes(),
            process_table: Box::new(SystemProcessTable::new()),
            encryption: EncryptionGateway::from_settings(settings),
        }
    }

    /// Replace the process table consulted for blocked processes.
    pub fn with_process_table(mut self, table: Box<dyn ProcessTable>) -> Self {
        self.process_table = table;
        self
    }

    /// Replace the encryption gateway; `None` disables encryption.
    pub fn with_encryption(mut self, encryption: Option<EncryptionGateway>) -> Self {
        self.encryption = encryption;
        self
    }

    /// Run `job` until every file is processed, the token is cancelled, or a blocked
    /// process shows up.
    ///
    /// Cancellation is checked before each file; a copy or encryption already started runs
    /// to completion. The job's transient `state` and `progress_percent` are updated along
    /// the way.
    pub fn execute(
        &self,
        job: &mut BackupJob,
        cancel: &CancelToken,
        sink: &dyn EventSink,
    ) -> RunOutcome {
        let span = tracing::info_span!("backup_job", job = %job.name);
        let _enter = span.enter();

        job.state = BackupState::Active;
        job.progress_percent = 0;
        sink.publish_run_state(&job.name, BackupState::Active, None);
        tracing::info!(
            "Starting {} backup {:?} -> {:?}",
            job.backup_type,
            job.source_directory,
            job.target_directory
        );

        let files = match fs_ops::enumerate_files(&job.source_directory) {
            Ok(files) => files,
            Err(e) => {
                tracing::error!("Cannot read source tree: {}", e);
                job.state = BackupState::Error;
                sink.publish_run_state(&job.name, BackupState::Error, None);
                return RunOutcome::Error(JobFailure::SourceUnavailable(e));
            }
        };

        let mut progress = ProgressSnapshot {
            total_files: files.len(),
            total_bytes: files.iter().map(|f| f.size).sum(),
            ..ProgressSnapshot::default()
        };
        tracing::info!(
            "{} files, {} bytes to examine",
            progress.total_files,
            progress.total_bytes
        );

        let guard = ProcessGuard::new(&self.blocked_processes, self.process_table.as_ref());
        let mut failed = 0usize;
        let mut copied = 0usize;

        for file in &files {
            if cancel.is_cancelled() {
                tracing::info!(
                    "Cancelled after {}/{} files",
                    progress.files_processed,
                    progress.total_files
                );
                job.state = BackupState::Inactive;
                sink.publish_run_state(&job.name, BackupState::Inactive, Some(&progress));
                return RunOutcome::Cancelled { progress };
            }

            if let Err(blocked) = guard.assert_none_running() {
                tracing::warn!("{}; pausing job", blocked);
                job.state = BackupState::Paused;
                sink.publish_run_state(&job.name, BackupState::Paused, Some(&progress));
                return RunOutcome::BlockedProcess {
                    process_name: blocked.process_name,
                };
            }

            let target = fs_ops::target_path_for(&job.target_directory, file);
            match self.process_file(job, file, &target, sink) {
                FileResult::Copied => copied += 1,
                FileResult::Skipped => {}
                FileResult::Failed => failed += 1,
            }

            progress.files_processed += 1;
            progress.bytes_processed += file.size;
            progress.current_file_name = file
                .full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            progress.current_source_path = file.full_path.clone();
            progress.current_target_path = target;
            job.progress_percent = progress.percentage();
            sink.publish_progress(&job.name, &progress);
        }

        tracing::info!(
            "Finished: {} copied, {} skipped, {} failed",
            copied,
            progress.total_files - copied - failed,
            failed
        );

        if failed == 0 {
            job.state = BackupState::Inactive;
            sink.publish_run_state(&job.name, BackupState::Inactive, Some(&progress));
            RunOutcome::Completed
        } else {
            job.state = BackupState::Error;
            sink.publish_run_state(&job.name, BackupState::Error, Some(&progress));
            RunOutcome::Error(JobFailure::FileCopyFailures { failed })
        }
    }

    /// Decide, copy and encrypt one file, publishing its transfer record if a copy was
    /// attempted.
    fn process_file(
        &self,
        job: &BackupJob,
        file: &FileRecord,
        target: &Path,
        sink: &dyn EventSink,
    ) -> FileResult {
        let mut record = FileTransferRecord {
            job_name: job.name.clone(),
            source_path: file.full_path.clone(),
            target_path: target.to_path_buf(),
            file_size: file.size,
            copy_duration_ms: FAILED_DURATION_MS,
            encryption_duration_ms: 0.0,
            timestamp: Utc::now(),
        };

        if let Err(e) = fs_ops::ensure_parent_dir_exists(target) {
            tracing::warn!("{}", e);
            sink.publish_transfer(&record);
            return FileResult::Failed;
        }

        if !should_copy(job.backup_type, file, target) {
            tracing::debug!("Up to date, skipping {:?}", file.relative_path);
            return FileResult::Skipped;
        }

        let started = Instant::now();
        if let Err(e) = fs_ops::copy_file_with_metadata(&file.full_path, target) {
            tracing::warn!("Copy of {:?} failed: {}", file.relative_path, e);
            sink.publish_transfer(&record);
            return FileResult::Failed;
        }
        record.copy_duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(
            "Copied {:?} ({} bytes, {:.3} ms)",
            file.relative_path,
            file.size,
            record.copy_duration_ms
        );

        if let Some(encryption) = &self.encryption {
            if encryption.applies_to(&file.full_path) {
                record.encryption_duration_ms = match encryption.encrypt(target) {
                    Ok(ms) => ms,
                    Err(e) => {
                        tracing::warn!("{}", e);
                        FAILED_DURATION_MS
                    }
                };
            }
        }

        record.timestamp = Utc::now();
        sink.publish_transfer(&record);
        FileResult::Copied
    }
}
