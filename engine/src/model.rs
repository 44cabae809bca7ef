//! Core data model for backup jobs.
//!
//! This module defines the main data structures for representing a backup run:
//! - BackupJob: one named (source, target, type) configuration
//! - FileRecord: a single file found in the source tree
//! - ProgressSnapshot, FileTransferRecord: value objects handed to the event sink
//! - BackupType, BackupState, RunOutcome: enums controlling and describing a run

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Duration reported for a copy or encryption step that failed.
pub const FAILED_DURATION_MS: f64 = -1.0;

/// A named backup configuration.
///
/// Jobs are owned by whoever manages job definitions. The engine borrows a job mutably for
/// the duration of one execution, which rules out two overlapping runs of the same job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    /// Unique, user-assigned name
    pub name: String,

    /// Root of the tree to back up
    pub source_directory: PathBuf,

    /// Root the tree is copied into
    pub target_directory: PathBuf,

    /// Full or differential copy
    pub backup_type: BackupType,

    /// Transient state for UI feedback
    #[serde(skip)]
    pub state: BackupState,

    /// Transient percentage for UI feedback
    #[serde(skip)]
    pub progress_percent: u8,
}

impl BackupJob {
    /// Create a new job in the Inactive state.
    ///
    /// # Errors
    /// Returns EngineError::InvalidJob if the name is empty or blank.
    pub fn new(
        name: impl Into<String>,
        source_directory: impl Into<PathBuf>,
        target_directory: impl Into<PathBuf>,
        backup_type: BackupType,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EngineError::InvalidJob {
                reason: "job name must not be empty".to_string(),
            });
        }
        Ok(BackupJob {
            name,
            source_directory: source_directory.into(),
            target_directory: target_directory.into(),
            backup_type,
            state: BackupState::Inactive,
            progress_percent: 0,
        })
    }
}

/// Backup policy for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    /// Copy every file unconditionally
    Full,
    /// Copy only files missing from the target or newer than their target copy
    Differential,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupType::Full => write!(f, "Full"),
            BackupType::Differential => write!(f, "Differential"),
        }
    }
}

/// The state of a job as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackupState {
    /// Not running (never run, finished, or stopped)
    #[default]
    Inactive,
    /// Currently executing
    Active,
    /// Finished with at least one failure, or could not start
    Error,
    /// Stopped because a blocked process was running
    Paused,
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupState::Inactive => write!(f, "Inactive"),
            BackupState::Active => write!(f, "Active"),
            BackupState::Error => write!(f, "Error"),
            BackupState::Paused => write!(f, "Paused"),
        }
    }
}

/// A file found while enumerating the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Full source path
    pub full_path: PathBuf,

    /// Path relative to the job's source directory
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modification time reported by the filesystem
    pub last_modified: SystemTime,
}

/// Progress of one job run, emitted after every file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total_files: usize,
    pub files_processed: usize,
    pub total_bytes: u64,
    pub bytes_processed: u64,
    pub current_file_name: String,
    pub current_source_path: PathBuf,
    pub current_target_path: PathBuf,
}

impl ProgressSnapshot {
    /// Percentage of files processed, truncated. An empty run reports 0.
    pub fn percentage(&self) -> u8 {
        if self.total_files == 0 {
            return 0;
        }
        let pct = (self.files_processed as u128 * 100) / self.total_files as u128;
        pct.min(100) as u8
    }

    /// Number of files not yet processed.
    pub fn files_remaining(&self) -> usize {
        self.total_files.saturating_sub(self.files_processed)
    }
}

/// One record per file that was actually copied (or whose copy was attempted and failed).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileTransferRecord {
    pub job_name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub file_size: u64,
    /// Milliseconds spent copying; FAILED_DURATION_MS if the copy failed
    pub copy_duration_ms: f64,
    /// Milliseconds reported by the encryptor; 0 if not encrypted, FAILED_DURATION_MS on failure
    pub encryption_duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl FileTransferRecord {
    pub fn copy_failed(&self) -> bool {
        self.copy_duration_ms < 0.0
    }

    pub fn encryption_failed(&self) -> bool {
        self.encryption_duration_ms < 0.0
    }
}

/// Why a job ended in the Error outcome.
#[derive(Debug)]
pub enum JobFailure {
    /// The job could not start (missing or unreadable source tree)
    SourceUnavailable(EngineError),
    /// Every file was processed but some copies failed
    FileCopyFailures { failed: usize },
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::SourceUnavailable(err) => write!(f, "{}", err),
            JobFailure::FileCopyFailures { failed } => {
                write!(f, "{} file(s) could not be copied", failed)
            }
        }
    }
}

/// Terminal result of one job execution.
#[derive(Debug)]
pub enum RunOutcome {
    /// All files processed without copy failures
    Completed,
    /// Stopped at a file boundary; carries the last emitted snapshot
    Cancelled { progress: ProgressSnapshot },
    /// A configured blocked process was found running
    BlockedProcess { process_name: String },
    /// The job failed to start or finished with failures
    Error(JobFailure),
    /// Never started because an earlier job of a sequential batch could not read its source
    NotStarted { failed_job: String },
}

impl RunOutcome {
    /// Returns true if this outcome should stop a sequential queue.
    ///
    /// Only a job-level fatal error does. A blocked process pauses just its own job, and a
    /// cancellation reaches later jobs through the shared token.
    pub fn stops_queue(&self) -> bool {
        matches!(self, RunOutcome::Error(JobFailure::SourceUnavailable(_)))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled { progress } => write!(
                f,
                "cancelled after {}/{} files",
                progress.files_processed, progress.total_files
            ),
            RunOutcome::BlockedProcess { process_name } => write!(
                f,
                "paused: process '{}' is running and must be closed",
                process_name
            ),
            RunOutcome::Error(failure) => write!(f, "error: {}", failure),
            RunOutcome::NotStarted { failed_job } => {
                write!(f, "not started: job '{}' could not start", failed_job)
            }
        }
    }
}
