//! Error types for the backup engine.
//!
//! `EngineError` covers job-level and file-level filesystem conditions. Job-level errors
//! (missing source tree) end a job immediately; file-level errors are absorbed by the
//! engine and reported through the event sink instead of being returned.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Filesystem and job validation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source directory does not exist
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source path exists but is not a directory
    #[error("Source is not a directory: {}", path.display())]
    SourceNotDirectory { path: PathBuf },

    /// Source directory is not accessible (permissions)
    #[error("Source directory access denied: {}", path.display())]
    SourceAccessDenied { path: PathBuf, source: io::Error },

    /// Failed to enumerate a directory inside the source tree
    #[error("Failed to enumerate directory: {}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to read from source file
    #[error("Failed to read file: {}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to destination file
    #[error("Failed to write file: {}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory: {}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// A job definition is not usable
    #[error("Invalid job: {reason}")]
    InvalidJob { reason: String },
}

impl EngineError {
    /// Returns true if this error means the job cannot start at all.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. }
                | Self::SourceNotDirectory { .. }
                | Self::SourceAccessDenied { .. }
                | Self::EnumerationFailed { .. }
        )
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::SourceAccessDenied { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::DirectoryCreationFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Failures of the external encryption step.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Encryption executable not found: {}", path.display())]
    ExecutableMissing { path: PathBuf },

    #[error("Failed to start encryption executable {}", path.display())]
    SpawnFailed { path: PathBuf, source: io::Error },

    #[error("Encryption of {} failed with exit code {code}", path.display())]
    Failed { path: PathBuf, code: i32 },

    #[error("Encryption of {} was terminated without an exit code", path.display())]
    Terminated { path: PathBuf },
}

/// A blocked process is running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The process '{process_name}' is running and must be closed")]
pub struct BlockedProcessError {
    pub process_name: String,
}

/// Errors that prevent a batch from starting.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("A backup batch is already running")]
    BatchInProgress,

    #[error("Job name '{name}' appears more than once in the batch")]
    DuplicateJobName { name: String },
}

/// Errors loading settings or job definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to parse {what}")]
    Parse {
        what: String,
        source: serde_json::Error,
    },
}
