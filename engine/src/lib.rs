//! # BackUP Engine - Backup Job Library
//!
//! A headless backup engine that copies named source trees to target trees, fully or
//! differentially, and runs several such jobs sequentially or in parallel.
//!
//! ## Overview
//!
//! The engine features:
//! - Recursive, deterministic enumeration of the source tree
//! - Full and differential (mtime based) copy policies
//! - Per-file progress snapshots and transfer records via an event sink
//! - Optional delegation of per-file encryption to an external executable
//! - Pausing when a configured "business" process is running
//! - Cooperative cancellation between files
//! - Per-file error isolation: one failed copy never aborts a job
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{
//!     BackupJob, BackupType, CancelToken, EngineSettings, ExecutionMode, JobOrchestrator,
//!     NullSink,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = EngineSettings::default();
//! let orchestrator = JobOrchestrator::from_settings(&settings);
//!
//! let mut jobs = vec![
//!     BackupJob::new("documents", "/home/me/docs", "/mnt/backup/docs", BackupType::Full)?,
//!     BackupJob::new("photos", "/home/me/photos", "/mnt/backup/photos", BackupType::Differential)?,
//! ];
//!
//! let report = orchestrator.run(&mut jobs, ExecutionMode::Parallel, &CancelToken::new(), &NullSink)?;
//! for job in &report.outcomes {
//!     println!("{}: {}", job.job_name, job.outcome);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (BackupJob, ProgressSnapshot, FileTransferRecord, enums)
//! - **error**: Error types
//! - **config**: Engine settings
//! - **fs_ops**: Low-level filesystem operations
//! - **policy**: Full/differential copy decision
//! - **encryption**: External encryption delegation
//! - **process_guard**: Blocked-process detection
//! - **cancel**: Cooperative cancellation token
//! - **progress**: Event sink trait and implementations
//! - **job**: Single job execution
//! - **orchestrator**: Sequential and parallel batches

pub mod cancel;
pub mod config;
pub mod encryption;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod process_guard;
pub mod progress;

// Re-export main types and functions
pub use cancel::CancelToken;
pub use config::{EncryptionSettings, EngineSettings};
pub use encryption::{EncryptionGateway, Encryptor, ExternalEncryptor};
pub use error::{BlockedProcessError, ConfigError, EncryptionError, EngineError, OrchestratorError};
pub use job::BackupEngine;
pub use model::{
    BackupJob, BackupState, BackupType, FileRecord, FileTransferRecord, JobFailure,
    ProgressSnapshot, RunOutcome, FAILED_DURATION_MS,
};
pub use orchestrator::{BatchReport, ExecutionMode, JobOrchestrator, JobOutcome};
pub use process_guard::{ProcessGuard, ProcessTable, SystemProcessTable};
pub use progress::{BackupEvent, ChannelSink, EventSink, NullSink};
