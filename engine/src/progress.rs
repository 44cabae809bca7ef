//! Event sink trait.
//!
//! This module defines the EventSink trait, which decouples the backup engine from the
//! collaborators that persist transfer logs, job state files, or drive a UI.
//!
//! All methods are called synchronously, inline with file processing. In parallel mode
//! several jobs publish concurrently, so implementations serialize their own writes.

use crossbeam_channel::Sender;

use crate::model::{BackupState, FileTransferRecord, ProgressSnapshot};

/// Receives records and snapshots from running jobs.
pub trait EventSink: Send + Sync {
    /// Called after every file (copied, skipped, or failed).
    fn publish_progress(&self, job_name: &str, progress: &ProgressSnapshot);

    /// Called once per file whose copy was performed or attempted.
    fn publish_transfer(&self, record: &FileTransferRecord);

    /// Called when a job starts (`Active`, no snapshot) and when it ends.
    fn publish_run_state(
        &self,
        job_name: &str,
        state: BackupState,
        progress: Option<&ProgressSnapshot>,
    );

    /// Called by the orchestrator with the mean percentage of all jobs in the batch.
    fn publish_batch_progress(&self, _percent: u8) {}
}

/// A sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish_progress(&self, _job_name: &str, _progress: &ProgressSnapshot) {}

    fn publish_transfer(&self, _record: &FileTransferRecord) {}

    fn publish_run_state(
        &self,
        _job_name: &str,
        _state: BackupState,
        _progress: Option<&ProgressSnapshot>,
    ) {
    }
}

/// Owned form of every sink call, for sending across threads.
#[derive(Debug, Clone, PartialEq)]
pub enum BackupEvent {
    Progress {
        job_name: String,
        progress: ProgressSnapshot,
    },
    Transfer(FileTransferRecord),
    RunState {
        job_name: String,
        state: BackupState,
        progress: Option<ProgressSnapshot>,
    },
    BatchProgress {
        percent: u8,
    },
}

/// A sink that forwards events over a channel, e.g. to a UI thread.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<BackupEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<BackupEvent>) -> Self {
        ChannelSink { sender }
    }
}

impl EventSink for ChannelSink {
    fn publish_progress(&self, job_name: &str, progress: &ProgressSnapshot) {
        let _ = self.sender.send(BackupEvent::Progress {
            job_name: job_name.to_string(),
            progress: progress.clone(),
        });
    }

    fn publish_transfer(&self, record: &FileTransferRecord) {
        let _ = self.sender.send(BackupEvent::Transfer(record.clone()));
    }

    fn publish_run_state(
        &self,
        job_name: &str,
        state: BackupState,
        progress: Option<&ProgressSnapshot>,
    ) {
        let _ = self.sender.send(BackupEvent::RunState {
            job_name: job_name.to_string(),
            state,
            progress: progress.cloned(),
        });
    }

    fn publish_batch_progress(&self, percent: u8) {
        let _ = self.sender.send(BackupEvent::BatchProgress { percent });
    }
}
