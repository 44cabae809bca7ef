#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use engine::{BackupState, EventSink, FileTransferRecord, ProcessTable, ProgressSnapshot};
use filetime::FileTime;

/// Sink that keeps every event, per job.
#[derive(Default)]
pub struct RecordingSink {
    pub snapshots: Mutex<Vec<(String, ProgressSnapshot)>>,
    pub transfers: Mutex<Vec<FileTransferRecord>>,
    pub states: Mutex<Vec<(String, BackupState)>>,
    pub batch: Mutex<Vec<u8>>,
}

impl RecordingSink {
    pub fn snapshots_for(&self, job_name: &str) -> Vec<ProgressSnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == job_name)
            .map(|(_, snapshot)| snapshot.clone())
            .collect()
    }

    pub fn transfers_for(&self, job_name: &str) -> Vec<FileTransferRecord> {
        self.transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.job_name == job_name)
            .cloned()
            .collect()
    }

    pub fn states_for(&self, job_name: &str) -> Vec<BackupState> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == job_name)
            .map(|(_, state)| *state)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish_progress(&self, job_name: &str, progress: &ProgressSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .push((job_name.to_string(), progress.clone()));
    }

    fn publish_transfer(&self, record: &FileTransferRecord) {
        self.transfers.lock().unwrap().push(record.clone());
    }

    fn publish_run_state(
        &self,
        job_name: &str,
        state: BackupState,
        _progress: Option<&ProgressSnapshot>,
    ) {
        self.states
            .lock()
            .unwrap()
            .push((job_name.to_string(), state));
    }

    fn publish_batch_progress(&self, percent: u8) {
        self.batch.lock().unwrap().push(percent);
    }
}

/// Process table that starts reporting `name` from the `after`-th query on.
pub struct AppearsAfter {
    pub name: &'static str,
    pub after: usize,
    pub queries: AtomicUsize,
}

impl AppearsAfter {
    pub fn new(name: &'static str, after: usize) -> Self {
        AppearsAfter {
            name,
            after,
            queries: AtomicUsize::new(0),
        }
    }
}

impl ProcessTable for AppearsAfter {
    fn running_process_names(&self) -> Vec<String> {
        let query = self.queries.fetch_add(1, Ordering::SeqCst);
        let mut names = vec!["init".to_string(), "sshd".to_string()];
        if query >= self.after {
            names.push(format!("{}.exe", self.name.to_uppercase()));
        }
        names
    }
}

/// Write `content` at `root/rel`, creating parents.
pub fn write_file(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).expect("Failed to create parent dir");
    fs::write(&path, content).expect("Failed to write file");
    path
}

pub fn set_mtime(path: &Path, unix_secs: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(unix_secs, 0))
        .expect("Failed to set mtime");
}

/// Create `count` numbered files under `root`.
pub fn populate(root: &Path, count: usize) {
    fs::create_dir_all(root).expect("Failed to create dir");
    for i in 0..count {
        write_file(root, &format!("file{:02}.dat", i), format!("content {}", i).as_bytes());
    }
}

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join(name);
    fs::write(&script, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    script
}
