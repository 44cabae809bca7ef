//! Blocked-process detection.
//!
//! Before touching each file the engine asks the guard whether any configured "business"
//! process is running. Names compare case-insensitively with extensions stripped, so
//! `WINWORD.EXE`, `winword.exe` and `winword` are the same process.

use std::sync::{Mutex, PoisonError};

use sysinfo::{ProcessesToUpdate, System};

use crate::config::normalize_process_name;
use crate::error::BlockedProcessError;

/// Source of running process names.
pub trait ProcessTable: Send + Sync {
    fn running_process_names(&self) -> Vec<String>;
}

/// The operating system's process table.
///
/// One `System` is kept for the lifetime of the table and refreshed on each query, dropping
/// processes that exited since the last one.
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        SystemProcessTable {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn running_process_names(&self) -> Vec<String> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .values()
            .map(|process| process.name().to_string_lossy().into_owned())
            .collect()
    }
}

/// Checks a process table against the configured blocked names.
pub struct ProcessGuard<'a> {
    blocked: Vec<String>,
    table: &'a dyn ProcessTable,
}

impl<'a> ProcessGuard<'a> {
    pub fn new(blocked_names: &[String], table: &'a dyn ProcessTable) -> Self {
        ProcessGuard {
            blocked: blocked_names
                .iter()
                .filter_map(|name| normalize_process_name(name))
                .collect(),
            table,
        }
    }

    /// Fails with the first configured name found running, in configuration order.
    pub fn assert_none_running(&self) -> Result<(), BlockedProcessError> {
        if self.blocked.is_empty() {
            return Ok(());
        }

        let running: Vec<String> = self
            .table
            .running_process_names()
            .iter()
            .filter_map(|name| normalize_process_name(name))
            .collect();

        match self.blocked.iter().find(|name| running.contains(name)) {
            Some(name) => Err(BlockedProcessError {
                process_name: name.clone(),
            }),
            None => Ok(()),
        }
    }
}
