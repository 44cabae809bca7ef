//! Engine settings.
//!
//! Settings are read once and passed to the engine and orchestrator explicitly. They stay
//! read-only for the duration of a batch.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings consumed by the backup engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Extensions whose copies are encrypted (e.g. ".txt", "pdf")
    pub encrypted_extensions: Vec<String>,

    /// Encrypt every copied file regardless of extension
    pub encrypt_all: bool,

    /// Process names that pause a job while running (e.g. "calc", "winword.exe")
    pub blocked_processes: Vec<String>,

    /// External encryptor; encryption is disabled when absent
    pub encryption: Option<EncryptionSettings>,
}

/// How to reach the external encryption executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionSettings {
    pub executable: PathBuf,
    pub key: String,
}

impl EngineSettings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json_str(&json).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                what: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            what: "engine settings".to_string(),
            source: e,
        })
    }

    /// Configured extensions, lowercased with a leading dot, blanks removed.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.encrypted_extensions
            .iter()
            .filter_map(|ext| normalize_extension(ext))
            .collect()
    }

    /// Configured blocked process names, lowercased without extension, blanks removed.
    pub fn normalized_blocked_processes(&self) -> Vec<String> {
        self.blocked_processes
            .iter()
            .filter_map(|name| normalize_process_name(name))
            .collect()
    }
}

pub(crate) fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(format!(".{}", ext))
    }
}

/// Lowercase a process name and strip its extension ("WINWORD.EXE" -> "winword").
pub(crate) fn normalize_process_name(name: &str) -> Option<String> {
    let name = name.trim();
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let stem = stem.trim().to_lowercase();
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}
