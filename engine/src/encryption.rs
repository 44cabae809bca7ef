//! Delegation of per-file encryption to an external executable.
//!
//! The executable is invoked as `<exe> "<absolute target path>" "<key>"` and waited on.
//! Its exit status doubles as the result: a non-negative code is the encryption time in
//! milliseconds, anything else (negative code, killed by a signal, failure to start) is an
//! encryption error. The collaborator owns that contract, so it is kept as is.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::EngineSettings;
use crate::error::EncryptionError;

/// Something that encrypts a file in place and reports how long it took.
pub trait Encryptor: Send + Sync {
    /// Encrypt `path` with `key`, returning the elapsed milliseconds.
    fn encrypt(&self, path: &Path, key: &str) -> Result<f64, EncryptionError>;
}

/// Runs the external encryption executable.
#[derive(Debug, Clone)]
pub struct ExternalEncryptor {
    executable: PathBuf,
}

impl ExternalEncryptor {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        ExternalEncryptor {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl Encryptor for ExternalEncryptor {
    fn encrypt(&self, path: &Path, key: &str) -> Result<f64, EncryptionError> {
        if !self.executable.is_file() {
            return Err(EncryptionError::ExecutableMissing {
                path: self.executable.clone(),
            });
        }

        let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let status = Command::new(&self.executable)
            .arg(&target)
            .arg(key)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| EncryptionError::SpawnFailed {
                path: self.executable.clone(),
                source: e,
            })?;

        match status.code() {
            Some(code) if code >= 0 => Ok(f64::from(code)),
            Some(code) => Err(EncryptionError::Failed { path: target, code }),
            None => Err(EncryptionError::Terminated { path: target }),
        }
    }
}

/// Decides which copied files get encrypted and runs the encryptor on them.
pub struct EncryptionGateway {
    encryptor: Box<dyn Encryptor>,
    key: String,
    extensions: Vec<String>,
    encrypt_all: bool,
}

impl EncryptionGateway {
    /// `extensions` are matched case-insensitively, with or without a leading dot.
    pub fn new(
        encryptor: Box<dyn Encryptor>,
        key: impl Into<String>,
        extensions: &[String],
        encrypt_all: bool,
    ) -> Self {
        EncryptionGateway {
            encryptor,
            key: key.into(),
            extensions: extensions
                .iter()
                .filter_map(|ext| crate::config::normalize_extension(ext))
                .collect(),
            encrypt_all,
        }
    }

    /// Build a gateway around the external executable, or None when encryption is disabled.
    pub fn from_settings(settings: &EngineSettings) -> Option<Self> {
        let encryption = settings.encryption.as_ref()?;
        Some(Self::new(
            Box::new(ExternalEncryptor::new(&encryption.executable)),
            encryption.key.clone(),
            &settings.normalized_extensions(),
            settings.encrypt_all,
        ))
    }

    /// Returns true if a copy of `path` must be encrypted.
    pub fn applies_to(&self, path: &Path) -> bool {
        if self.encrypt_all {
            return true;
        }
        match path.extension() {
            Some(ext) => {
                let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
                self.extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }

    pub fn encrypt(&self, path: &Path) -> Result<f64, EncryptionError> {
        self.encryptor.encrypt(path, &self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncryptionSettings;

    struct FixedEncryptor(f64);

    impl Encryptor for FixedEncryptor {
        fn encrypt(&self, _path: &Path, _key: &str) -> Result<f64, EncryptionError> {
            Ok(self.0)
        }
    }

    fn gateway(extensions: &[&str], encrypt_all: bool) -> EncryptionGateway {
        let extensions: Vec<String> = extensions.iter().map(|e| e.to_string()).collect();
        EncryptionGateway::new(Box::new(FixedEncryptor(1.0)), "key", &extensions, encrypt_all)
    }

    #[test]
    fn test_extension_matching_is_case_insensitive() {
        let gateway = gateway(&["TXT", ".pdf"], false);
        assert!(gateway.applies_to(Path::new("/a/notes.txt")));
        assert!(gateway.applies_to(Path::new("/a/REPORT.PDF")));
        assert!(!gateway.applies_to(Path::new("/a/image.png")));
        assert!(!gateway.applies_to(Path::new("/a/Makefile")));
    }

    #[test]
    fn test_encrypt_all_matches_everything() {
        let gateway = gateway(&[], true);
        assert!(gateway.applies_to(Path::new("/a/Makefile")));
        assert!(gateway.applies_to(Path::new("/a/image.png")));
    }

    #[test]
    fn test_disabled_without_encryption_settings() {
        let settings = EngineSettings {
            encrypt_all: true,
            ..EngineSettings::default()
        };
        assert!(EncryptionGateway::from_settings(&settings).is_none());
    }

    #[test]
    fn test_settings_extensions_are_normalized() {
        let settings = EngineSettings {
            encrypted_extensions: vec!["TXT".to_string(), "  ".to_string(), ".Pdf".to_string()],
            encryption: Some(EncryptionSettings {
                executable: PathBuf::from("cryptosoft"),
                key: "key".to_string(),
            }),
            ..EngineSettings::default()
        };
        let gateway = EncryptionGateway::from_settings(&settings).expect("gateway");

        assert!(gateway.applies_to(Path::new("/a/notes.txt")));
        assert!(gateway.applies_to(Path::new("/a/report.pdf")));
        assert!(!gateway.applies_to(Path::new("/a/image.png")));
        assert!(!gateway.applies_to(Path::new("/a/Makefile")));
    }

    #[test]
    fn test_missing_executable_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let settings = EngineSettings {
            encrypt_all: true,
            encryption: Some(EncryptionSettings {
                executable: temp_dir.path().join("cryptosoft"),
                key: "key".to_string(),
            }),
            ..EngineSettings::default()
        };
        let gateway = EncryptionGateway::from_settings(&settings).expect("gateway");

        let result = gateway.encrypt(&temp_dir.path().join("file.txt"));
        assert!(matches!(result, Err(EncryptionError::ExecutableMissing { .. })));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("encrypt.sh");
        fs::write(&script, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");
        script
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_is_duration() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let script = write_script(temp_dir.path(), "exit 42");
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"data").expect("Failed to write file");

        let duration = ExternalEncryptor::new(script)
            .encrypt(&file, "key")
            .expect("Encryption should succeed");
        assert_eq!(duration, 42.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_passes_path_and_key() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let script = write_script(temp_dir.path(), r#"printf '%s\n%s\n' "$1" "$2" > "$1.args""#);
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"data").expect("Failed to write file");

        ExternalEncryptor::new(script)
            .encrypt(&file, "s3cret")
            .expect("Encryption should succeed");

        let canonical = fs::canonicalize(&file).expect("canonical path");
        let args = fs::read_to_string(format!("{}.args", canonical.display()))
            .expect("Failed to read recorded args");
        assert_eq!(args, format!("{}\ns3cret\n", canonical.display()));
    }

    #[cfg(unix)]
    #[test]
    fn test_killed_process_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let script = write_script(temp_dir.path(), "kill -9 $$");
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"data").expect("Failed to write file");

        let result = ExternalEncryptor::new(script).encrypt(&file, "key");
        assert!(matches!(result, Err(EncryptionError::Terminated { .. })));
    }
}
