//! Copy decision per file.
//!
//! Differential backups compare modification times only. Filesystems that truncate
//! timestamps or clocks that drift between machines can make a file look newer or older
//! than it is; that is an accepted limitation, content is never hashed.

use std::fs;
use std::path::Path;

use crate::model::{BackupType, FileRecord};

/// Determine whether `file` must be copied to `target_path`.
///
/// - Full: always.
/// - Differential: if the target is missing, or the source mtime is strictly newer.
///   If the target's metadata cannot be read the file is copied.
pub fn should_copy(backup_type: BackupType, file: &FileRecord, target_path: &Path) -> bool {
    match backup_type {
        BackupType::Full => true,
        BackupType::Differential => {
            let target_mtime = match fs::metadata(target_path) {
                Ok(metadata) => metadata.modified(),
                Err(_) => return true,
            };
            match target_mtime {
                Ok(target_mtime) => file.last_modified > target_mtime,
                Err(_) => true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::path::PathBuf;

    fn record_with_mtime(path: PathBuf, secs: i64) -> FileRecord {
        let mtime = FileTime::from_unix_time(secs, 0);
        filetime::set_file_mtime(&path, mtime).expect("Failed to set mtime");
        let metadata = fs::metadata(&path).expect("Failed to stat");
        FileRecord {
            relative_path: PathBuf::from(path.file_name().unwrap()),
            full_path: path,
            size: metadata.len(),
            last_modified: metadata.modified().expect("mtime"),
        }
    }

    #[test]
    fn test_full_always_copies() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("b.txt");
        fs::write(&src, b"a").expect("Failed to write");
        fs::write(&dst, b"a").expect("Failed to write");
        let file = record_with_mtime(src, 1_000);
        record_with_mtime(dst.clone(), 2_000);

        assert!(should_copy(BackupType::Full, &file, &dst));
    }

    #[test]
    fn test_differential_copies_missing_target() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        fs::write(&src, b"a").expect("Failed to write");
        let file = record_with_mtime(src, 1_000);

        assert!(should_copy(
            BackupType::Differential,
            &file,
            &temp_dir.path().join("missing.txt")
        ));
    }

    #[test]
    fn test_differential_compares_mtimes_strictly() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        let dst = temp_dir.path().join("b.txt");
        fs::write(&src, b"a").expect("Failed to write");
        fs::write(&dst, b"b").expect("Failed to write");

        let file = record_with_mtime(src.clone(), 2_000);
        record_with_mtime(dst.clone(), 1_000);
        assert!(should_copy(BackupType::Differential, &file, &dst), "newer source copies");

        record_with_mtime(dst.clone(), 2_000);
        assert!(!should_copy(BackupType::Differential, &file, &dst), "equal mtimes skip");

        record_with_mtime(dst.clone(), 3_000);
        assert!(!should_copy(BackupType::Differential, &file, &dst), "newer target skips");
    }
}
