//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Enumerating the files of a source tree
//! - Re-rooting a source file onto the target tree
//! - Copying files with modification time preservation
//! - Creating directories recursively

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::model::FileRecord;

/// Check that the source root exists and is a directory.
///
/// # Errors
/// Returns SourceNotFound, SourceNotDirectory or SourceAccessDenied.
pub fn validate_source_dir(source: &Path) -> Result<(), EngineError> {
    match fs::metadata(source) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::SourceNotDirectory {
            path: source.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(EngineError::SourceNotFound {
            path: source.to_path_buf(),
        }),
        Err(e) => Err(EngineError::SourceAccessDenied {
            path: source.to_path_buf(),
            source: e,
        }),
    }
}

/// Enumerate every file below `source`, following symlinks.
///
/// Entries are sorted by name within each directory so the listing is deterministic.
/// A directory reached twice through symlinks is only listed once. Dangling symlinks are
/// skipped.
///
/// # Errors
/// Returns EngineError if the root or any directory below it cannot be read.
pub fn enumerate_files(source: &Path) -> Result<Vec<FileRecord>, EngineError> {
    validate_source_dir(source)?;

    let mut files = Vec::new();
    let mut visited = HashSet::new();

    fn recurse(
        dir: &Path,
        rel_dir: &Path,
        visited: &mut HashSet<PathBuf>,
        files: &mut Vec<FileRecord>,
    ) -> Result<(), EngineError> {
        let enumeration_failed = |e: io::Error| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        };

        let canonical = fs::canonicalize(dir).map_err(enumeration_failed)?;
        if !visited.insert(canonical) {
            tracing::debug!("Skipping already visited directory {:?}", dir);
            return Ok(());
        }

        let mut entries = fs::read_dir(dir)
            .map_err(enumeration_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(enumeration_failed)?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let entry_path = entry.path();
            let rel_path = rel_dir.join(entry.file_name());

            // fs::metadata follows symlinks
            let metadata = match fs::metadata(&entry_path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!("Skipping dangling symlink {:?}", entry_path);
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::EnumerationFailed {
                        path: entry_path,
                        source: e,
                    })
                }
            };

            if metadata.is_dir() {
                recurse(&entry_path, &rel_path, visited, files)?;
            } else {
                let last_modified = metadata.modified().map_err(|e| {
                    EngineError::EnumerationFailed {
                        path: entry_path.clone(),
                        source: e,
                    }
                })?;
                files.push(FileRecord {
                    full_path: entry_path,
                    relative_path: rel_path,
                    size: metadata.len(),
                    last_modified,
                });
            }
        }
        Ok(())
    }

    match recurse(source, Path::new(""), &mut visited, &mut files) {
        Ok(()) => Ok(files),
        Err(EngineError::EnumerationFailed { path, source: e })
            if path == source && e.kind() == io::ErrorKind::PermissionDenied =>
        {
            Err(EngineError::SourceAccessDenied { path, source: e })
        }
        Err(e) => Err(e),
    }
}

/// Path a source file lands at inside the target tree.
pub fn target_path_for(target_root: &Path, file: &FileRecord) -> PathBuf {
    target_root.join(&file.relative_path)
}

/// Copy a file from source to destination, overwriting, and preserve its modification time.
///
/// The data is written to a hidden `.<name>.partial` sibling first and renamed over the
/// destination only once the copy succeeded, so a failed copy leaves any previous target
/// untouched and never leaves a truncated file behind.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns EngineError if the copy fails
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    let partial = partial_path_for(dst);

    let result = copy_into(src, &partial).and_then(|bytes_copied| {
        fs::rename(&partial, dst).map_err(|e| EngineError::WriteError {
            path: dst.to_path_buf(),
            source: e,
        })?;
        Ok(bytes_copied)
    });

    if result.is_err() {
        match fs::remove_file(&partial) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove partial copy {:?}: {}", partial, e),
        }
    }
    result
}

/// Hidden sibling a copy is staged in before it replaces `dst`.
pub fn partial_path_for(dst: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(dst.file_name().unwrap_or_default());
    name.push(".partial");
    dst.with_file_name(name)
}

fn copy_into(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let src_mtime = src_file
        .metadata()
        .map_err(|e| EngineError::ReadError {
            path: src.to_path_buf(),
            source: e,
        })?
        .modified()
        .ok();

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;
    drop(dst_file);

    // rename keeps the mtime, so it is set on the staged file
    if let Some(mtime) = src_mtime {
        if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
            tracing::debug!("Could not preserve mtime on {:?}: {}", dst, e);
        }
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns EngineError if directory creation fails
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}
