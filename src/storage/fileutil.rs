//! Directory listing and cleanup helpers.

use std::path::{Path, PathBuf};

use crate::error::{Result, ScourError};

/// Remove all entries inside a directory without removing the directory
/// itself. Returns the removed paths and the first error encountered;
/// removal continues past individual failures.
pub fn remove_dir_contents(dir: &Path) -> (Vec<PathBuf>, Option<ScourError>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (Vec::new(), None),
        Err(e) => return (Vec::new(), Some(ScourError::io(dir, e))),
    };

    let mut removed = Vec::new();
    let mut first_err = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed.push(path),
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(ScourError::io(&path, e));
                }
            }
        }
    }
    (removed, first_err)
}

/// Names (not full paths) of all immediate subdirectories within `dir`.
/// A missing directory yields an empty list.
pub fn list_subdirs(dir: &Path) -> Result<Vec<String>> {
    list_entries(dir, true)
}

/// Names (not full paths) of all regular files within `dir` (non-recursive).
/// A missing directory yields an empty list.
pub fn list_files(dir: &Path) -> Result<Vec<String>> {
    list_entries(dir, false)
}

fn list_entries(dir: &Path, want_dirs: bool) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ScourError::io(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ScourError::io(dir, e))?;
        let is_dir = entry
            .file_type()
            .map_err(|e| ScourError::io(entry.path(), e))?
            .is_dir();
        if is_dir == want_dirs {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// True if the path exists and is a regular file.
pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

/// True if the path exists and is a directory.
pub fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_remove_dir_contents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), b"b").unwrap();

        let (removed, err) = remove_dir_contents(dir.path());
        assert!(err.is_none());
        assert_eq!(removed.len(), 2);
        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (removed, err) = remove_dir_contents(&dir.path().join("nope"));
        assert!(removed.is_empty());
        assert!(err.is_none());
    }

    #[test]
    fn test_list_subdirs_and_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("seg_b")).unwrap();
        fs::create_dir(dir.path().join("seg_a")).unwrap();
        fs::write(dir.path().join("manifest.json"), b"{}").unwrap();

        assert_eq!(list_subdirs(dir.path()).unwrap(), vec!["seg_a", "seg_b"]);
        assert_eq!(list_files(dir.path()).unwrap(), vec!["manifest.json"]);
        assert!(list_subdirs(&dir.path().join("missing")).unwrap().is_empty());
    }
}
