//! Durable writes with explicit fsync ordering.
//!
//! The crash-safety argument of the commit protocol rests on two primitives:
//! `write_file_sync` (file contents durable, directory entry not) and
//! `atomic_write` (rename + parent directory fsync, so the path flips from
//! old content to new content with no intermediate state visible after a
//! crash).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use rand::Rng;

use crate::error::{Result, ScourError};

/// Permission bits for created directories.
pub const DIR_PERM: u32 = 0o755;

/// Permission bits for created files.
pub const FILE_PERM: u32 = 0o644;

/// Open the file at `path` and fsync it.
pub fn fsync_file(path: &Path) -> Result<()> {
    let f = File::open(path).map_err(|e| ScourError::io(path, e))?;
    f.sync_all().map_err(|e| ScourError::io(path, e))
}

/// Open the directory at `path` and fsync it so directory entries
/// (file names) are durable.
pub fn fsync_dir(path: &Path) -> Result<()> {
    let d = File::open(path).map_err(|e| ScourError::io(path, e))?;
    d.sync_all().map_err(|e| ScourError::io(path, e))
}

/// Write `data` to `path` (create or truncate), fsync the file, and close it.
/// Does NOT fsync the parent directory.
pub fn write_file_sync(path: &Path, data: &[u8]) -> Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(FILE_PERM);
    }
    let mut f = opts.open(path).map_err(|e| ScourError::io(path, e))?;
    f.write_all(data).map_err(|e| ScourError::io(path, e))?;
    f.sync_all().map_err(|e| ScourError::io(path, e))?;
    Ok(())
}

/// Atomically replace `final_path` with `data`.
///
/// Writes to a uniquely-named file in `staging_dir`, fsyncs it, renames it
/// over `final_path`, and fsyncs the parent directory of `final_path`.
/// On any error before the rename the staged file is removed. After this
/// function returns `Ok`, the new contents are durable.
///
/// `staging_dir` must be on the same filesystem as `final_path`.
pub fn atomic_write(final_path: &Path, data: &[u8], staging_dir: &Path) -> Result<()> {
    let (staged_path, mut staged) = create_staging_file(staging_dir)?;

    let result = (|| -> Result<()> {
        staged
            .write_all(data)
            .map_err(|e| ScourError::io(&staged_path, e))?;
        staged
            .sync_all()
            .map_err(|e| ScourError::io(&staged_path, e))?;
        drop(staged);

        std::fs::rename(&staged_path, final_path)
            .map_err(|e| ScourError::io(final_path, e))?;
        Ok(())
    })();

    if let Err(err) = result {
        let _ = std::fs::remove_file(&staged_path);
        return Err(err);
    }

    let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
    fsync_dir(parent)
}

/// Create a directory (and parents) if it does not exist.
pub fn ensure_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(DIR_PERM)
            .create(path)
            .map_err(|e| ScourError::io(path, e))
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(path).map_err(|e| ScourError::io(path, e))
    }
}

fn create_staging_file(staging_dir: &Path) -> Result<(std::path::PathBuf, File)> {
    let mut rng = rand::thread_rng();
    for _ in 0..16 {
        let name = format!("staged-{:08x}", rng.gen::<u32>());
        let path = staging_dir.join(name);
        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(FILE_PERM);
        }
        match opts.open(&path) {
            Ok(f) => return Ok((path, f)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ScourError::io(&path, e)),
        }
    }
    Err(ScourError::io(
        staging_dir,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not create unique staging file",
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_write_file_sync_creates_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");

        write_file_sync(&path, b"first contents").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first contents");

        write_file_sync(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_atomic_write_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("tmp");
        ensure_dir(&staging).unwrap();
        let path = dir.path().join("target.json");

        atomic_write(&path, b"X", &staging).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"X");

        atomic_write(&path, b"Y", &staging).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"Y");

        // No staged leftovers.
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn test_atomic_write_cleans_staging_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("tmp");
        ensure_dir(&staging).unwrap();

        // Rename target inside a non-existent directory fails after staging.
        let path = dir.path().join("missing").join("target.json");
        assert!(atomic_write(&path, b"X", &staging).is_err());
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_dir_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("c");
        ensure_dir(&nested).unwrap();
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
