//! On-disk directory layout for a single index.
//!
//! ```text
//! <root>/schema.json
//! <root>/manifest.current
//! <root>/manifests/manifest_gen_<N>.json
//! <root>/segments/<segment_id>/<file>
//! <root>/tmp/
//! ```
//!
//! All path methods are pure; only `ensure_directories` touches the
//! filesystem.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage;

/// Pure path computation for one index rooted at `root`.
#[derive(Clone, Debug)]
pub struct IndexDir {
    root: PathBuf,
}

impl IndexDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.root.join("segments")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn manifest_current_path(&self) -> PathBuf {
        self.root.join("manifest.current")
    }

    pub fn schema_path(&self) -> PathBuf {
        self.root.join("schema.json")
    }

    pub fn segment_dir(&self, segment_id: &str) -> PathBuf {
        self.segments_dir().join(segment_id)
    }

    pub fn segment_file(&self, segment_id: &str, file_name: &str) -> PathBuf {
        self.segment_dir(segment_id).join(file_name)
    }

    pub fn tmp_segment_dir(&self, segment_id: &str) -> PathBuf {
        self.tmp_dir().join(segment_id)
    }

    pub fn manifest_path(&self, generation: u64) -> PathBuf {
        self.manifests_dir()
            .join(format!("manifest_gen_{generation}.json"))
    }

    pub fn tmp_manifest_path(&self, generation: u64) -> PathBuf {
        self.tmp_dir().join(format!("manifest_gen_{generation}.json"))
    }

    /// Staging path for `manifest.current` activation.
    pub fn manifest_next_path(&self) -> PathBuf {
        self.tmp_dir().join("manifest.next")
    }

    /// Create `segments/`, `manifests/`, and `tmp/` if they do not exist.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.segments_dir(), self.manifests_dir(), self.tmp_dir()] {
            storage::ensure_dir(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        let dir = IndexDir::new("/data/idx");
        assert_eq!(dir.segments_dir(), PathBuf::from("/data/idx/segments"));
        assert_eq!(dir.manifests_dir(), PathBuf::from("/data/idx/manifests"));
        assert_eq!(dir.tmp_dir(), PathBuf::from("/data/idx/tmp"));
        assert_eq!(
            dir.manifest_current_path(),
            PathBuf::from("/data/idx/manifest.current")
        );
        assert_eq!(
            dir.manifest_path(7),
            PathBuf::from("/data/idx/manifests/manifest_gen_7.json")
        );
        assert_eq!(
            dir.segment_file("seg_gen_1_ab12cd34", "terms.fst"),
            PathBuf::from("/data/idx/segments/seg_gen_1_ab12cd34/terms.fst")
        );
        assert_eq!(
            dir.tmp_segment_dir("seg_gen_1_ab12cd34"),
            PathBuf::from("/data/idx/tmp/seg_gen_1_ab12cd34")
        );
        assert_eq!(
            dir.manifest_next_path(),
            PathBuf::from("/data/idx/tmp/manifest.next")
        );
    }

    #[test]
    fn test_ensure_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = IndexDir::new(tmp.path().join("idx"));
        dir.ensure_directories().unwrap();
        assert!(dir.segments_dir().is_dir());
        assert!(dir.manifests_dir().is_dir());
        assert!(dir.tmp_dir().is_dir());
    }
}
