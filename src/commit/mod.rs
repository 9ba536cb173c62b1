//! The 7-phase commit protocol: turns a built segment plus the previous
//! manifest into a new durable generation.
//!
//! Phases 1-4 stage and install the segment; any failure there rolls the
//! staged directory back. Phases 5-6 write the manifest and flip
//! `manifest.current`; a failure there leaves the previous generation
//! authoritative because the pointer never advanced. Phase 7 is
//! best-effort cleanup.
//!
//! The caller must hold the exclusive writer lock for the index.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{Result, ScourError};
use crate::index::directory::IndexDir;
use crate::index::generation::{write_current_generation, write_manifest};
use crate::index::manifest::{FileMeta, Manifest, SegmentMeta};
use crate::storage;

/// The output of a segment builder: logical file names mapped to their
/// content bytes, plus document statistics.
#[derive(Clone, Debug, Default)]
pub struct SegmentData {
    pub files: BTreeMap<String, Vec<u8>>,
    pub doc_count: u32,
    pub doc_count_alive: u32,
    pub del_count: u32,
    pub min_doc_id: u64,
    pub max_doc_id: u64,
}

/// Information about a successful commit.
#[derive(Clone, Debug)]
pub struct CommitResult {
    pub generation: u64,
    pub segment_id: String,
    pub commit_id: String,
    pub duration: Duration,
}

/// External cancellation signal for a running commit.
///
/// Cancellation is checked before phases 2 and 3. It is never honored
/// during phases 5-6: those either complete or fail atomically.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ScourError::CommitCancelled)
        } else {
            Ok(())
        }
    }
}

/// Configuration for the commit protocol.
#[derive(Clone, Debug)]
pub struct CommitOptions {
    /// Schema version embedded in new manifests.
    pub schema_version: u32,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self { schema_version: 1 }
    }
}

/// Orchestrates the 7-phase commit protocol for one index.
pub struct Committer<'a> {
    dir: &'a IndexDir,
    opts: CommitOptions,
}

impl<'a> Committer<'a> {
    pub fn new(dir: &'a IndexDir, opts: CommitOptions) -> Self {
        Self { dir, opts }
    }

    /// Execute the full commit protocol and return the new generation.
    pub fn commit(
        &self,
        cancel: &CancellationToken,
        prev_manifest: &Manifest,
        segment_data: &SegmentData,
    ) -> Result<CommitResult> {
        let start = Instant::now();

        if segment_data.doc_count == 0 {
            return Err(ScourError::IndexEmpty);
        }

        let new_generation = prev_manifest.generation + 1;

        // Phase 1: PREPARE
        info!(generation = new_generation, "commit phase 1: prepare");
        let (segment_id, seg_meta, commit_id) =
            self.phase1_prepare(new_generation, segment_data);

        // Phase 2: WRITE
        cancel.check()?;
        info!(segment = %segment_id, "commit phase 2: write");
        if let Err(err) = self.phase2_write(&segment_id, segment_data) {
            self.rollback(&segment_id);
            return Err(err);
        }

        // Phase 3: VERIFY
        if let Err(err) = cancel.check() {
            self.rollback(&segment_id);
            return Err(err);
        }
        info!(segment = %segment_id, "commit phase 3: verify");
        if let Err(err) = self.phase3_verify(&segment_id, &seg_meta.files) {
            self.rollback(&segment_id);
            return Err(err);
        }

        // Phase 4: INSTALL
        info!(segment = %segment_id, "commit phase 4: install");
        if let Err(err) = self.phase4_install(&segment_id) {
            self.rollback(&segment_id);
            return Err(err);
        }

        // Phase 5: MANIFEST
        info!(generation = new_generation, "commit phase 5: manifest");
        let new_manifest =
            self.build_manifest(prev_manifest, new_generation, seg_meta, &commit_id);
        write_manifest(self.dir, &new_manifest)?;

        // Phase 6: ACTIVATION
        info!(generation = new_generation, "commit phase 6: activation");
        write_current_generation(self.dir, new_generation)?;

        // Phase 7: CLEANUP
        info!("commit phase 7: cleanup");
        self.phase7_cleanup();

        let duration = start.elapsed();
        info!(
            generation = new_generation,
            segment = %segment_id,
            ?duration,
            "commit complete"
        );

        Ok(CommitResult {
            generation: new_generation,
            segment_id,
            commit_id,
            duration,
        })
    }

    /// Generate ids, compute per-file checksums, assemble the SegmentMeta.
    fn phase1_prepare(
        &self,
        generation: u64,
        data: &SegmentData,
    ) -> (String, SegmentMeta, String) {
        let segment_id = generate_segment_id(generation);
        let commit_id = generate_commit_id();

        let mut files = BTreeMap::new();
        let mut total_size = 0u64;
        for (name, content) in &data.files {
            let size = content.len() as u64;
            files.insert(
                name.clone(),
                FileMeta {
                    size,
                    checksum: storage::compute_checksum(content),
                },
            );
            total_size += size;
        }

        let meta = SegmentMeta {
            id: segment_id.clone(),
            generation_created: generation,
            doc_count: data.doc_count,
            doc_count_alive: data.doc_count_alive,
            del_count: data.del_count,
            size_bytes: total_size,
            min_doc_id: data.min_doc_id,
            max_doc_id: data.max_doc_id,
            files,
        };

        (segment_id, meta, commit_id)
    }

    /// Create the segment directory under tmp/ and write all files with fsync.
    fn phase2_write(&self, segment_id: &str, data: &SegmentData) -> Result<()> {
        let seg_dir = self.dir.tmp_segment_dir(segment_id);
        storage::ensure_dir(&seg_dir)?;

        for (name, content) in &data.files {
            storage::write_file_sync(&seg_dir.join(name), content)?;
        }

        // fsync the segment directory so the file entries are durable.
        storage::fsync_dir(&seg_dir)
    }

    /// Re-read each staged file and verify its checksum.
    fn phase3_verify(
        &self,
        segment_id: &str,
        expected_files: &BTreeMap<String, FileMeta>,
    ) -> Result<()> {
        let seg_dir = self.dir.tmp_segment_dir(segment_id);
        for (name, meta) in expected_files {
            storage::verify_file_checksum(&seg_dir.join(name), &meta.checksum)?;
        }
        Ok(())
    }

    /// Rename the segment directory from tmp/ into segments/.
    fn phase4_install(&self, segment_id: &str) -> Result<()> {
        let src = self.dir.tmp_segment_dir(segment_id);
        let dst = self.dir.segment_dir(segment_id);
        std::fs::rename(&src, &dst).map_err(|e| ScourError::io(&dst, e))?;
        storage::fsync_dir(&self.dir.segments_dir())
    }

    /// Best-effort removal of tmp/ contents. Failures are logged, not fatal.
    fn phase7_cleanup(&self) {
        let (removed, err) = storage::remove_dir_contents(&self.dir.tmp_dir());
        if !removed.is_empty() {
            debug!(count = removed.len(), "cleanup removed tmp entries");
        }
        if let Some(err) = err {
            warn!(error = %err, "commit phase 7 (cleanup) non-fatal error");
        }
    }

    /// Remove the staged segment directory after a failed commit.
    fn rollback(&self, segment_id: &str) {
        let seg_dir = self.dir.tmp_segment_dir(segment_id);
        if let Err(err) = std::fs::remove_dir_all(&seg_dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %seg_dir.display(), error = %err, "rollback: failed to remove tmp segment dir");
            }
        }
    }

    fn build_manifest(
        &self,
        prev: &Manifest,
        generation: u64,
        new_segment: SegmentMeta,
        commit_id: &str,
    ) -> Manifest {
        let mut segments = prev.segments.clone();
        segments.push(new_segment);

        let total_docs = segments.iter().map(|s| u64::from(s.doc_count)).sum();
        let total_docs_alive = segments.iter().map(|s| u64::from(s.doc_count_alive)).sum();
        let total_size_bytes = segments.iter().map(|s| s.size_bytes).sum();

        Manifest {
            generation,
            previous_generation: prev.generation,
            timestamp: Utc::now(),
            commit_id: commit_id.to_string(),
            segments,
            schema_version: self.opts.schema_version,
            total_docs,
            total_docs_alive,
            total_size_bytes,
            checksum: crate::storage::Checksum::empty(),
        }
    }
}

/// Segment id format: `seg_gen_<generation>_<8 hex chars>`. The random
/// suffix guarantees unique names across crashes.
fn generate_segment_id(generation: u64) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("seg_gen_{generation}_{suffix:08x}")
}

/// Commit id: 16 random bytes, hex encoded.
fn generate_commit_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::generation::{load_manifest, read_current_generation};

    fn test_dir() -> (tempfile::TempDir, IndexDir) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = IndexDir::new(tmp.path());
        dir.ensure_directories().unwrap();
        (tmp, dir)
    }

    fn sample_segment_data() -> SegmentData {
        let mut files = BTreeMap::new();
        files.insert("meta.json".to_string(), b"{}".to_vec());
        files.insert("terms.fst".to_string(), b"A".to_vec());
        files.insert("postings.json".to_string(), b"B".to_vec());
        SegmentData {
            files,
            doc_count: 10,
            doc_count_alive: 10,
            del_count: 0,
            min_doc_id: 0,
            max_doc_id: 9,
        }
    }

    #[test]
    fn test_first_commit() {
        let (_tmp, dir) = test_dir();
        let committer = Committer::new(&dir, CommitOptions::default());

        let result = committer
            .commit(
                &CancellationToken::new(),
                &Manifest::empty(),
                &sample_segment_data(),
            )
            .unwrap();

        assert_eq!(result.generation, 1);
        assert!(result.segment_id.starts_with("seg_gen_1_"));
        assert_eq!(result.commit_id.len(), 32);

        // Manifest written and verifiable.
        let manifest = load_manifest(&dir, 1).unwrap();
        assert_eq!(manifest.generation, 1);
        assert_eq!(manifest.previous_generation, 0);
        assert_eq!(manifest.total_docs, 10);
        manifest.verify_invariants().unwrap();

        // manifest.current reads 1.
        assert_eq!(read_current_generation(&dir).unwrap(), 1);

        // Segment directory contains all three files with matching checksums.
        let seg_dir = dir.segment_dir(&result.segment_id);
        for (name, meta) in &manifest.segments[0].files {
            storage::verify_file_checksum(&seg_dir.join(name), &meta.checksum).unwrap();
        }

        // tmp/ is empty.
        assert_eq!(std::fs::read_dir(dir.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_second_commit_links_generations() {
        let (_tmp, dir) = test_dir();
        let committer = Committer::new(&dir, CommitOptions::default());
        let cancel = CancellationToken::new();

        committer
            .commit(&cancel, &Manifest::empty(), &sample_segment_data())
            .unwrap();
        let gen1 = load_manifest(&dir, 1).unwrap();

        let result = committer
            .commit(&cancel, &gen1, &sample_segment_data())
            .unwrap();
        assert_eq!(result.generation, 2);

        let gen2 = load_manifest(&dir, 2).unwrap();
        assert_eq!(gen2.previous_generation, 1);
        assert_eq!(gen2.segments.len(), 2);
        assert_eq!(gen2.total_docs, 20);
        gen2.verify_invariants().unwrap();
    }

    #[test]
    fn test_empty_segment_rejected() {
        let (_tmp, dir) = test_dir();
        let committer = Committer::new(&dir, CommitOptions::default());

        let err = committer
            .commit(
                &CancellationToken::new(),
                &Manifest::empty(),
                &SegmentData::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ScourError::IndexEmpty));
        assert_eq!(read_current_generation(&dir).unwrap(), 0);
    }

    #[test]
    fn test_cancelled_before_write() {
        let (_tmp, dir) = test_dir();
        let committer = Committer::new(&dir, CommitOptions::default());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = committer
            .commit(&cancel, &Manifest::empty(), &sample_segment_data())
            .unwrap_err();
        assert!(matches!(err, ScourError::CommitCancelled));

        // Nothing advanced and nothing staged.
        assert_eq!(read_current_generation(&dir).unwrap(), 0);
        assert_eq!(std::fs::read_dir(dir.segments_dir()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(dir.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_segment_id_grammar() {
        let id = generate_segment_id(12);
        let rest = id.strip_prefix("seg_gen_12_").unwrap();
        assert_eq!(rest.len(), 8);
        assert!(rest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }
}
