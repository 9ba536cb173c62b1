//! The index facade: ties the directory model, commit and recovery
//! protocols, snapshot manager, and searcher together behind one handle.

pub mod directory;
pub mod generation;
pub mod manifest;
pub mod schema;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::analysis::AnalyzerRegistry;
use crate::commit::{CancellationToken, CommitOptions, CommitResult, Committer};
use crate::engine::ExecutionContext;
use crate::error::{Result, ScourError};
use crate::recovery::{recover, RecoveryOptions, RecoveryResult};
use crate::search::{Searcher, SearchResults};
use crate::segment::{build_segment, SegmentReader};
use crate::snapshot::{Snapshot, SnapshotManager, DEFAULT_LEAK_THRESHOLD};
use crate::writer::{WriteBuffer, Writer, WriterLock};

use directory::IndexDir;
use manifest::Manifest;
use schema::Schema;

/// Index-wide configuration.
#[derive(Clone, Debug)]
pub struct IndexOptions {
    /// Predecessor manifests kept by recovery.
    pub manifest_retention: usize,
    /// Verify segment file checksums during recovery.
    pub verify_segment_checksums: bool,
    /// Snapshot age reported as a leak; `None` disables detection.
    pub leak_threshold: Option<Duration>,
    /// Write buffer memory limit in bytes.
    pub buffer_memory_limit: usize,
    /// Maximum documents per segment.
    pub max_docs_per_segment: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            manifest_retention: 2,
            verify_segment_checksums: true,
            leak_threshold: Some(DEFAULT_LEAK_THRESHOLD),
            buffer_memory_limit: crate::writer::DEFAULT_BUFFER_MEMORY_LIMIT,
            max_docs_per_segment: crate::writer::DEFAULT_MAX_DOCS_PER_SEGMENT,
        }
    }
}

/// A single-node full-text index.
///
/// Opening runs crash recovery before any reader or writer is admitted.
/// One writer at a time; any number of concurrent searchers, each isolated
/// on the generation it acquired.
#[derive(Debug)]
pub struct Index {
    dir: IndexDir,
    options: IndexOptions,
    schema: Arc<Schema>,
    registry: Arc<AnalyzerRegistry>,
    snapshots: Arc<SnapshotManager>,
    writer_lock: Arc<WriterLock>,
    current_manifest: RwLock<Manifest>,
    readers: RwLock<HashMap<String, Arc<SegmentReader>>>,
    recovery: RecoveryResult,
}

impl Index {
    /// Create a new index at `root` with the given schema, then open it.
    pub fn create(root: impl AsRef<Path>, schema: Schema, options: IndexOptions) -> Result<Index> {
        let dir = IndexDir::new(root.as_ref());
        if dir.schema_path().exists() {
            return Err(ScourError::IndexExists(root.as_ref().to_path_buf()));
        }
        dir.ensure_directories()?;
        schema::write_schema(&dir, &schema)?;
        Self::open(root, options)
    }

    /// Open an existing index, running the crash-recovery protocol.
    pub fn open(root: impl AsRef<Path>, options: IndexOptions) -> Result<Index> {
        let dir = IndexDir::new(root.as_ref());
        if !dir.schema_path().exists() {
            return Err(ScourError::IndexNotFound(root.as_ref().to_path_buf()));
        }
        dir.ensure_directories()?;

        let schema = Arc::new(schema::load_schema(&dir)?);
        schema.validate()?;

        let recovery_opts = RecoveryOptions {
            manifest_retention: options.manifest_retention,
            verify_segment_checksums: options.verify_segment_checksums,
        };
        let recovery = recover(&dir, &recovery_opts)?;
        let current_manifest = recovery.manifest.clone().unwrap_or_else(Manifest::empty);

        let snapshots = SnapshotManager::with_leak_threshold(
            recovery.generation,
            &current_manifest.segment_ids(),
            options.leak_threshold,
        );

        let mut readers = HashMap::new();
        for meta in &current_manifest.segments {
            readers.insert(meta.id.clone(), Arc::new(SegmentReader::open(&dir, meta)?));
        }

        info!(
            root = %dir.root().display(),
            generation = recovery.generation,
            segments = current_manifest.segments.len(),
            "index opened"
        );

        Ok(Index {
            dir,
            options,
            schema,
            registry: Arc::new(AnalyzerRegistry::new()),
            snapshots,
            writer_lock: Arc::new(WriterLock::new()),
            current_manifest: RwLock::new(current_manifest),
            readers: RwLock::new(readers),
            recovery,
        })
    }

    /// Open the index at `root`, creating it with `schema` if absent.
    pub fn open_or_create(
        root: impl AsRef<Path>,
        schema: Schema,
        options: IndexOptions,
    ) -> Result<Index> {
        let dir = IndexDir::new(root.as_ref());
        if dir.schema_path().exists() {
            Self::open(root, options)
        } else {
            Self::create(root, schema, options)
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The outcome of the recovery pass that ran at open.
    pub fn recovery_result(&self) -> &RecoveryResult {
        &self.recovery
    }

    pub fn current_generation(&self) -> u64 {
        self.snapshots.current_generation()
    }

    pub fn snapshot_manager(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// Acquire the exclusive writer. Fails with `WriterLocked` while
    /// another writer is active.
    pub fn writer(&self) -> Result<Writer> {
        self.writer_lock.acquire()?;
        Ok(Writer::new(
            Arc::clone(&self.schema),
            Arc::clone(&self.registry),
            WriteBuffer::with_limits(
                self.options.buffer_memory_limit,
                self.options.max_docs_per_segment,
            ),
            Arc::clone(&self.writer_lock),
        ))
    }

    /// Commit the writer's buffer as a new generation.
    pub fn commit(&self, writer: &mut Writer) -> Result<CommitResult> {
        self.commit_with_cancel(writer, &CancellationToken::new())
    }

    /// As `commit`, honoring an external cancellation signal.
    pub fn commit_with_cancel(
        &self,
        writer: &mut Writer,
        cancel: &CancellationToken,
    ) -> Result<CommitResult> {
        let segment_data = build_segment(writer.buffer())?;

        let prev_manifest = self.current_manifest.read().clone();
        let committer = Committer::new(
            &self.dir,
            CommitOptions {
                schema_version: self.schema.version,
            },
        );
        let result = committer.commit(cancel, &prev_manifest, &segment_data)?;

        // Re-read the durable manifest; it is the source of truth for the
        // in-memory swap that follows.
        let new_manifest = generation::load_manifest(&self.dir, result.generation)?;

        {
            let mut readers = self.readers.write();
            for meta in &new_manifest.segments {
                if !readers.contains_key(&meta.id) {
                    readers.insert(meta.id.clone(), Arc::new(SegmentReader::open(&self.dir, meta)?));
                }
            }
        }

        let segment_ids = new_manifest.segment_ids();
        *self.current_manifest.write() = new_manifest;
        let reclaimable = self.snapshots.update_generation(result.generation, &segment_ids);
        self.remove_segments(&reclaimable);

        writer.buffer_mut().reset();
        Ok(result)
    }

    /// Acquire a point-in-time snapshot for a reader.
    pub fn acquire_snapshot(&self) -> Snapshot {
        self.snapshots.acquire()
    }

    /// Execute a query with default limits.
    pub fn search(&self, query: &crate::query::Query, k: usize) -> Result<SearchResults> {
        let mut ctx = ExecutionContext::default();
        self.search_with_context(query, k, &mut ctx)
    }

    /// Execute a query under an explicit execution context.
    pub fn search_with_context(
        &self,
        query: &crate::query::Query,
        k: usize,
        ctx: &mut ExecutionContext,
    ) -> Result<SearchResults> {
        let snapshot = self.snapshots.acquire();

        let readers = {
            let map = self.readers.read();
            snapshot
                .segments()
                .iter()
                .filter_map(|r| map.get(r.segment_id()).cloned())
                .collect::<Vec<_>>()
        };

        let results = Searcher::new(readers).search(query, k, ctx);
        snapshot.release();
        results
    }

    /// Delete any segments that have become reclaimable since the last
    /// commit (typically after a long-held snapshot was released).
    pub fn reclaim_segments(&self) -> Vec<String> {
        let reclaimable = self.snapshots.reclaimable();
        self.remove_segments(&reclaimable);
        reclaimable
    }

    fn remove_segments(&self, segment_ids: &[String]) {
        if segment_ids.is_empty() {
            return;
        }
        let mut readers = self.readers.write();
        for id in segment_ids {
            readers.remove(id);
            let path = self.dir.segment_dir(id);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => info!(segment = %id, "reclaimed segment"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(segment = %id, error = %err, "failed to remove reclaimed segment"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use crate::writer::Document;
    use schema::{FieldDef, ANALYZER_STANDARD};

    fn test_schema() -> Schema {
        Schema::new(vec![
            FieldDef::text("body", ANALYZER_STANDARD).with_positions(),
            FieldDef::keyword("tag"),
        ])
    }

    fn doc(id: &str, body: &str, tag: &str) -> Document {
        Document::new()
            .with_field("id", id)
            .with_field("body", body)
            .with_field("tag", tag)
    }

    #[test]
    fn test_create_open_and_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::create(tmp.path(), test_schema(), IndexOptions::default()).unwrap();
        assert_eq!(index.current_generation(), 0);

        let mut writer = index.writer().unwrap();
        writer.add_document(&doc("a", "hello world", "greeting")).unwrap();
        writer.add_document(&doc("b", "hello rust", "code")).unwrap();
        let result = index.commit(&mut writer).unwrap();
        assert_eq!(result.generation, 1);
        assert_eq!(index.current_generation(), 1);
        assert_eq!(writer.doc_count(), 0, "buffer reset after commit");
    }

    #[test]
    fn test_create_twice_fails() {
        let tmp = tempfile::tempdir().unwrap();
        Index::create(tmp.path(), test_schema(), IndexOptions::default()).unwrap();
        let err =
            Index::create(tmp.path(), test_schema(), IndexOptions::default()).unwrap_err();
        assert!(matches!(err, ScourError::IndexExists(_)));
    }

    #[test]
    fn test_open_missing_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Index::open(tmp.path().join("nope"), IndexOptions::default()).unwrap_err();
        assert!(matches!(err, ScourError::IndexNotFound(_)));
    }

    #[test]
    fn test_writer_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::create(tmp.path(), test_schema(), IndexOptions::default()).unwrap();

        let writer = index.writer().unwrap();
        assert!(matches!(index.writer(), Err(ScourError::WriterLocked)));
        drop(writer);
        index.writer().unwrap();
    }

    #[test]
    fn test_commit_empty_buffer_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::create(tmp.path(), test_schema(), IndexOptions::default()).unwrap();
        let mut writer = index.writer().unwrap();
        assert!(matches!(
            index.commit(&mut writer),
            Err(ScourError::IndexEmpty)
        ));
        assert_eq!(index.current_generation(), 0);
    }

    #[test]
    fn test_search_after_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::create(tmp.path(), test_schema(), IndexOptions::default()).unwrap();

        let mut writer = index.writer().unwrap();
        writer.add_document(&doc("a", "the quick brown fox", "animal")).unwrap();
        writer.add_document(&doc("b", "the lazy dog", "animal")).unwrap();
        index.commit(&mut writer).unwrap();

        let results = index.search(&Query::term("body", "quick"), 10).unwrap();
        assert_eq!(results.total_hits, 1);
        assert_eq!(results.hits[0].doc_id, "a");
        assert!(results.hits[0].score > 0.0);
    }

    #[test]
    fn test_snapshot_isolation_across_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Index::create(tmp.path(), test_schema(), IndexOptions::default()).unwrap();

        let mut writer = index.writer().unwrap();
        writer.add_document(&doc("a", "first batch", "x")).unwrap();
        index.commit(&mut writer).unwrap();

        let snapshot = index.acquire_snapshot();
        assert_eq!(snapshot.generation(), 1);

        writer.add_document(&doc("b", "second batch", "x")).unwrap();
        index.commit(&mut writer).unwrap();
        assert_eq!(index.current_generation(), 2);

        // The held snapshot still observes generation 1.
        assert_eq!(snapshot.generation(), 1);
        assert_eq!(snapshot.segments().len(), 1);
        snapshot.release();
    }
}
