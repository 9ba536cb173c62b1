//! Per-generation manifest: the self-checksummed document enumerating the
//! segments and aggregate totals of one committed generation.
//!
//! Determinism rule: segments are sorted by id before serialization, and the
//! checksum is computed over the JSON rendering with the checksum field
//! cleared.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScourError};
use crate::storage::{self, Checksum};

/// Metadata for a single file within a segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub size: u64,
    pub checksum: Checksum,
}

/// Immutable description of one segment within a manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: String,
    pub generation_created: u64,
    pub doc_count: u32,
    pub doc_count_alive: u32,
    pub del_count: u32,
    pub size_bytes: u64,
    pub min_doc_id: u64,
    pub max_doc_id: u64,
    pub files: BTreeMap<String, FileMeta>,
}

/// A committed generation's manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generation: u64,
    pub previous_generation: u64,
    pub timestamp: DateTime<Utc>,
    pub commit_id: String,
    pub segments: Vec<SegmentMeta>,
    pub schema_version: u32,
    pub total_docs: u64,
    pub total_docs_alive: u64,
    pub total_size_bytes: u64,
    #[serde(default)]
    pub checksum: Checksum,
}

impl Manifest {
    /// The generation-0 sentinel for an empty index.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            previous_generation: 0,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            commit_id: String::new(),
            segments: Vec::new(),
            schema_version: 0,
            total_docs: 0,
            total_docs_alive: 0,
            total_size_bytes: 0,
            checksum: Checksum::empty(),
        }
    }

    pub fn segment_ids(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.id.clone()).collect()
    }

    /// Serialize to JSON with segments sorted by id and the self-checksum
    /// filled in.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut doc = self.clone();
        doc.segments.sort_by(|a, b| a.id.cmp(&b.id));
        doc.checksum = doc.compute_checksum()?;
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    /// Deserialize from JSON and verify the self-checksum.
    pub fn from_json(data: &[u8]) -> Result<Manifest> {
        let manifest: Manifest = serde_json::from_slice(data)
            .map_err(|e| ScourError::ManifestCorrupt(format!("unparseable: {e}")))?;
        let computed = manifest.compute_checksum()?;
        if computed != manifest.checksum {
            return Err(ScourError::ManifestCorrupt(format!(
                "checksum mismatch: stored {}, computed {}",
                manifest.checksum, computed
            )));
        }
        Ok(manifest)
    }

    /// Verify structural invariants: segment ordering and aggregate totals.
    pub fn verify_invariants(&self) -> Result<()> {
        for pair in self.segments.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(ScourError::ManifestCorrupt(format!(
                    "segments not sorted by id: {} >= {}",
                    pair[0].id, pair[1].id
                )));
            }
        }

        let docs: u64 = self.segments.iter().map(|s| u64::from(s.doc_count)).sum();
        let alive: u64 = self
            .segments
            .iter()
            .map(|s| u64::from(s.doc_count_alive))
            .sum();
        let size: u64 = self.segments.iter().map(|s| s.size_bytes).sum();
        if docs != self.total_docs || alive != self.total_docs_alive || size != self.total_size_bytes
        {
            return Err(ScourError::ManifestCorrupt(format!(
                "aggregates do not match segments: docs {}/{}, alive {}/{}, bytes {}/{}",
                docs, self.total_docs, alive, self.total_docs_alive, size, self.total_size_bytes
            )));
        }
        Ok(())
    }

    fn compute_checksum(&self) -> Result<Checksum> {
        let mut cleared = self.clone();
        cleared.checksum = Checksum::empty();
        cleared.segments.sort_by(|a, b| a.id.cmp(&b.id));
        let data = serde_json::to_vec_pretty(&cleared)?;
        Ok(storage::compute_checksum(&data))
    }
}
