//! On-disk shape of the MVP segment format.
//!
//! A segment directory holds:
//!
//! ```text
//! meta.json        self-checksummed document and field statistics
//! terms.fst        FST over `<field> 0x00 <term>` keys → postings ordinal
//! postings.json    ordinal-indexed postings lists
//! docs.json        doc table: external ids, lengths, stored fields
//! tombstones.json  external ids deleted by this segment's commit
//! ```
//!
//! The binary encoding is deliberately simple: the commit and recovery
//! protocols only depend on the files being immutable and checksummed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScourError};
use crate::storage::{self, Checksum};

pub const META_FILE: &str = "meta.json";
pub const TERMS_FILE: &str = "terms.fst";
pub const POSTINGS_FILE: &str = "postings.json";
pub const DOCS_FILE: &str = "docs.json";
pub const TOMBSTONES_FILE: &str = "tombstones.json";

/// Separator between field and term in FST keys. The zero byte sorts below
/// every other byte, which keeps nested (field, term) iteration in global
/// key order.
pub const KEY_SEPARATOR: u8 = 0x00;

/// Build the FST key for a (field, term) pair.
pub fn term_key(field: &str, term: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(field.len() + 1 + term.len());
    key.extend_from_slice(field.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(term.as_bytes());
    key
}

/// The key prefix covering every term of a field.
pub fn field_key_prefix(field: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(field.len() + 1);
    prefix.extend_from_slice(field.as_bytes());
    prefix.push(KEY_SEPARATOR);
    prefix
}

/// Per-field statistics recorded in meta.json.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStats {
    pub term_count: u64,
    pub total_term_freq: u64,
}

/// Contents of meta.json, self-checksummed like the manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub doc_count: u32,
    pub field_stats: BTreeMap<String, FieldStats>,
    #[serde(default)]
    pub checksum: Checksum,
}

impl SegmentInfo {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut doc = self.clone();
        doc.checksum = doc.compute_checksum()?;
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    pub fn from_json(data: &[u8]) -> Result<SegmentInfo> {
        let info: SegmentInfo = serde_json::from_slice(data)
            .map_err(|e| ScourError::SegmentCorrupt(format!("meta.json unparseable: {e}")))?;
        let computed = info.compute_checksum()?;
        if computed != info.checksum {
            return Err(ScourError::SegmentCorrupt(format!(
                "meta.json checksum mismatch: stored {}, computed {}",
                info.checksum, computed
            )));
        }
        Ok(info)
    }

    fn compute_checksum(&self) -> Result<Checksum> {
        let mut cleared = self.clone();
        cleared.checksum = Checksum::empty();
        let data = serde_json::to_vec_pretty(&cleared)?;
        Ok(storage::compute_checksum(&data))
    }
}

/// One postings list in postings.json, indexed by FST ordinal.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredPostings {
    /// Ascending doc ids.
    pub doc_ids: Vec<u32>,
    /// Parallel term frequencies.
    pub freqs: Vec<u32>,
    /// Parallel position lists when the field records positions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positions: Option<Vec<Vec<u32>>>,
}

/// Contents of docs.json: the doc table, dense by internal doc id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocTable {
    pub external_ids: Vec<String>,
    pub doc_lengths: Vec<u32>,
    /// Stored field bytes per document.
    pub stored: Vec<BTreeMap<String, Vec<u8>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_key_ordering_across_fields() {
        // Nested (field, term) iteration order must agree with raw key
        // order, including when one field name prefixes another.
        let keys = [
            term_key("a", "z"),
            term_key("a.b", "a"),
            term_key("ab", "a"),
            term_key("b", "a"),
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{:?} !< {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_segment_info_roundtrip() {
        let mut field_stats = BTreeMap::new();
        field_stats.insert(
            "body".to_string(),
            FieldStats {
                term_count: 42,
                total_term_freq: 1000,
            },
        );
        let info = SegmentInfo {
            doc_count: 10,
            field_stats,
            checksum: Checksum::empty(),
        };

        let data = info.to_json().unwrap();
        let restored = SegmentInfo::from_json(&data).unwrap();
        assert_eq!(restored.doc_count, 10);
        assert_eq!(restored.field_stats["body"].term_count, 42);
    }

    #[test]
    fn test_tampered_segment_info_rejected() {
        let info = SegmentInfo {
            doc_count: 10,
            field_stats: BTreeMap::new(),
            checksum: Checksum::empty(),
        };
        let data = info.to_json().unwrap();
        let tampered = String::from_utf8(data)
            .unwrap()
            .replace("\"doc_count\": 10", "\"doc_count\": 12");
        assert!(SegmentInfo::from_json(tampered.as_bytes()).is_err());
    }
}
