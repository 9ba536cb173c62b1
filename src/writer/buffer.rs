//! In-memory write buffer: an inverted index plus stored fields,
//! accumulated between commits.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Result, ScourError};

/// Default buffer memory limit in bytes.
pub const DEFAULT_BUFFER_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Default maximum documents per segment.
pub const DEFAULT_MAX_DOCS_PER_SEGMENT: usize = 100_000;

/// A single posting for a term in a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostingEntry {
    pub doc_id: u32,
    pub freq: u32,
    pub positions: Vec<u32>,
}

/// Accumulated postings for one term in one field, in doc-id order.
#[derive(Clone, Debug, Default)]
pub struct PostingsList {
    pub entries: Vec<PostingEntry>,
}

/// Accumulates documents before commit.
///
/// Internal doc ids are dense from 0 in insertion order. Term maps are
/// ordered so the segment builder can emit terms in lexicographic order.
#[derive(Debug)]
pub struct WriteBuffer {
    /// field → term → postings list
    inverted: BTreeMap<String, BTreeMap<String, PostingsList>>,
    /// doc id → field → stored bytes
    stored: HashMap<u32, BTreeMap<String, Vec<u8>>>,
    /// external id → internal doc id
    external_to_internal: HashMap<String, u32>,
    /// internal doc id → external id (dense)
    internal_to_external: Vec<String>,
    /// internal doc id → token count (dense)
    doc_lengths: Vec<u32>,
    /// external ids marked for deletion at commit time
    deletions: BTreeSet<String>,

    term_count: usize,
    memory_used: usize,
    memory_limit: usize,
    max_docs: usize,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BUFFER_MEMORY_LIMIT, DEFAULT_MAX_DOCS_PER_SEGMENT)
    }

    pub fn with_limits(memory_limit: usize, max_docs: usize) -> Self {
        Self {
            inverted: BTreeMap::new(),
            stored: HashMap::new(),
            external_to_internal: HashMap::new(),
            internal_to_external: Vec::new(),
            doc_lengths: Vec::new(),
            deletions: BTreeSet::new(),
            term_count: 0,
            memory_used: 0,
            memory_limit,
            max_docs,
        }
    }

    /// Assign the next dense internal doc id to an external id.
    pub fn allocate_doc_id(&mut self, external_id: &str) -> Result<u32> {
        if self.external_to_internal.contains_key(external_id) {
            return Err(ScourError::DuplicateDocInBuffer(external_id.to_string()));
        }

        let doc_id = self.internal_to_external.len() as u32;
        self.external_to_internal
            .insert(external_id.to_string(), doc_id);
        self.internal_to_external.push(external_id.to_string());
        self.doc_lengths.push(0);
        self.memory_used += external_id.len() * 2;
        Ok(doc_id)
    }

    /// Record a posting for a term in a field. Callers add documents in
    /// doc-id order, so each list stays ascending.
    pub fn add_posting(
        &mut self,
        field: &str,
        term: &str,
        doc_id: u32,
        freq: u32,
        positions: Vec<u32>,
    ) {
        let is_new_term = !self
            .inverted
            .get(field)
            .is_some_and(|terms| terms.contains_key(term));
        if is_new_term {
            self.term_count += 1;
            self.memory_used += field.len() + term.len();
        }
        self.memory_used += 16 + positions.len() * 4;

        if let Some(len) = self.doc_lengths.get_mut(doc_id as usize) {
            *len += freq;
        }

        self.inverted
            .entry(field.to_string())
            .or_default()
            .entry(term.to_string())
            .or_default()
            .entries
            .push(PostingEntry {
                doc_id,
                freq,
                positions,
            });
    }

    /// Store a field value for a document.
    pub fn store_field(&mut self, doc_id: u32, field: &str, value: Vec<u8>) {
        self.memory_used += field.len() + value.len();
        self.stored
            .entry(doc_id)
            .or_default()
            .insert(field.to_string(), value);
    }

    /// Record an external id for deletion at commit time.
    pub fn mark_deleted(&mut self, external_id: &str) {
        self.deletions.insert(external_id.to_string());
    }

    pub fn doc_count(&self) -> usize {
        self.internal_to_external.len()
    }

    pub fn term_count(&self) -> usize {
        self.term_count
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub fn is_empty(&self) -> bool {
        self.internal_to_external.is_empty() && self.deletions.is_empty()
    }

    /// True when the buffer has hit its memory or document limit.
    pub fn is_full(&self) -> bool {
        self.doc_count() >= self.max_docs || self.memory_used >= self.memory_limit
    }

    pub fn inverted(&self) -> &BTreeMap<String, BTreeMap<String, PostingsList>> {
        &self.inverted
    }

    pub fn stored(&self) -> &HashMap<u32, BTreeMap<String, Vec<u8>>> {
        &self.stored
    }

    pub fn external_ids(&self) -> &[String] {
        &self.internal_to_external
    }

    pub fn doc_lengths(&self) -> &[u32] {
        &self.doc_lengths
    }

    pub fn deletions(&self) -> &BTreeSet<String> {
        &self.deletions
    }

    /// Clear the buffer for reuse after a commit or abort.
    pub fn reset(&mut self) {
        self.inverted.clear();
        self.stored.clear();
        self.external_to_internal.clear();
        self.internal_to_external.clear();
        self.doc_lengths.clear();
        self.deletions.clear();
        self.term_count = 0;
        self.memory_used = 0;
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_dense_ids() {
        let mut buf = WriteBuffer::new();
        assert_eq!(buf.allocate_doc_id("doc-a").unwrap(), 0);
        assert_eq!(buf.allocate_doc_id("doc-b").unwrap(), 1);
        assert_eq!(buf.doc_count(), 2);
        assert_eq!(buf.external_ids(), &["doc-a", "doc-b"]);
    }

    #[test]
    fn test_duplicate_external_id() {
        let mut buf = WriteBuffer::new();
        buf.allocate_doc_id("doc-a").unwrap();
        let err = buf.allocate_doc_id("doc-a").unwrap_err();
        assert!(matches!(err, ScourError::DuplicateDocInBuffer(_)));
    }

    #[test]
    fn test_postings_accumulate() {
        let mut buf = WriteBuffer::new();
        let d0 = buf.allocate_doc_id("a").unwrap();
        let d1 = buf.allocate_doc_id("b").unwrap();

        buf.add_posting("body", "rust", d0, 2, vec![0, 4]);
        buf.add_posting("body", "rust", d1, 1, vec![1]);
        buf.add_posting("body", "fast", d0, 1, vec![2]);

        assert_eq!(buf.term_count(), 2);
        let list = &buf.inverted()["body"]["rust"];
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.entries[0].doc_id, 0);
        assert_eq!(list.entries[1].doc_id, 1);

        // Doc lengths track summed frequencies.
        assert_eq!(buf.doc_lengths(), &[3, 1]);
    }

    #[test]
    fn test_doc_limit() {
        let mut buf = WriteBuffer::with_limits(usize::MAX, 2);
        buf.allocate_doc_id("a").unwrap();
        assert!(!buf.is_full());
        buf.allocate_doc_id("b").unwrap();
        assert!(buf.is_full());
    }

    #[test]
    fn test_memory_limit() {
        let mut buf = WriteBuffer::with_limits(8, usize::MAX);
        buf.allocate_doc_id("abcdefgh").unwrap();
        assert!(buf.is_full());
    }

    #[test]
    fn test_reset() {
        let mut buf = WriteBuffer::new();
        let d0 = buf.allocate_doc_id("a").unwrap();
        buf.add_posting("f", "t", d0, 1, Vec::new());
        buf.store_field(d0, "f", b"v".to_vec());
        buf.mark_deleted("old");

        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.doc_count(), 0);
        assert_eq!(buf.term_count(), 0);
        assert_eq!(buf.memory_used(), 0);
        assert_eq!(buf.allocate_doc_id("a").unwrap(), 0);
    }
}
