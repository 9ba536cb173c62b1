//! Read-side view of one installed segment: term dictionary, postings,
//! doc table, and automaton-driven term expansion.

use std::cell::Cell;
use std::rc::Rc;

use fst::{IntoStreamer, Streamer};

use crate::automaton::{Automaton as _, State, TermAutomaton, DEAD_STATE};
use crate::engine::{ExecutionContext, SlicePostingsIterator};
use crate::error::{Result, ScourError};
use crate::index::directory::IndexDir;
use crate::index::manifest::SegmentMeta;
use crate::scoring::Bm25Scorer;

use super::format::{
    field_key_prefix, DocTable, SegmentInfo, StoredPostings, DOCS_FILE, META_FILE, POSTINGS_FILE,
    TERMS_FILE,
};

/// An open segment. Immutable once loaded.
#[derive(Debug)]
pub struct SegmentReader {
    segment_id: String,
    terms: fst::Map<Vec<u8>>,
    postings: Vec<StoredPostings>,
    docs: DocTable,
    info: SegmentInfo,
}

impl SegmentReader {
    /// Load an installed segment directory.
    pub fn open(dir: &IndexDir, meta: &SegmentMeta) -> Result<Self> {
        let read = |name: &str| -> Result<Vec<u8>> {
            let path = dir.segment_file(&meta.id, name);
            std::fs::read(&path).map_err(|e| ScourError::io(&path, e))
        };

        let info = SegmentInfo::from_json(&read(META_FILE)?)?;
        let terms = fst::Map::new(read(TERMS_FILE)?)
            .map_err(|e| ScourError::SegmentCorrupt(format!("{}: terms.fst: {e}", meta.id)))?;
        let postings: Vec<StoredPostings> = serde_json::from_slice(&read(POSTINGS_FILE)?)
            .map_err(|e| {
                ScourError::SegmentCorrupt(format!("{}: postings.json: {e}", meta.id))
            })?;
        let docs: DocTable = serde_json::from_slice(&read(DOCS_FILE)?)
            .map_err(|e| ScourError::SegmentCorrupt(format!("{}: docs.json: {e}", meta.id)))?;

        if docs.external_ids.len() != info.doc_count as usize {
            return Err(ScourError::SegmentCorrupt(format!(
                "{}: doc table has {} entries, meta says {}",
                meta.id,
                docs.external_ids.len(),
                info.doc_count
            )));
        }

        Ok(Self {
            segment_id: meta.id.clone(),
            terms,
            postings,
            docs,
            info,
        })
    }

    pub fn segment_id(&self) -> &str {
        &self.segment_id
    }

    pub fn doc_count(&self) -> u32 {
        self.info.doc_count
    }

    pub fn avg_doc_len(&self) -> f32 {
        if self.docs.doc_lengths.is_empty() {
            return 0.0;
        }
        let total: u64 = self.docs.doc_lengths.iter().map(|&l| u64::from(l)).sum();
        total as f32 / self.docs.doc_lengths.len() as f32
    }

    pub fn doc_length(&self, doc_id: u32) -> u32 {
        self.docs
            .doc_lengths
            .get(doc_id as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn external_id(&self, doc_id: u32) -> Option<&str> {
        self.docs
            .external_ids
            .get(doc_id as usize)
            .map(String::as_str)
    }

    pub fn stored_field(&self, doc_id: u32, field: &str) -> Option<&[u8]> {
        self.docs
            .stored
            .get(doc_id as usize)?
            .get(field)
            .map(Vec::as_slice)
    }

    /// A BM25 scorer over this segment's statistics.
    pub fn scorer(&self) -> Bm25Scorer {
        Bm25Scorer::new(u64::from(self.info.doc_count), self.avg_doc_len())
    }

    /// The postings ordinal for an exact (field, term) pair.
    pub fn term_ordinal(&self, field: &str, term: &str) -> Option<u64> {
        self.terms.get(super::format::term_key(field, term))
    }

    /// Number of documents containing the term at `ordinal`.
    pub fn doc_freq(&self, ordinal: u64) -> u64 {
        self.postings
            .get(ordinal as usize)
            .map_or(0, |p| p.doc_ids.len() as u64)
    }

    /// Postings iterator for an ordinal.
    pub fn postings_iter(&self, ordinal: u64) -> SlicePostingsIterator {
        match self.postings.get(ordinal as usize) {
            Some(p) => SlicePostingsIterator::new(p.doc_ids.clone(), p.freqs.clone()),
            None => SlicePostingsIterator::empty(),
        }
    }

    /// Term frequency of the term at `ordinal` within one document
    /// (0 when absent).
    pub fn term_freq(&self, ordinal: u64, doc_id: u32) -> u32 {
        let Some(p) = self.postings.get(ordinal as usize) else {
            return 0;
        };
        match p.doc_ids.binary_search(&doc_id) {
            Ok(idx) => p.freqs.get(idx).copied().unwrap_or(1),
            Err(_) => 0,
        }
    }

    /// Position list of the term at `ordinal` within one document.
    pub fn positions(&self, ordinal: u64, doc_id: u32) -> Option<&[u32]> {
        let p = self.postings.get(ordinal as usize)?;
        let idx = p.doc_ids.binary_search(&doc_id).ok()?;
        p.positions.as_ref()?.get(idx).map(Vec::as_slice)
    }

    /// Expand an automaton against the field's terms: walk the term
    /// dictionary FST while stepping the automaton, pruning where
    /// `can_match` is false.
    ///
    /// States visited and terms matched are charged to the execution
    /// context; expansion stops quietly once `max_expansions` terms have
    /// been collected.
    pub fn expand_terms(
        &self,
        field: &str,
        automaton: &TermAutomaton,
        ctx: &mut ExecutionContext,
        max_expansions: usize,
    ) -> Result<Vec<(String, u64)>> {
        let states_visited = Rc::new(Cell::new(0usize));
        let key_automaton = FieldKeyAutomaton {
            prefix: field_key_prefix(field),
            inner: automaton,
            states_visited: Rc::clone(&states_visited),
        };
        let prefix_len = field.len() + 1;

        let mut out = Vec::new();
        let mut stream = self.terms.search(key_automaton).into_stream();
        while let Some((key, ordinal)) = stream.next() {
            ctx.visit_states(states_visited.replace(0))?;
            ctx.match_term()?;
            if out.len() >= max_expansions {
                break;
            }
            let term = String::from_utf8_lossy(&key[prefix_len..]).into_owned();
            out.push((term, ordinal));
        }
        ctx.visit_states(states_visited.replace(0))?;

        Ok(out)
    }

    /// Expand a regular expression against the field's terms by scanning
    /// the field's key range.
    pub fn expand_regex(
        &self,
        field: &str,
        pattern: &regex::Regex,
        ctx: &mut ExecutionContext,
        max_expansions: usize,
    ) -> Result<Vec<(String, u64)>> {
        let prefix = field_key_prefix(field);
        let mut upper = prefix.clone();
        *upper.last_mut().expect("prefix is never empty") += 1;

        let mut out = Vec::new();
        let mut stream = self
            .terms
            .range()
            .ge(prefix.as_slice())
            .lt(upper.as_slice())
            .into_stream();
        while let Some((key, ordinal)) = stream.next() {
            let term_bytes = &key[prefix.len()..];
            ctx.visit_states(term_bytes.len())?;
            let term = String::from_utf8_lossy(term_bytes);
            if pattern.is_match(&term) {
                ctx.match_term()?;
                if out.len() >= max_expansions {
                    break;
                }
                out.push((term.into_owned(), ordinal));
            }
        }

        Ok(out)
    }
}

/// Bridges a `TermAutomaton` into the term-dictionary walk: consume the
/// field prefix and separator first, then drive the inner automaton over
/// the term bytes.
struct FieldKeyAutomaton<'a> {
    prefix: Vec<u8>,
    inner: &'a TermAutomaton,
    states_visited: Rc<Cell<usize>>,
}

#[derive(Clone, Copy, Debug)]
enum KeyState {
    Dead,
    /// Matching the field prefix (byte index).
    Prefix(usize),
    /// Driving the inner automaton.
    Inner(State),
}

impl<'a> fst::Automaton for FieldKeyAutomaton<'a> {
    type State = KeyState;

    fn start(&self) -> KeyState {
        if self.prefix.is_empty() {
            KeyState::Inner(self.inner.start())
        } else {
            KeyState::Prefix(0)
        }
    }

    fn is_match(&self, state: &KeyState) -> bool {
        matches!(state, KeyState::Inner(s) if self.inner.is_accept(*s))
    }

    fn accept(&self, state: &KeyState, byte: u8) -> KeyState {
        self.states_visited.set(self.states_visited.get() + 1);
        match *state {
            KeyState::Dead => KeyState::Dead,
            KeyState::Prefix(i) => {
                if byte != self.prefix[i] {
                    KeyState::Dead
                } else if i + 1 == self.prefix.len() {
                    KeyState::Inner(self.inner.start())
                } else {
                    KeyState::Prefix(i + 1)
                }
            }
            KeyState::Inner(s) => {
                let next = self.inner.step(s, byte);
                if next == DEAD_STATE {
                    KeyState::Dead
                } else {
                    KeyState::Inner(next)
                }
            }
        }
    }

    fn can_match(&self, state: &KeyState) -> bool {
        match *state {
            KeyState::Dead => false,
            KeyState::Prefix(_) => true,
            KeyState::Inner(s) => self.inner.can_match(s),
        }
    }
}
