//! Query execution over the segments of one snapshot.
//!
//! Leaves become postings iterators (automaton leaves expand against the
//! term dictionary first), MUST clauses conjoin, SHOULD clauses disjoin,
//! and MUST_NOT clauses build a complement set consulted while driving.
//! Candidates are BM25-scored per term and fed to a top-K collector; the
//! per-segment top-K lists then merge into the final result.

use std::collections::HashMap;
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::automaton::TermAutomaton;
use crate::engine::{
    ConjunctionIterator, DisjunctionIterator, ExecutionContext, PostingsIterator, ScoredDoc,
    SlicePostingsIterator, TopKCollector,
};
use crate::error::{Result, ScourError};
use crate::query::{
    rewrite, BooleanClause, Occur, Query, MAX_FUZZY_EXPANSIONS, MAX_TERMS_EXPANDED,
};
use crate::scoring::Bm25Scorer;
use crate::segment::SegmentReader;

/// A single search result.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    /// External document id.
    pub doc_id: String,
    pub score: f32,
}

/// Merged results across all searched segments.
#[derive(Clone, Debug, Default)]
pub struct SearchResults {
    /// Top-K hits, descending by score.
    pub hits: Vec<SearchHit>,
    /// Total matching documents across segments (before the K cut).
    pub total_hits: u64,
}

/// Executes queries against a fixed set of segment readers.
pub struct Searcher {
    readers: Vec<Arc<SegmentReader>>,
}

impl Searcher {
    pub fn new(readers: Vec<Arc<SegmentReader>>) -> Self {
        Self { readers }
    }

    /// Validate, rewrite, and execute a query, returning the merged top-K.
    pub fn search(
        &self,
        query: &Query,
        k: usize,
        ctx: &mut ExecutionContext,
    ) -> Result<SearchResults> {
        query.validate()?;
        let rewritten = rewrite(query.clone());

        if rewritten == Query::MatchNone {
            return Ok(SearchResults::default());
        }

        let mut results = SearchResults::default();
        let mut merged: Vec<SearchHit> = Vec::new();
        for reader in &self.readers {
            let (scored, matched) = execute_on_segment(reader, &rewritten, k, ctx)?;
            results.total_hits += matched;
            for doc in scored {
                let Some(external) = reader.external_id(doc.doc_id) else {
                    continue;
                };
                merged.push(SearchHit {
                    doc_id: external.to_string(),
                    score: doc.score,
                });
            }
        }

        // Shard-style merge: order by score, break ties on external id for
        // determinism, keep K.
        merged.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        merged.truncate(k);
        results.hits = merged;
        Ok(results)
    }
}

/// A per-term BM25 contribution, probed per candidate document.
struct TermScorer {
    ordinal: u64,
    idf: f32,
    boost: f32,
}

impl TermScorer {
    fn score(&self, reader: &SegmentReader, scorer: &Bm25Scorer, doc_id: u32, doc_len: u32) -> f32 {
        let tf = reader.term_freq(self.ordinal, doc_id);
        if tf == 0 {
            return 0.0;
        }
        self.boost * scorer.score(tf, doc_len, self.idf)
    }
}

/// A planned clause: a candidate iterator plus the scoring terms it
/// contributes.
struct ClausePlan<'a> {
    iterator: Box<dyn PostingsIterator + 'a>,
    scorers: Vec<TermScorer>,
}

fn execute_on_segment(
    reader: &SegmentReader,
    query: &Query,
    k: usize,
    ctx: &mut ExecutionContext,
) -> Result<(Vec<ScoredDoc>, u64)> {
    let (musts, shoulds, must_nots, msm) = decompose(query);

    // Plan positive clauses.
    let mut scorers: Vec<TermScorer> = Vec::new();

    let mut must_iters: Vec<Box<dyn PostingsIterator + '_>> = Vec::with_capacity(musts.len());
    for clause in &musts {
        let plan = plan_query(reader, clause, ctx)?;
        scorers.extend(plan.scorers);
        must_iters.push(plan.iterator);
    }

    // SHOULD clauses are materialized so the same sets can both build a
    // driver (when there are no MUST clauses) and answer
    // minimum-should-match probes.
    let mut should_sets: Vec<RoaringBitmap> = Vec::with_capacity(shoulds.len());
    for clause in &shoulds {
        let plan = plan_query(reader, clause, ctx)?;
        scorers.extend(plan.scorers);
        should_sets.push(materialize(plan.iterator, ctx)?);
    }

    // Complement set for MUST_NOT.
    let mut excluded = RoaringBitmap::new();
    for clause in &must_nots {
        let plan = plan_query(reader, clause, ctx)?;
        excluded |= &materialize(plan.iterator, ctx)?;
    }

    // Choose the driver.
    let mut driver: Box<dyn PostingsIterator + '_> = if !must_iters.is_empty() {
        if must_iters.len() == 1 {
            must_iters.pop().expect("one iterator")
        } else {
            Box::new(ConjunctionIterator::new(must_iters))
        }
    } else if !should_sets.is_empty() {
        let children: Vec<Box<dyn PostingsIterator>> = should_sets
            .iter()
            .map(|set| {
                Box::new(SlicePostingsIterator::new(set.iter().collect(), Vec::new()))
                    as Box<dyn PostingsIterator>
            })
            .collect();
        Box::new(DisjunctionIterator::new(children))
    } else {
        // Only MUST_NOT clauses (or nothing): every document is a
        // candidate.
        Box::new(AllDocsIterator::new(reader.doc_count()))
    };

    // SHOULD match threshold: explicit minimum_should_match, and at least
    // one when SHOULD clauses are the only positive constraint.
    let required_should = if musts.is_empty() && !shoulds.is_empty() {
        msm.max(1)
    } else {
        msm
    };

    let bm25 = reader.scorer();
    let mut collector = TopKCollector::new(k);
    let mut total = 0u64;

    while driver.next() {
        ctx.check_limits()?;
        let doc = driver.doc_id();
        if excluded.contains(doc) {
            continue;
        }
        if required_should > 0 {
            let matched = should_sets.iter().filter(|s| s.contains(doc)).count();
            if matched < required_should {
                continue;
            }
        }

        total += 1;
        let doc_len = reader.doc_length(doc);
        let score: f32 = scorers
            .iter()
            .map(|s| s.score(reader, &bm25, doc, doc_len))
            .sum();
        collector.collect(doc, score);
    }

    Ok((collector.results(), total))
}

/// Split a query into boolean clause groups; a bare leaf is a single MUST.
fn decompose(query: &Query) -> (Vec<&Query>, Vec<&Query>, Vec<&Query>, usize) {
    match query {
        Query::Boolean {
            clauses,
            minimum_should_match,
        } => {
            let mut musts = Vec::new();
            let mut shoulds = Vec::new();
            let mut must_nots = Vec::new();
            for BooleanClause { occur, query } in clauses {
                match occur {
                    Occur::Must => musts.push(query),
                    Occur::Should => shoulds.push(query),
                    Occur::MustNot => must_nots.push(query),
                }
            }
            (musts, shoulds, must_nots, *minimum_should_match)
        }
        leaf => (vec![leaf], Vec::new(), Vec::new(), 0),
    }
}

/// Plan one clause into an iterator plus its scoring terms.
fn plan_query<'a>(
    reader: &'a SegmentReader,
    query: &Query,
    ctx: &mut ExecutionContext,
) -> Result<ClausePlan<'a>> {
    match query {
        Query::Term { field, term, boost } => {
            Ok(match reader.term_ordinal(field, term) {
                Some(ordinal) => ClausePlan {
                    iterator: Box::new(reader.postings_iter(ordinal)),
                    scorers: vec![term_scorer(reader, ordinal, *boost)],
                },
                None => empty_plan(),
            })
        }

        Query::Prefix {
            field,
            prefix,
            boost,
        } => {
            let automaton = TermAutomaton::prefix(prefix);
            let expanded = reader.expand_terms(field, &automaton, ctx, MAX_TERMS_EXPANDED)?;
            Ok(expansion_plan(reader, expanded, *boost))
        }

        Query::Wildcard {
            field,
            pattern,
            boost,
        } => {
            let automaton = TermAutomaton::wildcard(pattern)?;
            let expanded = reader.expand_terms(field, &automaton, ctx, MAX_TERMS_EXPANDED)?;
            Ok(expansion_plan(reader, expanded, *boost))
        }

        Query::Fuzzy {
            field,
            term,
            max_distance,
            boost,
        } => {
            let automaton = TermAutomaton::fuzzy(term, *max_distance)?;
            let expanded = reader.expand_terms(field, &automaton, ctx, MAX_FUZZY_EXPANSIONS)?;
            Ok(expansion_plan(reader, expanded, *boost))
        }

        Query::Regex {
            field,
            pattern,
            boost,
        } => {
            let compiled = regex::Regex::new(pattern)
                .map_err(|e| ScourError::InvalidQuery(format!("regex: {e}")))?;
            let expanded = reader.expand_regex(field, &compiled, ctx, MAX_TERMS_EXPANDED)?;
            Ok(expansion_plan(reader, expanded, *boost))
        }

        Query::Phrase {
            field,
            terms,
            slop,
            boost,
        } => plan_positional(reader, field, terms, *slop, *boost, PositionMode::Phrase),

        Query::Proximity {
            field,
            terms,
            slop,
            boost,
        } => plan_positional(reader, field, terms, *slop, *boost, PositionMode::Window),

        Query::MatchAll => Ok(ClausePlan {
            iterator: Box::new(AllDocsIterator::new(reader.doc_count())),
            scorers: Vec::new(),
        }),

        Query::MatchNone => Ok(empty_plan()),

        // A nested boolean materializes into a doc set; its scoring leaves
        // still contribute term scorers.
        Query::Boolean { .. } => {
            let (musts, shoulds, must_nots, msm) = decompose(query);

            let mut scorers = Vec::new();
            let mut result: Option<RoaringBitmap> = None;
            for clause in &musts {
                let plan = plan_query(reader, clause, ctx)?;
                scorers.extend(plan.scorers);
                let docs = materialize(plan.iterator, ctx)?;
                result = Some(match result {
                    None => docs,
                    Some(acc) => &acc & &docs,
                });
            }

            if !shoulds.is_empty() {
                let mut sets = Vec::with_capacity(shoulds.len());
                for clause in &shoulds {
                    let plan = plan_query(reader, clause, ctx)?;
                    scorers.extend(plan.scorers);
                    sets.push(materialize(plan.iterator, ctx)?);
                }
                let required = if musts.is_empty() { msm.max(1) } else { msm };
                if required > 0 {
                    let mut counts: HashMap<u32, usize> = HashMap::new();
                    for set in &sets {
                        for doc in set {
                            *counts.entry(doc).or_insert(0) += 1;
                        }
                    }
                    let qualified: RoaringBitmap = counts
                        .into_iter()
                        .filter(|(_, n)| *n >= required)
                        .map(|(doc, _)| doc)
                        .collect();
                    result = Some(match result {
                        None => qualified,
                        Some(acc) => &acc & &qualified,
                    });
                }
            }

            let mut base = match result {
                Some(set) => set,
                None => (0..reader.doc_count()).collect(),
            };
            for clause in &must_nots {
                let plan = plan_query(reader, clause, ctx)?;
                base -= &materialize(plan.iterator, ctx)?;
            }

            Ok(ClausePlan {
                iterator: Box::new(SlicePostingsIterator::new(
                    base.iter().collect(),
                    Vec::new(),
                )),
                scorers,
            })
        }
    }
}

fn empty_plan() -> ClausePlan<'static> {
    ClausePlan {
        iterator: Box::new(SlicePostingsIterator::empty()),
        scorers: Vec::new(),
    }
}

fn term_scorer(reader: &SegmentReader, ordinal: u64, boost: f32) -> TermScorer {
    let idf = reader.scorer().idf(reader.doc_freq(ordinal));
    TermScorer {
        ordinal,
        idf,
        boost,
    }
}

/// One iterator per expanded term, disjoined; each expanded term scores
/// with the leaf's boost.
fn expansion_plan(
    reader: &SegmentReader,
    expanded: Vec<(String, u64)>,
    boost: f32,
) -> ClausePlan<'_> {
    if expanded.is_empty() {
        return empty_plan();
    }

    let mut scorers = Vec::with_capacity(expanded.len());
    let mut children: Vec<Box<dyn PostingsIterator>> = Vec::with_capacity(expanded.len());
    for (_, ordinal) in &expanded {
        scorers.push(term_scorer(reader, *ordinal, boost));
        children.push(Box::new(reader.postings_iter(*ordinal)));
    }

    let iterator: Box<dyn PostingsIterator> = if children.len() == 1 {
        children.pop().expect("one child")
    } else {
        Box::new(DisjunctionIterator::new(children))
    };
    ClausePlan { iterator, scorers }
}

fn plan_positional<'a>(
    reader: &'a SegmentReader,
    field: &str,
    terms: &[String],
    slop: u32,
    boost: f32,
    mode: PositionMode,
) -> Result<ClausePlan<'a>> {
    let mut ordinals = Vec::with_capacity(terms.len());
    for term in terms {
        match reader.term_ordinal(field, term) {
            Some(ordinal) => ordinals.push(ordinal),
            None => return Ok(empty_plan()),
        }
    }

    let scorers = ordinals
        .iter()
        .map(|&ordinal| term_scorer(reader, ordinal, boost))
        .collect();

    if ordinals.len() == 1 {
        return Ok(ClausePlan {
            iterator: Box::new(reader.postings_iter(ordinals[0])),
            scorers,
        });
    }

    let children: Vec<Box<dyn PostingsIterator>> = ordinals
        .iter()
        .map(|&ordinal| Box::new(reader.postings_iter(ordinal)) as Box<dyn PostingsIterator>)
        .collect();
    let conjunction = ConjunctionIterator::new(children);

    Ok(ClausePlan {
        iterator: Box::new(PositionFilterIterator {
            inner: conjunction,
            reader,
            ordinals,
            slop,
            mode,
        }),
        scorers,
    })
}

/// Drain an iterator into a doc-id set.
fn materialize(
    mut iterator: Box<dyn PostingsIterator + '_>,
    ctx: &mut ExecutionContext,
) -> Result<RoaringBitmap> {
    let mut set = RoaringBitmap::new();
    while iterator.next() {
        ctx.check_limits()?;
        set.insert(iterator.doc_id());
    }
    Ok(set)
}

/// Dense candidate generator for match-all and pure-negation queries.
struct AllDocsIterator {
    doc_count: u32,
    current: u32,
    started: bool,
}

impl AllDocsIterator {
    fn new(doc_count: u32) -> Self {
        Self {
            doc_count,
            current: 0,
            started: false,
        }
    }
}

impl PostingsIterator for AllDocsIterator {
    fn next(&mut self) -> bool {
        if !self.started {
            self.started = true;
        } else if self.current < self.doc_count {
            self.current += 1;
        }
        self.current < self.doc_count
    }

    fn doc_id(&self) -> u32 {
        self.current
    }

    fn freq(&self) -> u32 {
        1
    }

    fn advance(&mut self, target: u32) -> bool {
        self.started = true;
        self.current = self.current.max(target);
        self.current < self.doc_count
    }

    fn cost(&self) -> i64 {
        i64::from(self.doc_count.saturating_sub(if self.started {
            self.current + 1
        } else {
            0
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PositionMode {
    /// Terms must appear in order (within slop of their expected offsets).
    Phrase,
    /// All terms must fall inside a window of width `slop`.
    Window,
}

/// Filters a conjunction down to documents satisfying the positional
/// constraint.
struct PositionFilterIterator<'a> {
    inner: ConjunctionIterator<'a>,
    reader: &'a SegmentReader,
    ordinals: Vec<u64>,
    slop: u32,
    mode: PositionMode,
}

impl<'a> PositionFilterIterator<'a> {
    fn verify(&self, doc_id: u32) -> bool {
        let mut position_lists = Vec::with_capacity(self.ordinals.len());
        for &ordinal in &self.ordinals {
            match self.reader.positions(ordinal, doc_id) {
                Some(positions) if !positions.is_empty() => position_lists.push(positions),
                _ => return false,
            }
        }
        match self.mode {
            PositionMode::Phrase => verify_phrase(&position_lists, self.slop),
            PositionMode::Window => verify_window(&position_lists, self.slop),
        }
    }
}

impl<'a> PostingsIterator for PositionFilterIterator<'a> {
    fn next(&mut self) -> bool {
        while self.inner.next() {
            if self.verify(self.inner.doc_id()) {
                return true;
            }
        }
        false
    }

    fn doc_id(&self) -> u32 {
        self.inner.doc_id()
    }

    fn freq(&self) -> u32 {
        self.inner.freq()
    }

    fn advance(&mut self, target: u32) -> bool {
        if !self.inner.advance(target) {
            return false;
        }
        if self.verify(self.inner.doc_id()) {
            return true;
        }
        self.next()
    }

    fn cost(&self) -> i64 {
        self.inner.cost()
    }
}

/// Terms appear in order: for some start position of the first term, each
/// following term has a position after its predecessor and within `slop`
/// of where an exact phrase would put it.
fn verify_phrase(position_lists: &[&[u32]], slop: u32) -> bool {
    'starts: for &start in position_lists[0] {
        let mut prev = start;
        for (i, positions) in position_lists.iter().enumerate().skip(1) {
            let expected = start + i as u32;
            let found = positions
                .iter()
                .find(|&&p| p > prev && p <= expected + slop);
            match found {
                Some(&p) => prev = p,
                None => continue 'starts,
            }
        }
        return true;
    }
    false
}

/// All terms fall inside a window of width `slop`: sweep a minimal window
/// over the merged position stream until one covers every term.
fn verify_window(position_lists: &[&[u32]], slop: u32) -> bool {
    let mut events: Vec<(u32, usize)> = Vec::new();
    for (term_idx, positions) in position_lists.iter().enumerate() {
        for &p in *positions {
            events.push((p, term_idx));
        }
    }
    events.sort_unstable();

    let needed = position_lists.len();
    let mut counts: HashMap<usize, usize> = HashMap::new();
    let mut covered = 0usize;
    let mut left = 0usize;

    for right in 0..events.len() {
        let entry = counts.entry(events[right].1).or_insert(0);
        *entry += 1;
        if *entry == 1 {
            covered += 1;
        }

        while covered == needed {
            if events[right].0 - events[left].0 <= slop {
                return true;
            }
            let count = counts.get_mut(&events[left].1).expect("tracked term");
            *count -= 1;
            if *count == 0 {
                covered -= 1;
            }
            left += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_phrase_exact() {
        // "quick brown fox" at positions 3,4,5.
        let lists: Vec<&[u32]> = vec![&[3], &[4], &[5]];
        assert!(verify_phrase(&lists, 0));

        let broken: Vec<&[u32]> = vec![&[3], &[6], &[5]];
        assert!(!verify_phrase(&broken, 0));
    }

    #[test]
    fn test_verify_phrase_with_slop() {
        // One extra word between the terms.
        let lists: Vec<&[u32]> = vec![&[3], &[5]];
        assert!(!verify_phrase(&lists, 0));
        assert!(verify_phrase(&lists, 1));
    }

    #[test]
    fn test_verify_phrase_multiple_starts() {
        let lists: Vec<&[u32]> = vec![&[0, 10], &[11]];
        assert!(verify_phrase(&lists, 0));
    }

    #[test]
    fn test_verify_window() {
        let lists: Vec<&[u32]> = vec![&[2, 40], &[5], &[7]];
        assert!(verify_window(&lists, 5)); // 2..7 fits in width 5
        assert!(!verify_window(&lists, 3));
    }

    #[test]
    fn test_all_docs_iterator() {
        let mut it = AllDocsIterator::new(3);
        let mut seen = Vec::new();
        while it.next() {
            seen.push(it.doc_id());
        }
        assert_eq!(seen, vec![0, 1, 2]);

        let mut it = AllDocsIterator::new(5);
        assert!(it.advance(3));
        assert_eq!(it.doc_id(), 3);
        assert!(!it.advance(5));
    }
}
