//! Bounded min-heap retaining the K highest-scoring documents seen so far.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A document with its score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: u32,
    pub score: f32,
}

/// Collects the top-K scoring documents.
///
/// While the heap is not full every candidate is admitted; once full, a
/// candidate must beat the current minimum, which it replaces at the root.
pub struct TopKCollector {
    k: usize,
    heap: BinaryHeap<MinScored>,
    min_score: f32,
}

impl TopKCollector {
    pub fn new(k: usize) -> Self {
        let k = if k == 0 { 10 } else { k };
        Self {
            k,
            heap: BinaryHeap::with_capacity(k),
            min_score: 0.0,
        }
    }

    /// Offer a document to the collector.
    pub fn collect(&mut self, doc_id: u32, score: f32) {
        if self.heap.len() < self.k {
            self.heap.push(MinScored(ScoredDoc { doc_id, score }));
            if self.heap.len() == self.k {
                self.min_score = self.heap.peek().map(|e| e.0.score).unwrap_or(0.0);
            }
        } else if score > self.min_score {
            if let Some(mut root) = self.heap.peek_mut() {
                root.0 = ScoredDoc { doc_id, score };
            }
            self.min_score = self.heap.peek().map(|e| e.0.score).unwrap_or(0.0);
        }
    }

    /// The current admission threshold: 0 until the heap is full, then the
    /// lowest retained score. Scorers may skip candidates that cannot beat
    /// it.
    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain into a vector sorted descending by score.
    pub fn results(mut self) -> Vec<ScoredDoc> {
        let mut out = vec![
            ScoredDoc {
                doc_id: 0,
                score: 0.0
            };
            self.heap.len()
        ];
        for slot in out.iter_mut().rev() {
            *slot = self.heap.pop().expect("heap length matches").0;
        }
        out
    }
}

/// Min-heap wrapper: orders by score ascending so the root is the weakest
/// retained document.
struct MinScored(ScoredDoc);

impl PartialEq for MinScored {
    fn eq(&self, other: &Self) -> bool {
        self.0.score == other.0.score
    }
}

impl Eq for MinScored {}

impl PartialOrd for MinScored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinScored {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the minimum score at
        // the root.
        other.0.score.total_cmp(&self.0.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_basic() {
        let mut c = TopKCollector::new(3);
        c.collect(1, 1.0);
        c.collect(2, 3.0);
        c.collect(3, 2.0);
        c.collect(4, 5.0);
        c.collect(5, 4.0);

        let results = c.results();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ScoredDoc { doc_id: 4, score: 5.0 });
        assert_eq!(results[1], ScoredDoc { doc_id: 5, score: 4.0 });
        assert_eq!(results[2], ScoredDoc { doc_id: 2, score: 3.0 });
    }

    #[test]
    fn test_min_score_tracking() {
        let mut c = TopKCollector::new(2);
        c.collect(1, 5.0);
        assert_eq!(c.min_score(), 0.0); // not yet full

        c.collect(2, 3.0);
        assert_eq!(c.min_score(), 3.0);

        c.collect(3, 10.0);
        assert_eq!(c.min_score(), 5.0);
    }

    #[test]
    fn test_min_score_progression_while_collecting() {
        let mut c = TopKCollector::new(3);
        c.collect(1, 1.0);
        c.collect(2, 3.0);
        c.collect(3, 2.0);
        assert_eq!(c.min_score(), 1.0);
        c.collect(4, 5.0); // evicts 1.0
        assert_eq!(c.min_score(), 2.0);
        c.collect(5, 4.0); // evicts 2.0
        assert_eq!(c.min_score(), 3.0);
    }

    #[test]
    fn test_below_threshold_rejected() {
        let mut c = TopKCollector::new(2);
        c.collect(1, 5.0);
        c.collect(2, 4.0);
        c.collect(3, 1.0); // below min, ignored

        let results = c.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc_id, 1);
        assert_eq!(results[1].doc_id, 2);
    }

    #[test]
    fn test_fewer_than_k() {
        let mut c = TopKCollector::new(10);
        c.collect(1, 1.0);
        c.collect(2, 2.0);
        let results = c.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc_id, 2);
    }

    #[test]
    fn test_empty() {
        let c = TopKCollector::new(5);
        assert!(c.results().is_empty());
    }

    #[test]
    fn test_zero_k_defaults() {
        let c = TopKCollector::new(0);
        assert_eq!(c.k, 10);
    }
}
