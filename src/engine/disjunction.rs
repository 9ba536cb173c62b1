//! OR iterator: a min-heap merge over the children's current doc ids.

use std::cmp::Ordering;
use std::collections::binary_heap::PeekMut;
use std::collections::BinaryHeap;

use super::postings::PostingsIterator;

/// Union of postings iterators in ascending doc-id order with duplicates
/// collapsed.
pub struct DisjunctionIterator<'a> {
    heap: BinaryHeap<HeapEntry<'a>>,
    current: u32,
}

impl<'a> DisjunctionIterator<'a> {
    pub fn new(children: Vec<Box<dyn PostingsIterator + 'a>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(children.len());
        for mut child in children {
            if child.next() {
                heap.push(HeapEntry(child));
            }
        }
        Self { heap, current: 0 }
    }
}

impl<'a> PostingsIterator for DisjunctionIterator<'a> {
    fn next(&mut self) -> bool {
        let Some(top) = self.heap.peek() else {
            return false;
        };
        self.current = top.0.doc_id();

        // Advance every child sitting on the current doc id.
        while let Some(mut top) = self.heap.peek_mut() {
            if top.0.doc_id() != self.current {
                break;
            }
            if !top.0.next() {
                PeekMut::pop(top);
            }
            // Dropping the PeekMut restores heap order for the moved child.
        }

        true
    }

    fn doc_id(&self) -> u32 {
        self.current
    }

    fn freq(&self) -> u32 {
        1 // Approximate for OR.
    }

    fn advance(&mut self, target: u32) -> bool {
        while let Some(mut top) = self.heap.peek_mut() {
            if top.0.doc_id() >= target {
                break;
            }
            if !top.0.advance(target) {
                PeekMut::pop(top);
            }
        }

        match self.heap.peek() {
            Some(top) => {
                self.current = top.0.doc_id();
                true
            }
            None => false,
        }
    }

    fn cost(&self) -> i64 {
        self.heap.iter().map(|e| e.0.cost()).sum()
    }
}

/// Min-heap entry ordered by the child's current doc id.
struct HeapEntry<'a>(Box<dyn PostingsIterator + 'a>);

impl<'a> PartialEq for HeapEntry<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.0.doc_id() == other.0.doc_id()
    }
}

impl<'a> Eq for HeapEntry<'a> {}

impl<'a> PartialOrd for HeapEntry<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for HeapEntry<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we need the minimum doc id on
        // top.
        other.0.doc_id().cmp(&self.0.doc_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::postings::SlicePostingsIterator;

    fn iter(ids: &[u32]) -> Box<dyn PostingsIterator> {
        Box::new(SlicePostingsIterator::new(ids.to_vec(), Vec::new()))
    }

    fn collect_all(mut it: impl PostingsIterator) -> Vec<u32> {
        let mut out = Vec::new();
        while it.next() {
            out.push(it.doc_id());
        }
        out
    }

    #[test]
    fn test_union() {
        let d = DisjunctionIterator::new(vec![iter(&[1, 5, 9]), iter(&[2, 5, 8])]);
        assert_eq!(collect_all(d), vec![1, 2, 5, 8, 9]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let d = DisjunctionIterator::new(vec![
            iter(&[1, 2, 3]),
            iter(&[1, 2, 3]),
            iter(&[2, 3, 4]),
        ]);
        assert_eq!(collect_all(d), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_single_child() {
        let d = DisjunctionIterator::new(vec![iter(&[3, 7])]);
        assert_eq!(collect_all(d), vec![3, 7]);
    }

    #[test]
    fn test_all_empty() {
        let mut d = DisjunctionIterator::new(vec![iter(&[]), iter(&[])]);
        assert!(!d.next());
    }

    #[test]
    fn test_advance() {
        let mut d = DisjunctionIterator::new(vec![iter(&[1, 5, 9]), iter(&[2, 6, 10])]);
        assert!(d.advance(5));
        assert_eq!(d.doc_id(), 5);
        assert!(d.advance(7));
        assert_eq!(d.doc_id(), 9);
        assert!(!d.advance(11));
    }

    #[test]
    fn test_freq_is_approximate_one() {
        let mut d = DisjunctionIterator::new(vec![iter(&[1])]);
        assert!(d.next());
        assert_eq!(d.freq(), 1);
    }
}
