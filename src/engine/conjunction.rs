//! AND iterator: the cheapest child leads, the rest are advanced to
//! alignment.

use super::postings::PostingsIterator;

/// Intersection of two or more postings iterators.
///
/// Children are sorted by ascending cost at construction; the cheapest
/// becomes the lead. Each step advances the lead and then aligns every
/// other child on the lead's doc id, restarting whenever a child overshoots.
/// Exhausts as soon as any child exhausts.
pub struct ConjunctionIterator<'a> {
    /// children[0] is the lead after the cost sort.
    children: Vec<Box<dyn PostingsIterator + 'a>>,
    current: u32,
}

impl<'a> ConjunctionIterator<'a> {
    pub fn new(mut children: Vec<Box<dyn PostingsIterator + 'a>>) -> Self {
        debug_assert!(children.len() >= 2);
        children.sort_by_key(|c| c.cost());
        Self {
            children,
            current: 0,
        }
    }

    /// Advance every non-lead child to `target`; if one lands past it, the
    /// lead chases that doc id and the loop restarts.
    fn align(&mut self, mut target: u32) -> bool {
        loop {
            let mut lead_moved = false;
            for i in 1..self.children.len() {
                if !self.children[i].advance(target) {
                    return false;
                }
                let doc = self.children[i].doc_id();
                if doc > target {
                    if !self.children[0].advance(doc) {
                        return false;
                    }
                    // The lead may itself have landed past the new target.
                    target = self.children[0].doc_id();
                    lead_moved = true;
                    break;
                }
            }
            if !lead_moved {
                self.current = target;
                return true;
            }
        }
    }
}

impl<'a> PostingsIterator for ConjunctionIterator<'a> {
    fn next(&mut self) -> bool {
        if !self.children[0].next() {
            return false;
        }
        let target = self.children[0].doc_id();
        self.align(target)
    }

    fn doc_id(&self) -> u32 {
        self.current
    }

    fn freq(&self) -> u32 {
        // The lead's frequency; scoring sums per-term contributions later.
        self.children[0].freq()
    }

    fn advance(&mut self, target: u32) -> bool {
        if !self.children[0].advance(target) {
            return false;
        }
        let lead_doc = self.children[0].doc_id();
        self.align(lead_doc)
    }

    fn cost(&self) -> i64 {
        self.children[0].cost()
    }
}
