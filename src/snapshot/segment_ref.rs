//! Reference-counted handle for a single on-disk segment.

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

/// Tracks the reference count and manifest membership for one segment.
///
/// `pin`/`unpin` are lock-free; the `in_manifest` flag is guarded by the
/// ref's own mutex so the `can_reclaim` predicate observes a consistent
/// pair.
#[derive(Debug)]
pub struct SegmentRef {
    segment_id: String,
    ref_count: AtomicI64,
    in_manifest: Mutex<bool>,
}

impl SegmentRef {
    /// A new ref with count 0, not yet in any manifest.
    pub fn new(segment_id: impl Into<String>) -> Self {
        Self {
            segment_id: segment_id.into(),
            ref_count: AtomicI64::new(0),
            in_manifest: Mutex::new(false),
        }
    }

    pub fn segment_id(&self) -> &str {
        &self.segment_id
    }

    /// Increment the reference count. Called when a snapshot pins this
    /// segment.
    pub fn pin(&self) {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the reference count. Called when a snapshot releases this
    /// segment.
    ///
    /// # Panics
    ///
    /// A negative count is a programmer error (double-unpin) and panics.
    pub fn unpin(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            panic!(
                "segment ref count went negative for {}",
                self.segment_id
            );
        }
    }

    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub fn set_in_manifest(&self, in_manifest: bool) {
        *self.in_manifest.lock() = in_manifest;
    }

    pub fn in_manifest(&self) -> bool {
        *self.in_manifest.lock()
    }

    /// True when the segment may be safely deleted: no snapshot pins it and
    /// the current manifest no longer references it.
    pub fn can_reclaim(&self) -> bool {
        let in_manifest = self.in_manifest.lock();
        self.ref_count.load(Ordering::SeqCst) == 0 && !*in_manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_unpin() {
        let r = SegmentRef::new("seg_gen_1_00000001");
        assert_eq!(r.ref_count(), 0);
        r.pin();
        r.pin();
        assert_eq!(r.ref_count(), 2);
        r.unpin();
        assert_eq!(r.ref_count(), 1);
        r.unpin();
        assert_eq!(r.ref_count(), 0);
    }

    #[test]
    #[should_panic(expected = "negative")]
    fn test_unpin_below_zero_panics() {
        let r = SegmentRef::new("seg_gen_1_00000002");
        r.unpin();
    }

    #[test]
    fn test_can_reclaim() {
        let r = SegmentRef::new("seg_gen_1_00000003");
        r.set_in_manifest(true);
        assert!(!r.can_reclaim());

        r.pin();
        r.set_in_manifest(false);
        assert!(!r.can_reclaim());

        r.unpin();
        assert!(r.can_reclaim());
    }
}
