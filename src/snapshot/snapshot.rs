//! A reader's pinned, point-in-time view of one committed generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use super::manager::SnapshotManager;
use super::segment_ref::SegmentRef;

/// A point-in-time view of a committed generation.
///
/// The snapshot pins every segment of its generation so none can be
/// reclaimed while it is held. `release` is idempotent, and dropping the
/// snapshot releases it, so pins cannot leak on any exit path.
#[derive(Debug)]
pub struct Snapshot {
    id: u64,
    generation: u64,
    acquired_at: Instant,
    segments: Vec<Arc<SegmentRef>>,
    released: AtomicBool,
    manager: Weak<SnapshotManager>,
}

impl Snapshot {
    pub(super) fn new(
        id: u64,
        generation: u64,
        segments: Vec<Arc<SegmentRef>>,
        manager: Weak<SnapshotManager>,
    ) -> Self {
        Self {
            id,
            generation,
            acquired_at: Instant::now(),
            segments,
            released: AtomicBool::new(false),
            manager,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The committed generation this snapshot observes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The segment refs pinned by this snapshot.
    pub fn segments(&self) -> &[Arc<SegmentRef>] {
        &self.segments
    }

    pub fn segment_ids(&self) -> Vec<String> {
        self.segments
            .iter()
            .map(|r| r.segment_id().to_string())
            .collect()
    }

    /// How long this snapshot has been held.
    pub fn held_duration(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Unpin all segments and deregister from the manager.
    ///
    /// Safe to call multiple times; subsequent calls are no-ops.
    pub fn release(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        for seg_ref in &self.segments {
            seg_ref.unpin();
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.deregister_snapshot(self.id);
        }
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.release();
    }
}
