//! Coordinates reader snapshots with commit/merge generation advancement
//! and decides when segments become reclaimable.
//!
//! Concurrency model:
//!   - generation lock (`RwLock`): read-locked for snapshot acquisition,
//!     write-locked for generation updates and reclaim scans.
//!   - snapshots lock (`Mutex`): protects the active-snapshot registry.
//!   - Lock ordering: generation lock → snapshots lock → per-ref mutex.
//!     No other order is permitted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::segment_ref::SegmentRef;
use super::snapshot::Snapshot;

/// Default duration after which a held snapshot is reported as a leak.
pub const DEFAULT_LEAK_THRESHOLD: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct GenerationState {
    generation: u64,
    /// Segments referenced by the current manifest.
    current: HashMap<String, Arc<SegmentRef>>,
    /// Segments dropped from the manifest while still pinned. They stay
    /// here until their last pin releases and a reclaim scan drains them.
    retired: HashMap<String, Arc<SegmentRef>>,
}

#[derive(Clone, Copy, Debug)]
struct SnapshotInfo {
    generation: u64,
    acquired_at: Instant,
}

/// A snapshot held longer than the leak threshold.
#[derive(Clone, Debug)]
pub struct SnapshotLeak {
    pub snapshot_id: u64,
    pub generation: u64,
    pub held: Duration,
}

/// Tracks the current generation, hands out snapshots to readers, and
/// manages segment reference counts for safe reclamation.
#[derive(Debug)]
pub struct SnapshotManager {
    state: RwLock<GenerationState>,
    active: Mutex<HashMap<u64, SnapshotInfo>>,
    next_snapshot_id: AtomicU64,
    leak_threshold: Option<Duration>,
    /// Back-reference handed to snapshots so release can deregister.
    self_ref: Weak<SnapshotManager>,
}

impl SnapshotManager {
    /// Create a manager seeded with the recovered generation and its
    /// segment ids (empty for generation 0).
    pub fn new(initial_generation: u64, segment_ids: &[String]) -> Arc<Self> {
        Self::with_leak_threshold(initial_generation, segment_ids, Some(DEFAULT_LEAK_THRESHOLD))
    }

    /// As `new`, with an explicit leak threshold (`None` disables leak
    /// detection).
    pub fn with_leak_threshold(
        initial_generation: u64,
        segment_ids: &[String],
        leak_threshold: Option<Duration>,
    ) -> Arc<Self> {
        let mut current = HashMap::with_capacity(segment_ids.len());
        for id in segment_ids {
            let seg_ref = Arc::new(SegmentRef::new(id.clone()));
            seg_ref.set_in_manifest(true);
            current.insert(id.clone(), seg_ref);
        }

        Arc::new_cyclic(|self_ref| Self {
            state: RwLock::new(GenerationState {
                generation: initial_generation,
                current,
                retired: HashMap::new(),
            }),
            active: Mutex::new(HashMap::new()),
            next_snapshot_id: AtomicU64::new(0),
            leak_threshold,
            self_ref: self_ref.clone(),
        })
    }

    /// Acquire a snapshot pinned to the current generation.
    ///
    /// Acquisition takes the generation lock in read mode, so concurrent
    /// acquisitions never block each other.
    pub fn acquire(&self) -> Snapshot {
        let (generation, segments) = {
            let state = self.state.read();
            let segments: Vec<Arc<SegmentRef>> = if state.generation == 0 {
                Vec::new()
            } else {
                state
                    .current
                    .values()
                    .map(|r| {
                        r.pin();
                        Arc::clone(r)
                    })
                    .collect()
            };
            (state.generation, segments)
        };

        let id = self.next_snapshot_id.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Snapshot::new(id, generation, segments, self.self_ref.clone());

        self.active.lock().insert(
            id,
            SnapshotInfo {
                generation,
                acquired_at: Instant::now(),
            },
        );

        debug!(
            snapshot_id = id,
            generation,
            segments = snapshot.segments().len(),
            "snapshot acquired"
        );
        snapshot
    }

    /// Atomically advance to a new generation and segment set after a
    /// successful commit or merge. Returns segment ids that are reclaimable
    /// right now.
    ///
    /// Segments carried across the update keep their existing ref so pin
    /// counts held by in-flight snapshots are preserved. Segments leaving
    /// the manifest while still pinned are retired; a later `reclaimable`
    /// scan picks them up once their last pin drops.
    ///
    /// # Panics
    ///
    /// Panics if `new_generation` is not strictly greater than the current
    /// generation.
    pub fn update_generation(&self, new_generation: u64, new_segment_ids: &[String]) -> Vec<String> {
        let mut state = self.state.write();

        assert!(
            new_generation > state.generation,
            "generation must be monotonically increasing: current={}, new={}",
            state.generation,
            new_generation
        );

        let mut new_current = HashMap::with_capacity(new_segment_ids.len());
        for id in new_segment_ids {
            if let Some(existing) = state.current.remove(id) {
                // Carried forward: reuse the ref so pin counts survive.
                new_current.insert(id.clone(), existing);
            } else {
                let seg_ref = Arc::new(SegmentRef::new(id.clone()));
                seg_ref.set_in_manifest(true);
                new_current.insert(id.clone(), seg_ref);
            }
        }

        // Whatever is left in the old map just left the manifest.
        let mut reclaimable = Vec::new();
        let drained: Vec<_> = state.current.drain().collect();
        for (id, seg_ref) in drained {
            seg_ref.set_in_manifest(false);
            if seg_ref.can_reclaim() {
                reclaimable.push(id);
            } else {
                state.retired.insert(id, seg_ref);
            }
        }

        state.generation = new_generation;
        state.current = new_current;

        info!(
            generation = new_generation,
            segments = new_segment_ids.len(),
            reclaimable = reclaimable.len(),
            "generation updated"
        );
        reclaimable
    }

    /// The current committed generation.
    pub fn current_generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Segment ids referenced by the current generation.
    pub fn current_segment_ids(&self) -> Vec<String> {
        self.state.read().current.keys().cloned().collect()
    }

    /// Number of currently held snapshots.
    pub fn active_snapshot_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Reference count for a segment, or -1 if unknown.
    pub fn segment_ref_count(&self, segment_id: &str) -> i64 {
        let state = self.state.read();
        state
            .current
            .get(segment_id)
            .or_else(|| state.retired.get(segment_id))
            .map_or(-1, |r| r.ref_count())
    }

    /// Scan for segments that can be safely deleted, draining them from the
    /// retired set.
    pub fn reclaimable(&self) -> Vec<String> {
        let mut state = self.state.write();
        let ready: Vec<String> = state
            .retired
            .iter()
            .filter(|(_, r)| r.can_reclaim())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ready {
            state.retired.remove(id);
        }
        ready
    }

    /// Snapshots held longer than the leak threshold.
    pub fn detect_leaks(&self) -> Vec<SnapshotLeak> {
        let Some(threshold) = self.leak_threshold else {
            return Vec::new();
        };

        self.active
            .lock()
            .iter()
            .filter_map(|(id, info)| {
                let held = info.acquired_at.elapsed();
                (held > threshold).then(|| SnapshotLeak {
                    snapshot_id: *id,
                    generation: info.generation,
                    held,
                })
            })
            .collect()
    }

    pub(super) fn deregister_snapshot(&self, snapshot_id: u64) {
        self.active.lock().remove(&snapshot_id);
        debug!(snapshot_id, "snapshot released");
    }
}
