//! Reader isolation: reference-counted segments, pinned snapshots, and the
//! manager that coordinates them with the committer.

mod manager;
mod segment_ref;
#[allow(clippy::module_inception)]
mod snapshot;

pub use manager::{SnapshotLeak, SnapshotManager, DEFAULT_LEAK_THRESHOLD};
pub use segment_ref::SegmentRef;
pub use snapshot::Snapshot;
