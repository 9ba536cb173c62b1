//! scour: a crash-safe, single-node full-text search engine core.
//!
//! The crate is organized around six subsystems: storage primitives
//! (checksums, fsync-ordered writes), the directory and manifest model,
//! the 7-phase commit protocol, the 9-step recovery protocol, the
//! snapshot manager (reference-counted reader isolation), and the query
//! core (expansion automata, postings iterator algebra, BM25 scoring,
//! top-K collection).

pub mod analysis;
pub mod automaton;
pub mod commit;
pub mod engine;
pub mod error;
pub mod index;
pub mod query;
pub mod recovery;
pub mod scoring;
pub mod search;
pub mod segment;
pub mod snapshot;
pub mod storage;
pub mod writer;

pub use commit::{CancellationToken, CommitResult};
pub use error::{Result, ScourError};
pub use index::schema::{FieldDef, FieldType, Schema};
pub use index::{Index, IndexOptions};
pub use query::{BooleanClause, Occur, Query};
pub use search::{SearchHit, SearchResults};
pub use snapshot::{Snapshot, SnapshotManager};
pub use writer::{Document, Writer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
