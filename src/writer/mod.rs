//! The write path: exclusive writer lock, document validation and
//! analysis, and the in-memory write buffer consumed by the committer.

mod buffer;
mod lock;
#[allow(clippy::module_inception)]
mod writer;

pub use buffer::{
    PostingEntry, PostingsList, WriteBuffer, DEFAULT_BUFFER_MEMORY_LIMIT,
    DEFAULT_MAX_DOCS_PER_SEGMENT,
};
pub use lock::WriterLock;
pub use writer::{Document, Writer};
