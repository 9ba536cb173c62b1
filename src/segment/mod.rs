//! The MVP segment format: builder, on-disk shape, and read-side view.
//!
//! Segments are immutable directories of checksummed files addressed by
//! segment id; the commit protocol installs them and the manifest records
//! them. The encoding here is the simplest thing that satisfies that
//! contract (an FST term dictionary plus JSON blobs).

mod builder;
mod format;
mod reader;

pub use builder::build_segment;
pub use format::{
    field_key_prefix, term_key, DocTable, FieldStats, SegmentInfo, StoredPostings, DOCS_FILE,
    META_FILE, POSTINGS_FILE, TERMS_FILE, TOMBSTONES_FILE,
};
pub use reader::SegmentReader;
