//! Low-level storage primitives: checksums, fsync-ordered writes, and
//! directory helpers.
//!
//! Everything above this module expresses durability in terms of these
//! primitives; no other module calls `fsync` directly.

mod checksum;
mod fileutil;
mod fsync;

pub use checksum::{
    compute_checksum, compute_file_checksum, verify_file_checksum, Checksum, CHECKSUM_PREFIX,
};
pub use fileutil::{
    dir_exists, file_exists, list_files, list_subdirs, remove_dir_contents,
};
pub use fsync::{
    atomic_write, ensure_dir, fsync_dir, fsync_file, write_file_sync, DIR_PERM, FILE_PERM,
};
