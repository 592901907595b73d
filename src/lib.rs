//! gitfs-rs - An in-memory POSIX-style filesystem over a git-family
//! content-addressed object store.
//!
//! A [`GitFileStore`] exposes a mutable hierarchical namespace rooted at
//! a base tree, optionally attached to a branch reference. Edits
//! accumulate in memory as staged insertions, deletions and per-file
//! byte channels, and are committed back to the store atomically as a
//! new tree, or as a new commit that advances the branch head. The
//! [`merge::Merger`] combines two divergent trees over a common base
//! directly into such a filesystem.

pub mod dir_cache;
pub mod file_store;
pub mod merge;
pub mod store;

pub use file_store::{
    DirStreamEntry, DirectoryStream, FsState, GitFileStore, GitFsError, MemoryChannel,
    OpenOptions, Result, SeekableByteChannel,
};

pub use merge::{ConflictMarkers, MergeConflict, Merger};

pub use store::{
    Commit, FileMode, MemoryStore, ObjectId, ObjectStore, PersonIdent, ReflogEntry, StoreError,
    TreeEntry,
};
