//! The in-memory mutable filesystem layered over a base tree.
//!
//! [`GitFileStore`] tracks per-path staged insertions and deletions, open
//! byte channels and open directory streams, and reconciles them against
//! a directory-cache view of the base tree. Edits live in volatile memory
//! until [`GitFileStore::write_and_update_tree`] or
//! [`GitFileStore::write_and_update_commit`] persists them.

mod dir_stream;
mod git_file_store;
mod memory_channel;
mod open_options;
mod seekable_channel;
mod state;

pub use dir_stream::{DirStreamEntry, DirectoryStream};
pub use git_file_store::{GitFileStore, ATTACHED, DETACHED};
pub use memory_channel::MemoryChannel;
pub use open_options::OpenOptions;
pub use seekable_channel::SeekableByteChannel;
pub use state::FsState;

use crate::store::StoreError;

/// Result type for filesystem operations.
pub type Result<T> = std::result::Result<T, GitFsError>;

/// Errors that can occur in filesystem operations.
#[derive(Debug, thiserror::Error)]
pub enum GitFsError {
    /// The filesystem has been closed.
    #[error("filesystem is closed")]
    Closed,

    /// Path resolution failed for a read, delete or move source.
    #[error("no such file: {0}")]
    NoSuchFile(String),

    /// Creation asked for non-replacement but the target exists.
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    /// Attempted to replace or delete a non-empty directory.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// A directory stream was opened on something other than a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The target or an ancestor has an open handle that forbids the
    /// mutation, or a move target lies inside the move source.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A queried file store attribute is not recognized.
    #[error("unsupported attribute: {0}")]
    UnsupportedAttribute(String),

    /// An internal invariant was violated; indicates a bug.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An error propagated from the object store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GitFsError> for std::io::Error {
    fn from(e: GitFsError) -> Self {
        use std::io::ErrorKind;
        let kind = match &e {
            GitFsError::Closed => ErrorKind::BrokenPipe,
            GitFsError::NoSuchFile(_) => ErrorKind::NotFound,
            GitFsError::FileAlreadyExists(_) => ErrorKind::AlreadyExists,
            GitFsError::AccessDenied(_) => ErrorKind::PermissionDenied,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}
