//! Content-addressed object store of the git family.
//!
//! A store holds immutable blobs, trees and commits addressed by the
//! sha-256 hash of their canonical serialization, plus a mutable set of
//! named references with per-reference logs. The [`ObjectStore`] trait is
//! the interface the filesystem core consumes; [`MemoryStore`] is the
//! in-memory implementation used for testing and ephemeral workspaces.

mod branch;
mod commit;
mod memory_store;
mod object_id;
mod object_store;
mod tree;

pub use branch::{
    amend_branch_head, branch_exists, commit_branch_head, ensure_branch_ref_name,
    get_head_commit, init_branch_head, reset_branch_head,
};
pub use commit::{Commit, PersonIdent};
pub use memory_store::MemoryStore;
pub use object_id::{FileMode, ObjectId, ObjectKind, OBJECT_ID_LEN};
pub use object_store::{ObjectStore, ReflogEntry};
pub use tree::{walk_tree, TreeEntry};

/// Result type for object store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// An object exists but is not of the requested kind, or its
    /// serialized form could not be decoded.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// A non-force reference update observed a different old value than
    /// the caller expected.
    #[error("reference update rejected: {0}")]
    RefLocked(String),

    /// An I/O error from the backing storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
