//! The interface the filesystem core consumes from an object store.

use std::path::Path;

use super::{Commit, ObjectId, PersonIdent, Result, TreeEntry};

/// An entry in a reference log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    /// The value the reference held before the update (zero when it was
    /// newly created).
    pub old_id: ObjectId,
    /// The value the reference holds after the update.
    pub new_id: ObjectId,
    /// Free-form description of the update.
    pub message: String,
}

/// A content-addressed store of blobs, trees and commits with named,
/// logged references.
///
/// Reads and inserts are blocking; callers needing concurrency run
/// multiple filesystem instances over a shared store handle.
pub trait ObjectStore: Send + Sync {
    /// The backing directory of this store.
    fn directory(&self) -> &Path;

    /// Read the raw bytes of a blob.
    fn read_blob(&self, id: ObjectId) -> Result<Vec<u8>>;

    /// The size in bytes of a blob, without materializing it.
    fn blob_size(&self, id: ObjectId) -> Result<u64>;

    /// Read the entries of a tree.
    fn read_tree(&self, id: ObjectId) -> Result<Vec<TreeEntry>>;

    /// Read a commit.
    fn read_commit(&self, id: ObjectId) -> Result<Commit>;

    /// Insert a blob, returning its id. Identical content yields an
    /// identical id.
    fn insert_blob(&self, bytes: &[u8]) -> Result<ObjectId>;

    /// Insert a tree built from the given entries, returning its id.
    /// Entries are serialized in canonical order, so identical content
    /// yields an identical id regardless of input order.
    fn insert_tree(&self, entries: &[TreeEntry]) -> Result<ObjectId>;

    /// Insert a commit, returning its id.
    fn insert_commit(
        &self,
        tree: ObjectId,
        parents: &[ObjectId],
        author: &PersonIdent,
        committer: &PersonIdent,
        message: &str,
    ) -> Result<ObjectId>;

    /// Make previously inserted objects visible to readers.
    fn flush(&self) -> Result<()>;

    /// Resolve a reference to the id it currently points at.
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>>;

    /// Point a reference at a new id and append a reflog entry.
    ///
    /// For non-force updates the current value must equal
    /// `expected_old` (`None` meaning the reference must not exist);
    /// a mismatch fails with [`StoreError::RefLocked`](super::StoreError::RefLocked).
    fn update_ref(
        &self,
        name: &str,
        new_id: ObjectId,
        expected_old: Option<ObjectId>,
        force: bool,
        reflog_message: &str,
    ) -> Result<()>;

    /// The log of updates applied to a reference, oldest first.
    fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>>;

    /// Total size in bytes of the backing directory's volume.
    fn total_space(&self) -> Result<u64>;

    /// Bytes available to this store on the backing volume.
    fn usable_space(&self) -> Result<u64>;

    /// Unallocated bytes on the backing volume.
    fn unallocated_space(&self) -> Result<u64>;
}
