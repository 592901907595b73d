//! An in-memory object store, intended primarily for testing and
//! ephemeral workspaces.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::commit::{decode_commit, encode_commit};
use super::object_store::{ObjectStore, ReflogEntry};
use super::tree::{decode_tree, encode_tree};
use super::{Commit, ObjectId, ObjectKind, PersonIdent, Result, StoreError, TreeEntry};

/// Default capacity reported through the space attributes.
pub const DEFAULT_CAPACITY: u64 = 1 << 30;

struct RefState {
    id: ObjectId,
    reflog: Vec<ReflogEntry>,
}

/// An in-memory implementation of [`ObjectStore`].
///
/// Objects live in a hash map keyed by id; references keep their full
/// update log. The space attributes report against a fixed capacity.
pub struct MemoryStore {
    directory: PathBuf,
    capacity: u64,
    objects: RwLock<HashMap<ObjectId, (ObjectKind, Vec<u8>)>>,
    refs: RwLock<HashMap<String, RefState>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new empty in-memory store with the given capacity for
    /// the space attributes.
    pub fn with_capacity(capacity: u64) -> Self {
        MemoryStore {
            directory: PathBuf::from(":memory:"),
            capacity,
            objects: RwLock::new(HashMap::new()),
            refs: RwLock::new(HashMap::new()),
        }
    }

    /// Total size in bytes of the stored object bodies.
    pub fn used_space(&self) -> u64 {
        let objects = self.objects.read().unwrap();
        objects.values().map(|(_, body)| body.len() as u64).sum()
    }

    fn read_body(&self, id: ObjectId, kind: ObjectKind) -> Result<Vec<u8>> {
        let objects = self.objects.read().unwrap();
        let (stored_kind, body) = objects.get(&id).ok_or(StoreError::NotFound(id))?;
        if *stored_kind != kind {
            return Err(StoreError::InvalidObject(format!(
                "{id} is a {}, not a {}",
                stored_kind.as_str(),
                kind.as_str()
            )));
        }
        Ok(body.clone())
    }

    fn insert_object(&self, kind: ObjectKind, body: Vec<u8>) -> Result<ObjectId> {
        let id = ObjectId::hash_object(kind, &body);
        let mut objects = self.objects.write().unwrap();
        objects.entry(id).or_insert((kind, body));
        Ok(id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn directory(&self) -> &Path {
        &self.directory
    }

    fn read_blob(&self, id: ObjectId) -> Result<Vec<u8>> {
        self.read_body(id, ObjectKind::Blob)
    }

    fn blob_size(&self, id: ObjectId) -> Result<u64> {
        let objects = self.objects.read().unwrap();
        match objects.get(&id) {
            Some((ObjectKind::Blob, body)) => Ok(body.len() as u64),
            Some((kind, _)) => Err(StoreError::InvalidObject(format!(
                "{id} is a {}, not a blob",
                kind.as_str()
            ))),
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn read_tree(&self, id: ObjectId) -> Result<Vec<TreeEntry>> {
        decode_tree(&self.read_body(id, ObjectKind::Tree)?)
    }

    fn read_commit(&self, id: ObjectId) -> Result<Commit> {
        decode_commit(id, &self.read_body(id, ObjectKind::Commit)?)
    }

    fn insert_blob(&self, bytes: &[u8]) -> Result<ObjectId> {
        self.insert_object(ObjectKind::Blob, bytes.to_vec())
    }

    fn insert_tree(&self, entries: &[TreeEntry]) -> Result<ObjectId> {
        self.insert_object(ObjectKind::Tree, encode_tree(entries))
    }

    fn insert_commit(
        &self,
        tree: ObjectId,
        parents: &[ObjectId],
        author: &PersonIdent,
        committer: &PersonIdent,
        message: &str,
    ) -> Result<ObjectId> {
        let body = encode_commit(tree, parents, author, committer, message);
        self.insert_object(ObjectKind::Commit, body)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        let refs = self.refs.read().unwrap();
        Ok(refs.get(name).map(|state| state.id))
    }

    fn update_ref(
        &self,
        name: &str,
        new_id: ObjectId,
        expected_old: Option<ObjectId>,
        force: bool,
        reflog_message: &str,
    ) -> Result<()> {
        let mut refs = self.refs.write().unwrap();
        let current = refs.get(name).map(|state| state.id);
        if !force && current != expected_old {
            return Err(StoreError::RefLocked(name.to_string()));
        }
        let entry = ReflogEntry {
            old_id: current.unwrap_or_else(ObjectId::zero),
            new_id,
            message: reflog_message.to_string(),
        };
        let state = refs.entry(name.to_string()).or_insert(RefState {
            id: new_id,
            reflog: Vec::new(),
        });
        state.id = new_id;
        state.reflog.push(entry);
        Ok(())
    }

    fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        let refs = self.refs.read().unwrap();
        Ok(refs
            .get(name)
            .map(|state| state.reflog.clone())
            .unwrap_or_default())
    }

    fn total_space(&self) -> Result<u64> {
        Ok(self.capacity)
    }

    fn usable_space(&self) -> Result<u64> {
        Ok(self.capacity.saturating_sub(self.used_space()))
    }

    fn unallocated_space(&self) -> Result<u64> {
        self.usable_space()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileMode;

    #[test]
    fn test_blob_roundtrip() {
        let store = MemoryStore::new();
        let id = store.insert_blob(b"hello world").unwrap();
        assert_eq!(store.read_blob(id).unwrap(), b"hello world");
        assert_eq!(store.blob_size(id).unwrap(), 11);
    }

    #[test]
    fn test_identical_content_identical_id() {
        let store = MemoryStore::new();
        let a = store.insert_blob(b"same").unwrap();
        let b = store.insert_blob(b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_read_nonexistent_object() {
        let store = MemoryStore::new();
        let missing = ObjectId::hash_object(ObjectKind::Blob, b"never inserted");
        assert!(matches!(
            store.read_blob(missing),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let store = MemoryStore::new();
        let id = store.insert_blob(b"data").unwrap();
        assert!(matches!(
            store.read_tree(id),
            Err(StoreError::InvalidObject(_))
        ));
    }

    #[test]
    fn test_tree_roundtrip() {
        let store = MemoryStore::new();
        let blob = store.insert_blob(b"content").unwrap();
        let tree = store
            .insert_tree(&[TreeEntry::new("f.txt", FileMode::RegularFile, blob)])
            .unwrap();
        let entries = store.read_tree(tree).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "f.txt");
        assert_eq!(entries[0].id, blob);
    }

    #[test]
    fn test_update_ref_validates_expected_old() {
        let store = MemoryStore::new();
        let id1 = store.insert_blob(b"1").unwrap();
        let id2 = store.insert_blob(b"2").unwrap();

        store
            .update_ref("refs/heads/main", id1, None, false, "created")
            .unwrap();
        assert_eq!(store.resolve_ref("refs/heads/main").unwrap(), Some(id1));

        // Wrong expected-old is rejected without force.
        let result = store.update_ref("refs/heads/main", id2, Some(id2), false, "bad");
        assert!(matches!(result, Err(StoreError::RefLocked(_))));

        // Force bypasses the validation.
        store
            .update_ref("refs/heads/main", id2, None, true, "forced")
            .unwrap();
        assert_eq!(store.resolve_ref("refs/heads/main").unwrap(), Some(id2));
    }

    #[test]
    fn test_reflog_records_updates_in_order() {
        let store = MemoryStore::new();
        let id1 = store.insert_blob(b"1").unwrap();
        let id2 = store.insert_blob(b"2").unwrap();
        store
            .update_ref("refs/heads/main", id1, None, false, "first")
            .unwrap();
        store
            .update_ref("refs/heads/main", id2, Some(id1), false, "second")
            .unwrap();

        let log = store.reflog("refs/heads/main").unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].old_id.is_zero());
        assert_eq!(log[0].new_id, id1);
        assert_eq!(log[1].old_id, id1);
        assert_eq!(log[1].message, "second");
    }

    #[test]
    fn test_space_attributes() {
        let store = MemoryStore::with_capacity(1000);
        assert_eq!(store.total_space().unwrap(), 1000);
        store.insert_blob(&[0u8; 100]).unwrap();
        assert_eq!(store.usable_space().unwrap(), 900);
        assert_eq!(store.unallocated_space().unwrap(), 900);
    }
}
