//! The directory cache and its mutation handles.
//!
//! The cache is an ordered set of `(path, mode, id)` file entries sorted
//! by path bytes. Directories are implicit: a directory exists at prefix
//! `p` exactly when some entry path starts with `p/`. Additive changes go
//! through [`DirCacheBuilder`]; path-keyed removals go through
//! [`DirCacheEditor`].

use std::collections::HashSet;

use crate::store::{FileMode, ObjectId, ObjectStore, TreeEntry};

/// A single file entry of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirCacheEntry {
    /// Full `/`-separated path of the file.
    pub path: String,
    /// File mode; never [`FileMode::Tree`] or [`FileMode::Missing`].
    pub mode: FileMode,
    /// Blob id of the file content.
    pub id: ObjectId,
}

/// A flat sorted index of the file entries of a tree.
#[derive(Debug, Default)]
pub struct DirCache {
    entries: Vec<DirCacheEntry>,
}

impl DirCache {
    /// Create an empty cache not backed by any tree.
    pub fn new_in_core() -> Self {
        DirCache {
            entries: Vec::new(),
        }
    }

    /// Build a cache holding every file reachable from the given tree.
    pub fn for_tree(store: &dyn ObjectStore, tree: ObjectId) -> crate::store::Result<Self> {
        let mut entries = Vec::new();
        collect_tree(store, tree, String::new(), &mut entries)?;
        Ok(DirCache { entries })
    }

    /// Number of entries in the cache.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn find(&self, path: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.path.as_str().cmp(path))
    }

    /// Look up the entry at an exact path.
    pub fn entry(&self, path: &str) -> Option<&DirCacheEntry> {
        self.find(path).ok().map(|idx| &self.entries[idx])
    }

    /// Tests if a file entry exists at the exact path.
    pub fn file_exists(&self, path: &str) -> bool {
        self.find(path).is_ok()
    }

    /// Update the blob id of an existing entry in place.
    ///
    /// Returns `false` if no entry exists at the path.
    pub fn set_entry_id(&mut self, path: &str, id: ObjectId) -> bool {
        match self.find(path) {
            Ok(idx) => {
                self.entries[idx].id = id;
                true
            }
            Err(_) => false,
        }
    }

    /// Tests if at least one entry lives strictly under the given prefix.
    pub fn is_non_trivial_directory(&self, path: &str) -> bool {
        if path.is_empty() {
            return !self.entries.is_empty();
        }
        !self.entries_within(path).is_empty()
    }

    /// The ordered run of entries whose paths start with `prefix + "/"`,
    /// or every entry when the prefix is empty.
    pub fn entries_within(&self, prefix: &str) -> &[DirCacheEntry] {
        if prefix.is_empty() {
            return &self.entries;
        }
        let dir_prefix = format!("{prefix}/");
        let start = self
            .entries
            .partition_point(|entry| entry.path.as_str() < dir_prefix.as_str());
        let len = self.entries[start..]
            .iter()
            .take_while(|entry| entry.path.starts_with(&dir_prefix))
            .count();
        &self.entries[start..start + len]
    }

    /// Start an additive mutation that keeps every current entry.
    pub fn builder(&mut self) -> DirCacheBuilder<'_> {
        DirCacheBuilder {
            cache: self,
            added: Vec::new(),
        }
    }

    /// Start a path-keyed removal.
    pub fn editor(&mut self) -> DirCacheEditor<'_> {
        DirCacheEditor {
            cache: self,
            removals: HashSet::new(),
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove every entry under the given directory prefix.
    pub fn delete_directory(&mut self, prefix: &str) {
        if prefix.is_empty() {
            self.entries.clear();
            return;
        }
        let dir_prefix = format!("{prefix}/");
        self.entries.retain(|entry| !entry.path.starts_with(&dir_prefix));
    }

    /// Insert or replace the entry at a path.
    pub(crate) fn put_entry(&mut self, path: &str, mode: FileMode, id: ObjectId) {
        let entry = DirCacheEntry {
            path: path.to_string(),
            mode,
            id,
        };
        match self.find(path) {
            Ok(idx) => self.entries[idx] = entry,
            Err(idx) => self.entries.insert(idx, entry),
        }
    }

    /// Remove the entry at a path and everything under it.
    pub(crate) fn remove_recursive(&mut self, path: &str) {
        if let Ok(idx) = self.find(path) {
            self.entries.remove(idx);
        }
        self.delete_directory(path);
    }

    /// Serialize the cache into nested tree objects and return the root
    /// tree id. Identical content yields an identical id.
    pub fn write_tree(&self, store: &dyn ObjectStore) -> crate::store::Result<ObjectId> {
        write_subtree(store, &self.entries, 0)
    }
}

fn collect_tree(
    store: &dyn ObjectStore,
    tree: ObjectId,
    prefix: String,
    out: &mut Vec<DirCacheEntry>,
) -> crate::store::Result<()> {
    for entry in store.read_tree(tree)? {
        let path = format!("{prefix}{}", entry.name);
        if entry.mode.is_tree() {
            collect_tree(store, entry.id, format!("{path}/"), out)?;
        } else {
            out.push(DirCacheEntry {
                path,
                mode: entry.mode,
                id: entry.id,
            });
        }
    }
    Ok(())
}

fn write_subtree(
    store: &dyn ObjectStore,
    entries: &[DirCacheEntry],
    prefix_len: usize,
) -> crate::store::Result<ObjectId> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let rest = &entries[i].path[prefix_len..];
        match rest.find('/') {
            None => {
                out.push(TreeEntry::new(rest, entries[i].mode, entries[i].id));
                i += 1;
            }
            Some(sep) => {
                let name = &rest[..sep];
                let child_prefix = &entries[i].path[..prefix_len + sep + 1];
                let count = entries[i..]
                    .iter()
                    .take_while(|entry| entry.path.starts_with(child_prefix))
                    .count();
                let subtree = write_subtree(store, &entries[i..i + count], child_prefix.len())?;
                out.push(TreeEntry::new(name, FileMode::Tree, subtree));
                i += count;
            }
        }
    }
    store.insert_tree(&out)
}

/// Additive mutation handle: preserves existing entries and adds new
/// files, replacing any entry whose path collides.
pub struct DirCacheBuilder<'a> {
    cache: &'a mut DirCache,
    added: Vec<DirCacheEntry>,
}

impl DirCacheBuilder<'_> {
    /// Stage a file to be added when the builder finishes.
    pub fn add(&mut self, path: impl Into<String>, mode: FileMode, id: ObjectId) {
        self.added.push(DirCacheEntry {
            path: path.into(),
            mode,
            id,
        });
    }

    /// Apply the staged additions to the cache.
    pub fn finish(self) {
        let mut added = self.added;
        if added.is_empty() {
            return;
        }
        added.sort_by(|a, b| a.path.cmp(&b.path));
        added.dedup_by(|later, earlier| {
            if later.path == earlier.path {
                // Last add wins.
                *earlier = later.clone();
                true
            } else {
                false
            }
        });

        let existing = std::mem::take(&mut self.cache.entries);
        let mut merged = Vec::with_capacity(existing.len() + added.len());
        let mut old = existing.into_iter().peekable();
        let mut new = added.into_iter().peekable();
        loop {
            match (old.peek(), new.peek()) {
                (Some(o), Some(n)) => {
                    if o.path < n.path {
                        merged.push(old.next().unwrap());
                    } else if o.path > n.path {
                        merged.push(new.next().unwrap());
                    } else {
                        old.next();
                        merged.push(new.next().unwrap());
                    }
                }
                (Some(_), None) => merged.push(old.next().unwrap()),
                (None, Some(_)) => merged.push(new.next().unwrap()),
                (None, None) => break,
            }
        }
        self.cache.entries = merged;
    }
}

/// Path-keyed removal handle.
pub struct DirCacheEditor<'a> {
    cache: &'a mut DirCache,
    removals: HashSet<String>,
}

impl DirCacheEditor<'_> {
    /// Stage the entry at a path for removal.
    pub fn delete(&mut self, path: impl Into<String>) {
        self.removals.insert(path.into());
    }

    /// Apply the staged removals to the cache.
    pub fn finish(self) {
        if self.removals.is_empty() {
            return;
        }
        let removals = self.removals;
        self.cache
            .entries
            .retain(|entry| !removals.contains(&entry.path));
    }
}
