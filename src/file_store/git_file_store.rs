//! The staging engine: file operations over a base tree with in-memory
//! overlays, and write-out of the staged state as new trees and commits.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::dir_cache::DirCache;
use crate::store::{
    amend_branch_head, commit_branch_head, ensure_branch_ref_name, init_branch_head, walk_tree,
    Commit, FileMode, ObjectId, ObjectStore, PersonIdent,
};

use super::dir_stream::{DirStreamEntry, DirectoryStream, StreamToken};
use super::{FsState, GitFsError, MemoryChannel, OpenOptions, Result, SeekableByteChannel};

/// Store type reported while a branch reference is present.
pub const ATTACHED: &str = "attached";
/// Store type reported without a branch reference.
pub const DETACHED: &str = "detached";

/// An in-memory mutable filesystem over a base tree of an object store.
///
/// A single exclusive lock serializes every public operation; inside the
/// lock operations are straight-line and run to completion. Blocking
/// object store I/O while the lock is held is tolerated. Callers needing
/// concurrency run multiple instances over a shared store handle.
pub struct GitFileStore {
    store: Arc<dyn ObjectStore>,
    inner: Arc<Mutex<FsInner>>,
}

/// The single consistency domain guarded by the filesystem lock:
/// overlays, cache, channel table and stream registry.
pub(crate) struct FsInner {
    branch: Option<String>,
    base_commit: Option<Commit>,
    base_tree: Option<ObjectId>,
    cache: Option<DirCache>,
    channels: HashMap<String, Arc<MemoryChannel>>,
    dir_streams: HashMap<String, Vec<Arc<StreamToken>>>,
    insertions: Option<HashMap<String, ObjectId>>,
    inserted_dirs: Option<HashSet<String>>,
    deletions: Option<HashSet<String>>,
    deleted_dirs: Option<HashMap<String, usize>>,
    state: FsState,
    closed: bool,
}

impl GitFileStore {
    /// Create a filesystem over the given store.
    ///
    /// With a base commit, reads resolve against its tree (or the
    /// explicit `base_tree` override) until the first mutation builds
    /// the cache. Without one, the filesystem starts from an empty
    /// in-core cache. A branch name attaches commits to that branch.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        branch: Option<&str>,
        base_commit: Option<ObjectId>,
        base_tree: Option<ObjectId>,
    ) -> Result<Self> {
        let branch = branch.map(ensure_branch_ref_name);
        let mut commit = None;
        let mut cache = None;
        if let Some(id) = base_commit {
            commit = Some(store.read_commit(id)?);
        } else {
            cache = Some(DirCache::new_in_core());
        }
        let base_tree = base_tree.or_else(|| commit.as_ref().map(|c| c.tree));
        Ok(GitFileStore {
            store,
            inner: Arc::new(Mutex::new(FsInner {
                branch,
                base_commit: commit,
                base_tree,
                cache,
                channels: HashMap::new(),
                dir_streams: HashMap::new(),
                insertions: None,
                inserted_dirs: None,
                deletions: None,
                deleted_dirs: None,
                state: FsState::Normal,
                closed: false,
            })),
        })
    }

    /// Open a filesystem attached to a branch, based at its current head
    /// commit. An absent branch yields an empty attached filesystem
    /// whose first commit initializes the branch.
    pub fn open_branch(store: Arc<dyn ObjectStore>, branch: &str) -> Result<Self> {
        let ref_name = ensure_branch_ref_name(branch);
        let head = store.resolve_ref(&ref_name)?;
        Self::new(store, Some(branch), head, None)
    }

    fn lock(&self) -> MutexGuard<'_, FsInner> {
        self.inner.lock().unwrap()
    }

    /// The object store this filesystem persists into.
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Tests if a regular file exists at the path. The root is never a
    /// regular file.
    pub fn is_regular_file(&self, path: &str) -> Result<bool> {
        let inner = self.lock();
        inner.check_closed()?;
        inner.is_regular_file(&*self.store, path)
    }

    /// Tests if a non-trivial directory exists at the path. The root is
    /// always a directory.
    pub fn is_directory(&self, path: &str) -> Result<bool> {
        let inner = self.lock();
        inner.check_closed()?;
        inner.is_directory(&*self.store, path)
    }

    /// The currently staged blob id of a file, or `None` if the path is
    /// a directory. Fails with [`GitFsError::NoSuchFile`] if neither
    /// exists.
    pub fn file_blob_id(&self, path: &str) -> Result<Option<ObjectId>> {
        let inner = self.lock();
        inner.check_closed()?;
        inner.file_blob_id(&*self.store, path)
    }

    /// A file's size in bytes; an open memory channel takes precedence
    /// over the stored blob. Directories report zero.
    pub fn file_size(&self, path: &str) -> Result<u64> {
        let inner = self.lock();
        inner.check_closed()?;
        if let Some(channel) = inner.channels.get(path) {
            return Ok(channel.size());
        }
        match inner.file_blob_id(&*self.store, path)? {
            None => Ok(0),
            Some(id) => Ok(self.store.blob_size(id)?),
        }
    }

    /// Tests if the file at the path has unpersisted channel content.
    pub fn is_dirty(&self, path: &str) -> Result<bool> {
        let inner = self.lock();
        inner.check_closed()?;
        Ok(inner
            .channels
            .get(path)
            .map_or(false, |channel| channel.is_modified()))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a file pointing at an existing blob, or fail if it cannot
    /// be created safely.
    pub fn create_file_with_blob(
        &self,
        path: &str,
        blob: ObjectId,
        replace_existing: bool,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.check_closed()?;
        inner.initialize_cache(&*self.store)?;
        inner.safely_create_file_with_blob(&*self.store, path, blob, replace_existing)
    }

    /// Delete a regular file.
    pub fn delete(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.check_closed()?;
        inner.initialize_cache(&*self.store)?;
        inner.check_ancestor_streams(path, false)?;
        if inner.is_regular_file(&*self.store, path)? {
            inner.delete_file(path)
        } else if inner.is_directory(&*self.store, path)? {
            Err(GitFsError::DirectoryNotEmpty(path.to_string()))
        } else {
            Err(GitFsError::NoSuchFile(path.to_string()))
        }
    }

    /// Drop every cache entry under a directory, bypassing the staged
    /// deletion bookkeeping.
    pub fn fast_delete_directory(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.check_closed()?;
        inner.initialize_cache(&*self.store)?;
        inner.flush_staged_changes();
        if let Some(cache) = inner.cache.as_mut() {
            cache.delete_directory(path);
        }
        Ok(())
    }

    /// Copy a file to a target path. Copying a path onto itself, or
    /// copying a directory, has no effect.
    pub fn copy(&self, source: &str, target: &str, replace_existing: bool) -> Result<()> {
        if source == target {
            return Ok(());
        }
        let mut inner = self.lock();
        inner.check_closed()?;
        inner.initialize_cache(&*self.store)?;
        let Some(blob) = inner.file_blob_id(&*self.store, source)? else {
            return Ok(());
        };
        inner.safely_create_file_with_blob(&*self.store, target, blob, replace_existing)?;
        inner.clone_channel(source, target);
        Ok(())
    }

    /// Move or rename a file or directory to a target path.
    ///
    /// The target may not lie inside a moved directory. Moving a
    /// directory restages every child at its rewritten path and then
    /// deletes the old paths.
    pub fn rename(&self, source: &str, target: &str, replace_existing: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.check_closed()?;
        inner.initialize_cache(&*self.store)?;

        let source_blob = inner.file_blob_id(&*self.store, source)?;
        let source_is_directory = source_blob.is_none();
        inner.check_ancestor_streams(source, source_is_directory)?;

        if target == source {
            return Ok(());
        }
        if target.starts_with(&format!("{source}/")) {
            return Err(GitFsError::AccessDenied(target.to_string()));
        }

        let target_exists = inner.check_file_exist(&*self.store, target, replace_existing)?;
        if target_exists {
            inner.check_ancestor_streams(target, false)?;
            inner.try_remove_memory_channel(target)?;
        }

        match source_blob {
            Some(blob) => {
                inner.set_file_object_id(target, blob);
                inner.clone_channel(source, target);
                inner.delete_file(source)?;
            }
            None => {
                if target_exists {
                    inner.delete_file(target)?;
                }
                inner.flush_staged_changes();
                let children = inner.cache_entries_within(source);
                let source_prefix = format!("{source}/");
                let target_prefix = format!("{target}/");
                let mut old_paths = Vec::with_capacity(children.len());
                for (old_path, id) in children {
                    let relative = &old_path[source_prefix.len()..];
                    let new_path = format!("{target_prefix}{relative}");
                    inner.set_file_object_id(&new_path, id);
                    inner.clone_channel(&old_path, &new_path);
                    old_paths.push(old_path);
                }
                for old_path in old_paths {
                    inner.delete_file(&old_path)?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Channels and streams
    // =========================================================================

    /// Open or create a file, returning a seekable handle on its memory
    /// channel.
    ///
    /// A read-only open against an untouched filesystem is served
    /// straight from the base tree without allocating the cache.
    pub fn new_byte_channel(&self, path: &str, options: OpenOptions) -> Result<SeekableByteChannel> {
        let read_only = options.is_read_only();
        let mut inner = self.lock();
        inner.check_closed()?;
        if !read_only {
            inner.initialize_cache(&*self.store)?;
        }

        let channel = match inner.channels.get(path).cloned() {
            Some(existing) => {
                if options.create_new {
                    return Err(GitFsError::FileAlreadyExists(path.to_string()));
                }
                existing
            }
            None => {
                let blob_id = if read_only && inner.cache.is_none() {
                    if path.is_empty() {
                        return Err(GitFsError::AccessDenied(path.to_string()));
                    }
                    let tree = inner.base_tree_for_read()?;
                    match walk_tree(&*self.store, tree, path)? {
                        None => return Err(GitFsError::NoSuchFile(path.to_string())),
                        Some((mode, _)) if mode.is_tree() => {
                            return Err(GitFsError::AccessDenied(path.to_string()))
                        }
                        Some((_, id)) => id,
                    }
                } else {
                    inner.initialize_cache(&*self.store)?;
                    if inner.is_directory(&*self.store, path)? {
                        return Err(GitFsError::AccessDenied(path.to_string()));
                    }
                    if !inner.is_regular_file(&*self.store, path)? {
                        if !options.creates() {
                            return Err(GitFsError::NoSuchFile(path.to_string()));
                        }
                        inner.stage_file_insertion(path, ObjectId::zero());
                    } else if options.create_new {
                        return Err(GitFsError::FileAlreadyExists(path.to_string()));
                    }
                    inner.file_blob_id(&*self.store, path)?.ok_or_else(|| {
                        GitFsError::IllegalState(format!("'{path}' resolved to a directory"))
                    })?
                };
                let channel = if blob_id.is_zero() {
                    Arc::new(MemoryChannel::new(path))
                } else {
                    Arc::new(MemoryChannel::with_bytes(
                        path,
                        self.store.read_blob(blob_id)?,
                        false,
                    ))
                };
                inner.channels.insert(path.to_string(), Arc::clone(&channel));
                channel
            }
        };
        Ok(SeekableByteChannel::new(
            channel,
            Arc::downgrade(&self.inner),
            options,
        ))
    }

    /// Open a directory, returning an iterator over a snapshot of its
    /// immediate children. Staged changes are flushed first so the
    /// snapshot is complete.
    pub fn new_directory_stream(
        &self,
        path: &str,
        filter: Option<&dyn Fn(&DirStreamEntry) -> bool>,
    ) -> Result<DirectoryStream> {
        let mut inner = self.lock();
        inner.check_closed()?;

        let mut entries = if inner.cache.is_some() {
            inner.flush_staged_changes();
            if !path.is_empty() && !inner.is_directory(&*self.store, path)? {
                if inner.is_regular_file(&*self.store, path)? {
                    return Err(GitFsError::NotADirectory(path.to_string()));
                }
                return Err(GitFsError::NoSuchFile(path.to_string()));
            }
            inner.cache_children(path)
        } else {
            let tree = inner.base_tree_for_read()?;
            let dir_tree = if path.is_empty() {
                tree
            } else {
                match walk_tree(&*self.store, tree, path)? {
                    None => return Err(GitFsError::NoSuchFile(path.to_string())),
                    Some((mode, id)) if mode.is_tree() => id,
                    Some(_) => return Err(GitFsError::NotADirectory(path.to_string())),
                }
            };
            self.store
                .read_tree(dir_tree)?
                .into_iter()
                .map(|entry| DirStreamEntry {
                    name: entry.name,
                    mode: entry.mode,
                })
                .collect()
        };
        if let Some(filter) = filter {
            entries.retain(|entry| filter(entry));
        }

        let token = Arc::new(StreamToken::new());
        inner
            .dir_streams
            .entry(path.to_string())
            .or_default()
            .push(Arc::clone(&token));
        Ok(DirectoryStream::new(
            path,
            entries,
            token,
            Arc::downgrade(&self.inner),
        ))
    }

    // =========================================================================
    // Write-out
    // =========================================================================

    /// Persist the staged state as a new tree, making it the base tree.
    ///
    /// Returns `None` when nothing changed: the cache was never
    /// allocated, or the new tree equals the current base tree. Modified
    /// channels are flushed as blobs under their buffer locks; flushed
    /// channels without attached handles are dropped, the rest reset to
    /// unmodified.
    pub fn write_and_update_tree(&self) -> Result<Option<ObjectId>> {
        let mut inner = self.lock();
        inner.check_closed()?;
        inner.write_and_update_tree(&*self.store)
    }

    /// Persist the staged state as a new commit, making it the base
    /// commit and advancing the attached branch if any.
    ///
    /// Returns `None` when [`write_and_update_tree`](Self::write_and_update_tree)
    /// produced no new tree. Amending reuses the base commit's parents
    /// and force-updates the branch; amending without a base commit is
    /// an illegal state.
    pub fn write_and_update_commit(
        &self,
        author: &PersonIdent,
        committer: &PersonIdent,
        message: &str,
        amend: bool,
    ) -> Result<Option<Commit>> {
        let mut inner = self.lock();
        inner.check_closed()?;

        let Some(new_tree) = inner.write_and_update_tree(&*self.store)? else {
            return Ok(None);
        };

        let parents: Vec<ObjectId> = if amend {
            let base = inner.base_commit.as_ref().ok_or_else(|| {
                GitFsError::IllegalState("cannot amend without a base commit".to_string())
            })?;
            base.parents.clone()
        } else {
            inner
                .base_commit
                .as_ref()
                .map(|commit| vec![commit.id])
                .unwrap_or_default()
        };

        let commit_id = self
            .store
            .insert_commit(new_tree, &parents, author, committer, message)?;
        self.store.flush()?;
        let new_commit = self.store.read_commit(commit_id)?;

        if let Some(branch) = &inner.branch {
            let short = new_commit.short_message();
            if inner.base_commit.is_none() {
                init_branch_head(&*self.store, branch, commit_id, short)?;
            } else if amend {
                amend_branch_head(&*self.store, branch, commit_id, short)?;
            } else {
                commit_branch_head(&*self.store, branch, commit_id, short)?;
            }
        }
        inner.base_commit = Some(new_commit.clone());
        debug!(commit = %commit_id, amend, "created commit");
        Ok(Some(new_commit))
    }

    // =========================================================================
    // Lifecycle and attributes
    // =========================================================================

    /// Close this filesystem, terminating every open channel and stream.
    /// Closing an already-closed filesystem has no effect; all
    /// subsequent operations fail with [`GitFsError::Closed`].
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        for channel in inner.channels.values() {
            channel.close();
        }
        inner.channels.clear();
        for tokens in inner.dir_streams.values() {
            for token in tokens {
                token.close();
            }
        }
        inner.dir_streams.clear();
        inner.cache = None;
        inner.insertions = None;
        inner.inserted_dirs = None;
        inner.deletions = None;
        inner.deleted_dirs = None;
        debug!("filesystem closed");
    }

    /// Tells if this filesystem is open.
    pub fn is_open(&self) -> bool {
        !self.lock().closed
    }

    /// The full reference name of the attached branch, if any.
    pub fn branch(&self) -> Option<String> {
        self.lock().branch.clone()
    }

    /// The commit this filesystem is based on, if any.
    pub fn base_commit(&self) -> Option<Commit> {
        self.lock().base_commit.clone()
    }

    /// The id of the tree this filesystem is based on, if any.
    pub fn base_tree(&self) -> Option<ObjectId> {
        self.lock().base_tree
    }

    /// The lifecycle phase tag. The core never transitions this itself.
    pub fn state(&self) -> FsState {
        self.lock().state
    }

    /// Record a new lifecycle phase tag.
    pub fn set_state(&self, state: FsState) {
        self.lock().state = state;
    }

    /// The name of this file store: the repository directory, branch
    /// reference, base commit and base tree joined by colons. Absent
    /// parts are empty; the colons are always present.
    pub fn name(&self) -> String {
        let inner = self.lock();
        let mut name = self.store.directory().display().to_string();
        name.push(':');
        if let Some(branch) = &inner.branch {
            name.push_str(branch);
        }
        name.push(':');
        if let Some(commit) = &inner.base_commit {
            name.push_str(&commit.id.hex());
        }
        name.push(':');
        if let Some(tree) = &inner.base_tree {
            name.push_str(&tree.hex());
        }
        name
    }

    /// `"attached"` when a branch reference is present, `"detached"`
    /// otherwise.
    pub fn store_type(&self) -> &'static str {
        if self.lock().branch.is_some() {
            ATTACHED
        } else {
            DETACHED
        }
    }

    /// A file store supports both read and write access.
    pub fn is_read_only(&self) -> bool {
        false
    }

    /// Total size in bytes of the backing volume.
    pub fn total_space(&self) -> Result<u64> {
        Ok(self.store.total_space()?)
    }

    /// Bytes available on the backing volume.
    pub fn usable_space(&self) -> Result<u64> {
        Ok(self.store.usable_space()?)
    }

    /// Unallocated bytes on the backing volume.
    pub fn unallocated_space(&self) -> Result<u64> {
        Ok(self.store.unallocated_space()?)
    }

    /// Read a file store attribute by name.
    pub fn attribute(&self, name: &str) -> Result<u64> {
        match name {
            "totalSpace" => self.total_space(),
            "usableSpace" => self.usable_space(),
            "unallocatedSpace" => self.unallocated_space(),
            other => Err(GitFsError::UnsupportedAttribute(other.to_string())),
        }
    }

    // =========================================================================
    // Merge support
    // =========================================================================

    /// Bring the cache up to date so a merger can write into it.
    pub(crate) fn prepare_merge(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.check_closed()?;
        inner.initialize_cache(&*self.store)?;
        inner.flush_staged_changes();
        Ok(())
    }

    /// Replace whatever lives at the path with an entry of the given
    /// mode. Tree modes are expanded into their file entries.
    pub(crate) fn merge_put(&self, path: &str, mode: FileMode, id: ObjectId) -> Result<()> {
        if mode.is_tree() {
            let subtree = DirCache::for_tree(&*self.store, id)?;
            let mut inner = self.lock();
            let cache = inner.cache_mut()?;
            cache.remove_recursive(path);
            for entry in subtree.entries_within("") {
                cache.put_entry(&format!("{path}/{}", entry.path), entry.mode, entry.id);
            }
        } else {
            let mut inner = self.lock();
            let cache = inner.cache_mut()?;
            cache.remove_recursive(path);
            cache.put_entry(path, mode, id);
        }
        Ok(())
    }

    /// Remove whatever lives at the path.
    pub(crate) fn merge_remove(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.cache_mut()?.remove_recursive(path);
        Ok(())
    }

    /// Make sure the path can act as a directory, removing a
    /// non-directory entry that stands in the way.
    pub(crate) fn merge_ensure_directory(&self, path: &str) -> Result<()> {
        let mut inner = self.lock();
        let cache = inner.cache_mut()?;
        if cache.file_exists(path) {
            cache.remove_recursive(path);
        }
        Ok(())
    }
}

impl FsInner {
    fn check_closed(&self) -> Result<()> {
        if self.closed {
            return Err(GitFsError::Closed);
        }
        Ok(())
    }

    fn base_tree_for_read(&self) -> Result<ObjectId> {
        self.base_tree.ok_or_else(|| {
            GitFsError::IllegalState("no cache and no base tree to read from".to_string())
        })
    }

    fn cache_mut(&mut self) -> Result<&mut DirCache> {
        self.cache
            .as_mut()
            .ok_or_else(|| GitFsError::IllegalState("cache is not initialized".to_string()))
    }

    /// Build the cache from the base tree on the first mutation. Once
    /// built, the cache (plus overlays) is the sole source of truth.
    fn initialize_cache(&mut self, store: &dyn ObjectStore) -> Result<()> {
        if self.cache.is_some() {
            return Ok(());
        }
        let tree = self.base_tree_for_read()?;
        self.cache = Some(DirCache::for_tree(store, tree)?);
        Ok(())
    }

    fn is_regular_file(&self, store: &dyn ObjectStore, path: &str) -> Result<bool> {
        if path.is_empty() {
            return Ok(false);
        }
        if let Some(deletions) = &self.deletions {
            if deletions.contains(path) {
                return Ok(false);
            }
        }
        if let Some(insertions) = &self.insertions {
            if insertions.contains_key(path) {
                return Ok(true);
            }
        }
        if let Some(cache) = &self.cache {
            return Ok(cache.file_exists(path));
        }
        let tree = self.base_tree_for_read()?;
        Ok(matches!(
            walk_tree(store, tree, path)?,
            Some((mode, _)) if !mode.is_tree()
        ))
    }

    fn is_directory(&self, store: &dyn ObjectStore, path: &str) -> Result<bool> {
        if path.is_empty() {
            return Ok(true);
        }
        if let Some(deleted_dirs) = &self.deleted_dirs {
            if deleted_dirs.get(path) == Some(&0) {
                return Ok(false);
            }
        }
        if let Some(inserted_dirs) = &self.inserted_dirs {
            if inserted_dirs.contains(path) {
                return Ok(true);
            }
        }
        if let Some(cache) = &self.cache {
            return Ok(cache.is_non_trivial_directory(path));
        }
        let tree = self.base_tree_for_read()?;
        Ok(matches!(
            walk_tree(store, tree, path)?,
            Some((mode, _)) if mode.is_tree()
        ))
    }

    fn file_blob_id(&self, store: &dyn ObjectStore, path: &str) -> Result<Option<ObjectId>> {
        if let Some(insertions) = &self.insertions {
            if let Some(id) = insertions.get(path) {
                return Ok(Some(*id));
            }
        }
        if self.is_directory(store, path)? {
            return Ok(None);
        }
        let found = match &self.cache {
            Some(cache) => cache.entry(path).map(|entry| entry.id),
            None => {
                let tree = self.base_tree_for_read()?;
                walk_tree(store, tree, path)?.map(|(_, id)| id)
            }
        };
        match found {
            Some(id) => Ok(Some(id)),
            None => Err(GitFsError::NoSuchFile(path.to_string())),
        }
    }

    // =========================================================================
    // Overlay mechanics
    // =========================================================================

    /// Stage an insertion, flushing any staged deletions first so only
    /// one overlay kind is pending at a time.
    fn stage_file_insertion(&mut self, path: &str, blob: ObjectId) {
        self.flush_deletions();
        if self.insertions.is_none() || self.inserted_dirs.is_none() {
            self.insertions = Some(HashMap::new());
            self.inserted_dirs = Some(HashSet::new());
        }
        if let (Some(insertions), Some(inserted_dirs)) =
            (&mut self.insertions, &mut self.inserted_dirs)
        {
            insertions.insert(path.to_string(), blob);
            let mut current = path;
            while let Some(idx) = current.rfind('/') {
                current = &current[..idx];
                // Shorter ancestors are already covered by a prior staging.
                if !inserted_dirs.insert(current.to_string()) {
                    break;
                }
            }
        }
    }

    /// Stage a deletion, flushing any staged insertions first. Every
    /// ancestor keeps a count of cache entries still present beneath it;
    /// a counter hitting zero marks the directory as emptied.
    fn stage_file_deletion(&mut self, path: &str) -> Result<()> {
        self.flush_insertions();
        if self.deletions.is_none() || self.deleted_dirs.is_none() {
            self.deletions = Some(HashSet::new());
            self.deleted_dirs = Some(HashMap::new());
        }
        let cache = match &self.cache {
            Some(cache) => cache,
            None => {
                return Err(GitFsError::IllegalState(
                    "deletion staged without a cache".to_string(),
                ))
            }
        };
        if let (Some(deletions), Some(deleted_dirs)) = (&mut self.deletions, &mut self.deleted_dirs)
        {
            deletions.insert(path.to_string());
            let mut current = path;
            while let Some(idx) = current.rfind('/') {
                current = &current[..idx];
                let remain = match deleted_dirs.entry(current.to_string()) {
                    Entry::Occupied(occupied) => occupied.into_mut(),
                    Entry::Vacant(vacant) => vacant.insert(cache.entries_within(current).len()),
                };
                if *remain == 0 {
                    return Err(GitFsError::IllegalState(format!(
                        "deletion counter underflow at '{current}'"
                    )));
                }
                *remain -= 1;
            }
        }
        Ok(())
    }

    /// Apply staged insertions to the cache as regular files.
    fn flush_insertions(&mut self) {
        if let Some(insertions) = self.insertions.take() {
            let count = insertions.len();
            if let Some(cache) = self.cache.as_mut() {
                let mut builder = cache.builder();
                for (path, id) in insertions {
                    builder.add(path, FileMode::RegularFile, id);
                }
                builder.finish();
            }
            self.inserted_dirs = None;
            trace!(count, "flushed staged insertions");
        }
    }

    /// Apply staged deletions to the cache.
    fn flush_deletions(&mut self) {
        if let Some(deletions) = self.deletions.take() {
            let count = deletions.len();
            if let Some(cache) = self.cache.as_mut() {
                let mut editor = cache.editor();
                for path in deletions {
                    editor.delete(path);
                }
                editor.finish();
            }
            trace!(count, "flushed staged deletions");
        }
    }

    /// Apply all staged changes to the cache, insertions first.
    fn flush_staged_changes(&mut self) {
        self.flush_insertions();
        self.flush_deletions();
    }

    // =========================================================================
    // Internal file operations
    // =========================================================================

    /// Check whether the target exists and, if so, whether it may be
    /// replaced. Returns true for an existing regular file.
    fn check_file_exist(
        &self,
        store: &dyn ObjectStore,
        path: &str,
        replace_existing: bool,
    ) -> Result<bool> {
        let is_directory = self.is_directory(store, path)?;
        let is_file = !is_directory && self.is_regular_file(store, path)?;

        if !replace_existing {
            if is_directory || is_file {
                return Err(GitFsError::FileAlreadyExists(path.to_string()));
            }
        } else if is_directory {
            return Err(GitFsError::DirectoryNotEmpty(path.to_string()));
        }
        Ok(is_file)
    }

    /// Drop the memory channel at the path, refusing while a handle is
    /// attached.
    fn try_remove_memory_channel(&mut self, path: &str) -> Result<()> {
        if let Some(channel) = self.channels.get(path) {
            if channel.attached_count() != 0 {
                return Err(GitFsError::AccessDenied(path.to_string()));
            }
            self.channels.remove(path);
        }
        Ok(())
    }

    /// Point the file at a new blob, creating the entry if it does not
    /// exist yet.
    fn set_file_object_id(&mut self, path: &str, id: ObjectId) {
        debug_assert!(self
            .deletions
            .as_ref()
            .map_or(true, |deletions| !deletions.contains(path)));
        let updated = self
            .cache
            .as_mut()
            .map_or(false, |cache| cache.set_entry_id(path, id));
        if !updated {
            self.stage_file_insertion(path, id);
        }
    }

    fn safely_create_file_with_blob(
        &mut self,
        store: &dyn ObjectStore,
        path: &str,
        id: ObjectId,
        replace_existing: bool,
    ) -> Result<()> {
        let exists = self.check_file_exist(store, path, replace_existing)?;
        self.check_ancestor_streams(path, false)?;
        if exists {
            self.try_remove_memory_channel(path)?;
        }
        self.set_file_object_id(path, id);
        Ok(())
    }

    /// Delete a regular file: close and drop its channel (refusing while
    /// attached), then stage the deletion. Stream checks are up to the
    /// caller.
    fn delete_file(&mut self, path: &str) -> Result<()> {
        if let Some(channel) = self.channels.get(path) {
            if channel.attached_count() != 0 {
                return Err(GitFsError::AccessDenied(path.to_string()));
            }
            channel.close();
            self.channels.remove(path);
        }
        self.stage_file_deletion(path)
    }

    /// Duplicate the source channel's bytes into a fresh channel at the
    /// target path. A modified source yields a modified clone so its
    /// content is flushed on the next write-out.
    fn clone_channel(&mut self, source: &str, target: &str) {
        if let Some(source_channel) = self.channels.get(source) {
            let bytes = source_channel.lock_buffer().to_vec();
            let modified = source_channel.is_modified();
            let channel = Arc::new(MemoryChannel::with_bytes(target, bytes, modified));
            self.channels.insert(target.to_string(), channel);
        }
    }

    /// Refuse the mutation if the path itself (when inclusive) or any
    /// ancestor directory, the root included, has an open stream.
    fn check_ancestor_streams(&self, path: &str, inclusive: bool) -> Result<()> {
        if self.dir_streams.is_empty() {
            return Ok(());
        }
        if inclusive && self.dir_streams.contains_key(path) {
            return Err(GitFsError::AccessDenied(path.to_string()));
        }
        let mut current = path;
        loop {
            let parent = match current.rfind('/') {
                Some(idx) => &current[..idx],
                None => "",
            };
            if self.dir_streams.contains_key(parent) {
                return Err(GitFsError::AccessDenied(path.to_string()));
            }
            if parent.is_empty() {
                break;
            }
            current = parent;
        }
        Ok(())
    }

    /// The immediate children of a directory as seen by the cache.
    fn cache_children(&self, path: &str) -> Vec<DirStreamEntry> {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return Vec::new(),
        };
        let prefix_len = if path.is_empty() { 0 } else { path.len() + 1 };
        let mut out: Vec<DirStreamEntry> = Vec::new();
        for entry in cache.entries_within(path) {
            let rest = &entry.path[prefix_len..];
            match rest.find('/') {
                None => out.push(DirStreamEntry {
                    name: rest.to_string(),
                    mode: entry.mode,
                }),
                Some(sep) => {
                    let name = &rest[..sep];
                    if out.last().map_or(true, |prev| prev.name != name) {
                        out.push(DirStreamEntry {
                            name: name.to_string(),
                            mode: FileMode::Tree,
                        });
                    }
                }
            }
        }
        out
    }

    fn cache_entries_within(&self, prefix: &str) -> Vec<(String, ObjectId)> {
        self.cache
            .as_ref()
            .map(|cache| {
                cache
                    .entries_within(prefix)
                    .iter()
                    .map(|entry| (entry.path.clone(), entry.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop the channel if it is unmodified with no attached handles.
    pub(crate) fn garbage_collect_channel(&mut self, channel: &Arc<MemoryChannel>) {
        if !channel.is_modified() && channel.attached_count() == 0 {
            channel.close();
            self.channels.remove(channel.path());
        }
    }

    pub(crate) fn remove_directory_stream(&mut self, path: &str, token: &Arc<StreamToken>) {
        if self.closed {
            return;
        }
        if let Some(tokens) = self.dir_streams.get_mut(path) {
            if let Some(idx) = tokens.iter().position(|t| Arc::ptr_eq(t, token)) {
                tokens.remove(idx);
            }
            if tokens.is_empty() {
                self.dir_streams.remove(path);
            }
        }
    }

    /// Flush overlays and modified channels, then write the cache out as
    /// a tree. Returns `None` when the result equals the base tree.
    fn write_and_update_tree(&mut self, store: &dyn ObjectStore) -> Result<Option<ObjectId>> {
        if self.cache.is_none() {
            return Ok(None);
        }
        self.flush_staged_changes();

        let modified: Vec<Arc<MemoryChannel>> = self
            .channels
            .values()
            .filter(|channel| channel.is_modified())
            .cloned()
            .collect();
        for channel in modified {
            let blob_id = {
                let buffer = channel.lock_buffer();
                store.insert_blob(&buffer)?
            };
            self.set_file_object_id(channel.path(), blob_id);
            if channel.attached_count() == 0 {
                channel.close();
                self.channels.remove(channel.path());
            } else {
                // Content is now consistent with the cache.
                channel.set_modified(false);
            }
        }
        self.flush_staged_changes();

        let new_tree = match &self.cache {
            Some(cache) => cache.write_tree(store)?,
            None => return Ok(None),
        };
        if Some(new_tree) == self.base_tree {
            return Ok(None);
        }
        self.base_tree = Some(new_tree);
        debug!(tree = %new_tree, "wrote staged state as new tree");
        Ok(Some(new_tree))
    }
}
