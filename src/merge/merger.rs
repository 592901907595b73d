//! The decision ladder driving a three-way merge.

use indexmap::IndexMap;
use tracing::debug;

use crate::file_store::{GitFileStore, GitFsError, Result};
use crate::store::{FileMode, ObjectId, ObjectStore};

use super::conflict::{ConflictMarkers, MergeConflict};
use super::content::merge_text;
use super::walker::{ThreeWayWalker, WalkEntry};

/// Merges a base, "ours" and "theirs" tree into a target filesystem
/// rooted at "ours".
///
/// Trivial positions resolve directly into the filesystem; conflicting
/// blobs go through the textual merge, with the partially merged content
/// written out either way. Conflicts are recorded per path in insertion
/// order. A clean walk persists the filesystem and returns the merged
/// tree id; otherwise [`merge`](Self::merge) returns `None` and the
/// best-effort state stays in the filesystem for inspection.
pub struct Merger<'fs> {
    fs: &'fs GitFileStore,
    markers: ConflictMarkers,
    conflicts: IndexMap<String, MergeConflict>,
}

impl<'fs> Merger<'fs> {
    /// Create a merger writing into the given filesystem.
    pub fn new(fs: &'fs GitFileStore) -> Self {
        Merger {
            fs,
            markers: ConflictMarkers::default(),
            conflicts: IndexMap::new(),
        }
    }

    /// Use custom conflict marker labels.
    pub fn with_markers(mut self, markers: ConflictMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// The conflicts recorded so far, keyed by path in insertion order.
    pub fn conflicts(&self) -> &IndexMap<String, MergeConflict> {
        &self.conflicts
    }

    /// Consume the merger, yielding its conflict map.
    pub fn into_conflicts(self) -> IndexMap<String, MergeConflict> {
        self.conflicts
    }

    /// Run the merge. Returns the merged tree id on a clean walk, or
    /// `None` when conflicts were recorded.
    pub fn merge(
        &mut self,
        base: Option<ObjectId>,
        ours: ObjectId,
        theirs: ObjectId,
    ) -> Result<Option<ObjectId>> {
        self.fs.prepare_merge()?;
        let store = self.fs.object_store().clone();
        let mut walker = ThreeWayWalker::new(&*store, base, ours, theirs)?;
        while let Some(entry) = walker.next()? {
            if self.merge_entry(&*store, &entry)? {
                walker.enter_subtree()?;
            }
        }
        if self.conflicts.is_empty() {
            let tree = match self.fs.write_and_update_tree()? {
                Some(tree) => tree,
                None => self.fs.base_tree().ok_or_else(|| {
                    GitFsError::IllegalState("merge target has no base tree".to_string())
                })?,
            };
            debug!(tree = %tree, "merge completed cleanly");
            Ok(Some(tree))
        } else {
            debug!(conflicts = self.conflicts.len(), "merge finished with conflicts");
            Ok(None)
        }
    }

    /// Classify one walk position. Returns true when the walker should
    /// descend into the position as a directory.
    fn merge_entry(&mut self, store: &dyn ObjectStore, entry: &WalkEntry) -> Result<bool> {
        if entry.ours_unchanged() {
            self.apply(entry, entry.their_id, entry.their_mode)?;
            return Ok(false);
        }
        if entry.theirs_unchanged() {
            self.apply(entry, entry.our_id, entry.our_mode)?;
            return Ok(false);
        }
        if entry.our_id == entry.their_id {
            match merge_modes(entry.base_mode, entry.our_mode, entry.their_mode) {
                Some(mode) => self.apply(entry, entry.our_id, mode)?,
                None => self.add_conflict(entry),
            }
            return Ok(false);
        }
        if entry.both_blobs() {
            if entry.our_mode == FileMode::Gitlink || entry.their_mode == FileMode::Gitlink {
                self.add_conflict(entry);
            } else {
                self.merge_and_apply_blob(store, entry)?;
            }
            return Ok(false);
        }
        if entry.both_trees() {
            self.fs.merge_ensure_directory(&entry.path)?;
            return Ok(true);
        }
        // File/directory mismatch: keep ours and record the conflict.
        self.apply(entry, entry.our_id, entry.our_mode)?;
        self.add_conflict(entry);
        Ok(false)
    }

    fn apply(&self, entry: &WalkEntry, id: ObjectId, mode: FileMode) -> Result<()> {
        if mode.is_missing() {
            self.fs.merge_remove(&entry.path)
        } else {
            self.fs.merge_put(&entry.path, mode, id)
        }
    }

    fn merge_and_apply_blob(&mut self, store: &dyn ObjectStore, entry: &WalkEntry) -> Result<()> {
        let base = read_content(store, entry.base_id)?;
        let ours = read_content(store, entry.our_id)?;
        let theirs = read_content(store, entry.their_id)?;
        let (merged, has_conflicts) = merge_text(&base, &ours, &theirs, &self.markers);

        let mode =
            merge_modes(entry.base_mode, entry.our_mode, entry.their_mode).unwrap_or(FileMode::RegularFile);
        let blob = store.insert_blob(&merged)?;
        self.fs.merge_put(&entry.path, mode, blob)?;
        if has_conflicts {
            self.add_conflict(entry);
        }
        Ok(())
    }

    fn add_conflict(&mut self, entry: &WalkEntry) {
        self.conflicts.insert(
            entry.path.clone(),
            MergeConflict {
                base_mode: entry.base_mode,
                base_id: entry.base_id,
                our_mode: entry.our_mode,
                our_id: entry.our_id,
                their_mode: entry.their_mode,
                their_id: entry.their_id,
            },
        );
    }
}

/// Reconcile the modes of two sides carrying the same content.
///
/// Equal modes pass through; a side equal to the base yields the other,
/// ignoring a missing mode on the non-base side. Anything else fails.
fn merge_modes(base: FileMode, ours: FileMode, theirs: FileMode) -> Option<FileMode> {
    if ours == theirs {
        return Some(ours);
    }
    if base == ours {
        return Some(if theirs.is_missing() { ours } else { theirs });
    }
    if base == theirs {
        return Some(if ours.is_missing() { theirs } else { ours });
    }
    None
}

/// Blob bytes for a walk side; the zero id stands for empty content.
fn read_content(store: &dyn ObjectStore, id: ObjectId) -> Result<Vec<u8>> {
    if id.is_zero() {
        return Ok(Vec::new());
    }
    Ok(store.read_blob(id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::dir_cache::DirCache;
    use crate::store::{walk_tree, MemoryStore, PersonIdent};

    fn tree_of(store: &MemoryStore, files: &[(&str, FileMode, &str)]) -> ObjectId {
        let mut cache = DirCache::new_in_core();
        let mut builder = cache.builder();
        for (path, mode, content) in files {
            builder.add(*path, *mode, store.insert_blob(content.as_bytes()).unwrap());
        }
        builder.finish();
        cache.write_tree(store).unwrap()
    }

    fn files_tree(store: &MemoryStore, files: &[(&str, &str)]) -> ObjectId {
        let with_modes: Vec<(&str, FileMode, &str)> = files
            .iter()
            .map(|(path, content)| (*path, FileMode::RegularFile, *content))
            .collect();
        tree_of(store, &with_modes)
    }

    fn fs_at(store: &Arc<MemoryStore>, tree: ObjectId) -> GitFileStore {
        let ident = PersonIdent::new("Merge", "merge@example.com");
        let commit = store
            .insert_commit(tree, &[], &ident, &ident, "ours")
            .unwrap();
        GitFileStore::new(
            store.clone() as Arc<dyn ObjectStore>,
            None,
            Some(commit),
            None,
        )
        .unwrap()
    }

    fn blob_at(store: &MemoryStore, tree: ObjectId, path: &str) -> Vec<u8> {
        let (_, id) = walk_tree(store, tree, path).unwrap().unwrap();
        store.read_blob(id).unwrap()
    }

    #[test]
    fn test_clean_text_merge() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("f", "line1\nline2\n")]);
        let ours = files_tree(&store, &[("f", "LINE1\nline2\n")]);
        let theirs = files_tree(&store, &[("f", "line1\nLINE2\n")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        let tree = merger.merge(Some(base), ours, theirs).unwrap().unwrap();

        assert!(merger.conflicts().is_empty());
        assert_eq!(blob_at(&store, tree, "f"), b"LINE1\nLINE2\n");
    }

    #[test]
    fn test_conflicting_text_merge() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("f", "x\n")]);
        let ours = files_tree(&store, &[("f", "y\n")]);
        let theirs = files_tree(&store, &[("f", "z\n")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        let result = merger.merge(Some(base), ours, theirs).unwrap();
        assert!(result.is_none());

        let conflict = merger.conflicts().get("f").unwrap();
        assert_eq!(conflict.base_mode, FileMode::RegularFile);
        assert_eq!(conflict.our_mode, FileMode::RegularFile);
        assert_eq!(conflict.their_mode, FileMode::RegularFile);
        assert_ne!(conflict.our_id, conflict.their_id);

        // The partially merged blob with markers is left in the filesystem.
        let blob = fs.file_blob_id("f").unwrap().unwrap();
        let text = String::from_utf8(store.read_blob(blob).unwrap()).unwrap();
        assert!(text.contains("<<<<<<< OURS"));
        assert!(text.contains("||||||| BASE"));
        assert!(text.contains(">>>>>>> THEIRS"));
    }

    #[test]
    fn test_ours_unchanged_adopts_theirs() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("a", "1"), ("b", "2")]);
        let theirs = files_tree(&store, &[("a", "1-new"), ("c/d", "4")]);

        let fs = fs_at(&store, base);
        let mut merger = Merger::new(&fs);
        let tree = merger.merge(Some(base), base, theirs).unwrap().unwrap();

        // Ours equals the base, so the result is exactly theirs.
        assert_eq!(tree, theirs);
    }

    #[test]
    fn test_theirs_unchanged_adopts_ours() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("a", "1"), ("b", "2")]);
        let ours = files_tree(&store, &[("b", "2-new")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        let tree = merger.merge(Some(base), ours, base).unwrap().unwrap();
        assert_eq!(tree, ours);
    }

    #[test]
    fn test_both_added_identical_file() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[]);
        let ours = files_tree(&store, &[("new", "same")]);
        let theirs = files_tree(&store, &[("new", "same")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        let tree = merger.merge(Some(base), ours, theirs).unwrap().unwrap();
        assert_eq!(blob_at(&store, tree, "new"), b"same");
    }

    #[test]
    fn test_mode_reconciliation() {
        let store = Arc::new(MemoryStore::new());
        // Ours flips the executable bit, theirs edits the content.
        let base = tree_of(&store, &[("run", FileMode::RegularFile, "v\n")]);
        let ours = tree_of(&store, &[("run", FileMode::ExecutableFile, "v\n")]);
        let theirs = tree_of(&store, &[("run", FileMode::RegularFile, "w\n")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        let tree = merger.merge(Some(base), ours, theirs).unwrap().unwrap();

        let (mode, id) = walk_tree(&*store, tree, "run").unwrap().unwrap();
        assert_eq!(mode, FileMode::ExecutableFile);
        assert_eq!(store.read_blob(id).unwrap(), b"w\n");
    }

    #[test]
    fn test_gitlink_is_a_hard_conflict() {
        let store = Arc::new(MemoryStore::new());
        let base = tree_of(&store, &[("sub", FileMode::Gitlink, "commit-a")]);
        let ours = tree_of(&store, &[("sub", FileMode::Gitlink, "commit-b")]);
        let theirs = tree_of(&store, &[("sub", FileMode::Gitlink, "commit-c")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        assert!(merger.merge(Some(base), ours, theirs).unwrap().is_none());
        assert!(merger.conflicts().contains_key("sub"));
    }

    #[test]
    fn test_file_directory_mismatch_keeps_ours() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("p", "file")]);
        let ours = files_tree(&store, &[("p", "file-edited")]);
        let theirs = files_tree(&store, &[("p/child", "now a directory")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        assert!(merger.merge(Some(base), ours, theirs).unwrap().is_none());
        assert!(merger.conflicts().contains_key("p"));
        // Ours is applied as the best-effort state.
        assert!(fs.is_regular_file("p").unwrap());
    }

    #[test]
    fn test_delete_modify_conflict() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("f", "v1\n")]);
        let ours = files_tree(&store, &[("f", "v2\n")]);
        let theirs = files_tree(&store, &[]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        assert!(merger.merge(Some(base), ours, theirs).unwrap().is_none());
        let conflict = merger.conflicts().get("f").unwrap();
        assert_eq!(conflict.their_mode, FileMode::Missing);
        assert!(conflict.their_id.is_zero());
    }

    #[test]
    fn test_theirs_deleted_directory() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("dir/a", "a"), ("dir/b", "b"), ("keep", "k")]);
        let ours = base;
        let theirs = files_tree(&store, &[("keep", "k")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        let tree = merger.merge(Some(base), ours, theirs).unwrap().unwrap();
        assert_eq!(tree, theirs);
        assert!(!fs.is_directory("dir").unwrap());
    }

    #[test]
    fn test_nested_clean_merge() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("d/f", "1\n2\n3\n"), ("d/g", "g")]);
        let ours = files_tree(&store, &[("d/f", "ONE\n2\n3\n"), ("d/g", "g")]);
        let theirs = files_tree(&store, &[("d/f", "1\n2\nTHREE\n"), ("d/g", "g")]);

        let fs = fs_at(&store, ours);
        let mut merger = Merger::new(&fs);
        let tree = merger.merge(Some(base), ours, theirs).unwrap().unwrap();
        assert_eq!(blob_at(&store, tree, "d/f"), b"ONE\n2\nTHREE\n");
        assert_eq!(blob_at(&store, tree, "d/g"), b"g");
    }

    #[test]
    fn test_merge_is_deterministic() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("a", "x\n"), ("b", "x\n")]);
        let ours = files_tree(&store, &[("a", "y\n"), ("b", "y\n")]);
        let theirs = files_tree(&store, &[("a", "z\n"), ("b", "z\n")]);

        let run = || {
            let fs = fs_at(&store, ours);
            let mut merger = Merger::new(&fs);
            let result = merger.merge(Some(base), ours, theirs).unwrap();
            let keys: Vec<String> = merger.conflicts().keys().cloned().collect();
            let blob = fs.file_blob_id("a").unwrap().unwrap();
            (result, keys, blob)
        };
        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert_eq!(first.1, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_custom_markers_in_output() {
        let store = Arc::new(MemoryStore::new());
        let base = files_tree(&store, &[("f", "x\n")]);
        let ours = files_tree(&store, &[("f", "y\n")]);
        let theirs = files_tree(&store, &[("f", "z\n")]);

        let fs = fs_at(&store, ours);
        let mut merger =
            Merger::new(&fs).with_markers(ConflictMarkers::new("base", "left", "right"));
        assert!(merger.merge(Some(base), ours, theirs).unwrap().is_none());
        let blob = fs.file_blob_id("f").unwrap().unwrap();
        let text = String::from_utf8(store.read_blob(blob).unwrap()).unwrap();
        assert!(text.contains("<<<<<<< left"));
        assert!(text.contains(">>>>>>> right"));
    }

    #[test]
    fn test_merge_modes_table() {
        use FileMode::*;
        assert_eq!(merge_modes(RegularFile, RegularFile, RegularFile), Some(RegularFile));
        assert_eq!(merge_modes(RegularFile, ExecutableFile, RegularFile), Some(ExecutableFile));
        assert_eq!(merge_modes(RegularFile, RegularFile, ExecutableFile), Some(ExecutableFile));
        assert_eq!(merge_modes(RegularFile, RegularFile, Missing), Some(RegularFile));
        assert_eq!(merge_modes(RegularFile, Missing, RegularFile), Some(RegularFile));
        assert_eq!(merge_modes(Missing, ExecutableFile, RegularFile), None);
    }
}
