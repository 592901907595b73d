//! Lockstep walk over three trees.

use std::collections::BTreeMap;

use crate::store::{FileMode, ObjectId, ObjectStore, Result, TreeEntry};

/// One position of the walk: an entry name that exists in at least one
/// of the three trees, with the mode and id it has on each side
/// ([`FileMode::Missing`] and the zero id where absent).
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Entry name within the current directory.
    pub name: String,
    /// Full path from the walk root.
    pub path: String,
    /// Directory depth; entries of the root trees have depth 0.
    pub depth: usize,
    pub base_mode: FileMode,
    pub base_id: ObjectId,
    pub our_mode: FileMode,
    pub our_id: ObjectId,
    pub their_mode: FileMode,
    pub their_id: ObjectId,
}

impl WalkEntry {
    /// Ours matches the base in both mode and id.
    pub fn ours_unchanged(&self) -> bool {
        self.base_mode == self.our_mode && self.base_id == self.our_id
    }

    /// Theirs matches the base in both mode and id.
    pub fn theirs_unchanged(&self) -> bool {
        self.base_mode == self.their_mode && self.base_id == self.their_id
    }

    /// Neither side is a tree.
    pub fn both_blobs(&self) -> bool {
        !self.our_mode.is_tree() && !self.their_mode.is_tree()
    }

    /// Both sides are trees.
    pub fn both_trees(&self) -> bool {
        self.our_mode.is_tree() && self.their_mode.is_tree()
    }
}

#[derive(Clone)]
struct MergedEntry {
    name: String,
    base: (FileMode, ObjectId),
    ours: (FileMode, ObjectId),
    theirs: (FileMode, ObjectId),
}

struct Frame {
    prefix: String,
    entries: Vec<MergedEntry>,
    pos: usize,
}

/// Walks a merge base, an "ours" tree and a "theirs" tree in lockstep,
/// yielding one [`WalkEntry`] per name that exists in at least one of
/// the trees at the current depth. The consumer decides per position
/// whether to descend via [`enter_subtree`](Self::enter_subtree).
pub struct ThreeWayWalker<'a> {
    store: &'a dyn ObjectStore,
    stack: Vec<Frame>,
    last: Option<WalkEntry>,
}

impl<'a> ThreeWayWalker<'a> {
    /// Start a walk over the root trees. A `None` or zero base stands
    /// for an empty merge base.
    pub fn new(
        store: &'a dyn ObjectStore,
        base: Option<ObjectId>,
        ours: ObjectId,
        theirs: ObjectId,
    ) -> Result<Self> {
        let entries = read_frame(store, base, Some(ours), Some(theirs))?;
        Ok(ThreeWayWalker {
            store,
            stack: vec![Frame {
                prefix: String::new(),
                entries,
                pos: 0,
            }],
            last: None,
        })
    }

    /// The next position, ascending out of exhausted directories.
    pub fn next(&mut self) -> Result<Option<WalkEntry>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            if frame.pos >= frame.entries.len() {
                self.stack.pop();
                continue;
            }
            let entry = frame.entries[frame.pos].clone();
            frame.pos += 1;
            let walk = WalkEntry {
                path: format!("{}{}", frame.prefix, entry.name),
                depth: self.stack.len() - 1,
                name: entry.name,
                base_mode: entry.base.0,
                base_id: entry.base.1,
                our_mode: entry.ours.0,
                our_id: entry.ours.1,
                their_mode: entry.theirs.0,
                their_id: entry.theirs.1,
            };
            self.last = Some(walk.clone());
            return Ok(Some(walk));
        }
    }

    /// Descend into the position yielded last. Sides whose entry is not
    /// a tree contribute nothing below this point.
    pub fn enter_subtree(&mut self) -> Result<()> {
        let Some(last) = self.last.take() else {
            return Ok(());
        };
        let subtree = |mode: FileMode, id: ObjectId| mode.is_tree().then_some(id);
        let entries = read_frame(
            self.store,
            subtree(last.base_mode, last.base_id),
            subtree(last.our_mode, last.our_id),
            subtree(last.their_mode, last.their_id),
        )?;
        self.stack.push(Frame {
            prefix: format!("{}/", last.path),
            entries,
            pos: 0,
        });
        Ok(())
    }
}

fn read_side(store: &dyn ObjectStore, id: Option<ObjectId>) -> Result<Vec<TreeEntry>> {
    match id {
        Some(id) if !id.is_zero() => store.read_tree(id),
        _ => Ok(Vec::new()),
    }
}

const MISSING: (FileMode, ObjectId) = (FileMode::Missing, ObjectId::zero());

fn slot<'m>(merged: &'m mut BTreeMap<String, MergedEntry>, name: &str) -> &'m mut MergedEntry {
    merged.entry(name.to_string()).or_insert_with(|| MergedEntry {
        name: name.to_string(),
        base: MISSING,
        ours: MISSING,
        theirs: MISSING,
    })
}

/// Merge the entry lists of the three trees by name.
fn read_frame(
    store: &dyn ObjectStore,
    base: Option<ObjectId>,
    ours: Option<ObjectId>,
    theirs: Option<ObjectId>,
) -> Result<Vec<MergedEntry>> {
    let mut merged: BTreeMap<String, MergedEntry> = BTreeMap::new();
    for entry in read_side(store, base)? {
        slot(&mut merged, &entry.name).base = (entry.mode, entry.id);
    }
    for entry in read_side(store, ours)? {
        slot(&mut merged, &entry.name).ours = (entry.mode, entry.id);
    }
    for entry in read_side(store, theirs)? {
        slot(&mut merged, &entry.name).theirs = (entry.mode, entry.id);
    }
    Ok(merged.into_values().collect())
}
