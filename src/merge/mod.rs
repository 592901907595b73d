//! Three-way merge of trees into a mutable filesystem.
//!
//! The merger walks a merge base, an "ours" tree and a "theirs" tree in
//! lockstep and classifies each position:
//!
//! 1. Side unchanged against the base: adopt the other side.
//! 2. Identical ids on both sides: reconcile the modes.
//! 3. Two blobs: run a textual three-way merge on the content.
//! 4. Two trees: descend.
//! 5. File/directory mismatch: keep ours and record a conflict.
//!
//! Trivial resolutions are written directly into the target
//! [`GitFileStore`](crate::file_store::GitFileStore) rooted at "ours".
//! A clean walk persists the filesystem and yields the merged tree id;
//! otherwise the best-effort merged state stays in the filesystem and
//! the conflict map describes every unresolved path.
//!
//! # Key types
//!
//! - [`Merger`] - drives the walk and records conflicts
//! - [`ThreeWayWalker`] - the lockstep tree iterator
//! - [`MergeConflict`] - one unresolved position
//! - [`ConflictMarkers`] - labels used when formatting conflict hunks

mod conflict;
mod content;
mod merger;
mod walker;

pub use conflict::{ConflictMarkers, MergeConflict};
pub use merger::Merger;
pub use walker::{ThreeWayWalker, WalkEntry};
