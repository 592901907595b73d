//! A flat, sorted index of file entries standing in for a base tree
//! during editing.

mod cache;

pub use cache::{DirCache, DirCacheBuilder, DirCacheEditor, DirCacheEntry};
