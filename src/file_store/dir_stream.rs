//! Directory iteration over a snapshot of entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::store::FileMode;

use super::git_file_store::FsInner;
use super::{GitFsError, Result};

/// One immediate child of a directory, as observed by a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirStreamEntry {
    /// Child name, without any path prefix.
    pub name: String,
    /// [`FileMode::Tree`] for subdirectories, the file mode otherwise.
    pub mode: FileMode,
}

impl DirStreamEntry {
    /// Tests if this entry is a subdirectory.
    pub fn is_directory(&self) -> bool {
        self.mode.is_tree()
    }
}

/// Registry-side liveness marker for one open stream.
pub(crate) struct StreamToken {
    open: AtomicBool,
}

impl StreamToken {
    pub(crate) fn new() -> Self {
        StreamToken {
            open: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// An open iterator over the immediate children of a directory.
///
/// The entry list is a snapshot taken when the stream was opened, with
/// staged changes flushed first. While the stream is open, mutations
/// under the directory are refused by the filesystem; closing the stream
/// (or dropping it) removes it from the registry.
pub struct DirectoryStream {
    path: String,
    entries: Vec<DirStreamEntry>,
    pos: usize,
    token: Arc<StreamToken>,
    fs: Weak<Mutex<FsInner>>,
}

impl DirectoryStream {
    pub(crate) fn new(
        path: impl Into<String>,
        entries: Vec<DirStreamEntry>,
        token: Arc<StreamToken>,
        fs: Weak<Mutex<FsInner>>,
    ) -> Self {
        DirectoryStream {
            path: path.into(),
            entries,
            pos: 0,
            token,
            fs,
        }
    }

    /// The directory path this stream iterates.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Tells if this stream is still open.
    pub fn is_open(&self) -> bool {
        self.token.is_open()
    }

    /// The next entry of the snapshot, or `None` when exhausted.
    pub fn next_entry(&mut self) -> Result<Option<DirStreamEntry>> {
        if !self.token.is_open() {
            return Err(GitFsError::Closed);
        }
        let entry = self.entries.get(self.pos).cloned();
        if entry.is_some() {
            self.pos += 1;
        }
        Ok(entry)
    }

    /// Close the stream and remove it from the filesystem registry.
    /// Closing an already-closed stream has no effect.
    pub fn close(&mut self) {
        if !self.token.is_open() {
            return;
        }
        self.token.close();
        if let Some(inner) = self.fs.upgrade() {
            if let Ok(mut state) = inner.lock() {
                state.remove_directory_stream(&self.path, &self.token);
            }
        }
    }
}

impl Drop for DirectoryStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<DirStreamEntry> {
        vec![
            DirStreamEntry {
                name: "a.txt".to_string(),
                mode: FileMode::RegularFile,
            },
            DirStreamEntry {
                name: "sub".to_string(),
                mode: FileMode::Tree,
            },
        ]
    }

    #[test]
    fn test_iterates_snapshot_in_order() {
        let token = Arc::new(StreamToken::new());
        let mut stream = DirectoryStream::new("", sample_entries(), token, Weak::new());
        let first = stream.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "a.txt");
        assert!(!first.is_directory());
        let second = stream.next_entry().unwrap().unwrap();
        assert!(second.is_directory());
        assert!(stream.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_closed_stream_fails() {
        let token = Arc::new(StreamToken::new());
        let mut stream = DirectoryStream::new("", sample_entries(), token, Weak::new());
        stream.close();
        assert!(!stream.is_open());
        assert!(matches!(stream.next_entry(), Err(GitFsError::Closed)));
        // Closing again is a no-op.
        stream.close();
    }
}
