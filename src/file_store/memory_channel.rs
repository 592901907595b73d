//! The in-memory buffer backing an open file.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::BytesMut;

/// A growable byte buffer shadowing the stored blob of one path.
///
/// A channel is created on the first open that might write, or on the
/// first read served without a cache, and lives in the filesystem's
/// channel table until the file is deleted or moved, until it is
/// garbage-collected (unmodified with no attached handles), or until the
/// filesystem closes.
///
/// The buffer has its own lock, distinct from the filesystem lock, so
/// attached [`SeekableByteChannel`](super::SeekableByteChannel) handles
/// can operate on the bytes without entering the filesystem. The
/// filesystem lock, when needed, is always taken first.
pub struct MemoryChannel {
    path: String,
    buffer: Mutex<BytesMut>,
    modified: AtomicBool,
    attached: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Create an empty channel for a freshly created file.
    ///
    /// The channel starts modified: its (empty) content is not yet
    /// backed by a stored blob.
    pub(crate) fn new(path: impl Into<String>) -> Self {
        MemoryChannel {
            path: path.into(),
            buffer: Mutex::new(BytesMut::new()),
            modified: AtomicBool::new(true),
            attached: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a channel preloaded with stored blob content.
    pub(crate) fn with_bytes(path: impl Into<String>, bytes: Vec<u8>, modified: bool) -> Self {
        MemoryChannel {
            path: path.into(),
            buffer: Mutex::new(BytesMut::from(&bytes[..])),
            modified: AtomicBool::new(modified),
            attached: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// The path this channel shadows.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Acquire the buffer lock.
    pub(crate) fn lock_buffer(&self) -> MutexGuard<'_, BytesMut> {
        self.buffer.lock().unwrap()
    }

    /// Current buffer length in bytes, taken under the buffer lock.
    pub fn size(&self) -> u64 {
        self.lock_buffer().len() as u64
    }

    /// Whether the buffer has diverged from the stored blob.
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    pub(crate) fn set_modified(&self, modified: bool) {
        self.modified.store(modified, Ordering::SeqCst);
    }

    /// Number of currently attached user-facing handles.
    pub fn attached_count(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self) {
        self.attached.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn detach(&self) {
        self.attached.fetch_sub(1, Ordering::SeqCst);
    }

    /// Whether the channel has been closed by the filesystem.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_channel_is_modified_and_empty() {
        let channel = MemoryChannel::new("a/b.txt");
        assert_eq!(channel.path(), "a/b.txt");
        assert_eq!(channel.size(), 0);
        assert!(channel.is_modified());
        assert_eq!(channel.attached_count(), 0);
        assert!(!channel.is_closed());
    }

    #[test]
    fn test_preloaded_channel_tracks_blob() {
        let channel = MemoryChannel::with_bytes("f", b"content".to_vec(), false);
        assert_eq!(channel.size(), 7);
        assert!(!channel.is_modified());
    }

    #[test]
    fn test_attach_detach() {
        let channel = MemoryChannel::new("f");
        channel.attach();
        channel.attach();
        assert_eq!(channel.attached_count(), 2);
        channel.detach();
        assert_eq!(channel.attached_count(), 1);
    }
}
