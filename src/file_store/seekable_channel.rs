//! User-facing seekable access to a memory channel.

use std::io;
use std::sync::{Arc, Mutex, Weak};

use super::git_file_store::FsInner;
use super::memory_channel::MemoryChannel;
use super::{GitFsError, OpenOptions, Result};

/// A seekable read/write handle attached to a [`MemoryChannel`].
///
/// Handles operate on the channel buffer under its buffer lock, outside
/// the filesystem lock. Closing the handle detaches it and lets the
/// filesystem garbage-collect the channel if it is unmodified with no
/// other handles attached; the back-reference is non-owning, so a handle
/// never keeps a closed filesystem alive.
pub struct SeekableByteChannel {
    channel: Arc<MemoryChannel>,
    fs: Weak<Mutex<FsInner>>,
    options: OpenOptions,
    position: u64,
    open: bool,
}

impl SeekableByteChannel {
    pub(crate) fn new(
        channel: Arc<MemoryChannel>,
        fs: Weak<Mutex<FsInner>>,
        options: OpenOptions,
    ) -> Self {
        channel.attach();
        if options.truncate && options.writable() {
            let mut buffer = channel.lock_buffer();
            if !buffer.is_empty() {
                buffer.clear();
                channel.set_modified(true);
            }
        }
        SeekableByteChannel {
            channel,
            fs,
            options,
            position: 0,
            open: true,
        }
    }

    /// The path this handle is open on.
    pub fn path(&self) -> &str {
        self.channel.path()
    }

    /// Tells if this handle is still open.
    pub fn is_open(&self) -> bool {
        self.open && !self.channel.is_closed()
    }

    fn check_open(&self) -> Result<()> {
        if !self.is_open() {
            return Err(GitFsError::Closed);
        }
        Ok(())
    }

    /// Read bytes at the current position, advancing it.
    ///
    /// Returns 0 at end of channel.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if !self.options.readable() {
            return Err(GitFsError::AccessDenied(self.path().to_string()));
        }
        let buffer = self.channel.lock_buffer();
        let len = buffer.len() as u64;
        if self.position >= len {
            return Ok(0);
        }
        let start = self.position as usize;
        let count = dst.len().min(len as usize - start);
        dst[..count].copy_from_slice(&buffer[start..start + count]);
        drop(buffer);
        self.position += count as u64;
        Ok(count)
    }

    /// Write bytes at the current position, growing the buffer as needed
    /// and advancing the position. With the append option, every write
    /// lands at the end of the buffer.
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.check_open()?;
        if !self.options.writable() {
            return Err(GitFsError::AccessDenied(self.path().to_string()));
        }
        let mut buffer = self.channel.lock_buffer();
        if self.options.append {
            self.position = buffer.len() as u64;
        }
        let start = self.position as usize;
        if start > buffer.len() {
            buffer.resize(start, 0);
        }
        let overlap = src.len().min(buffer.len() - start);
        buffer[start..start + overlap].copy_from_slice(&src[..overlap]);
        buffer.extend_from_slice(&src[overlap..]);
        drop(buffer);
        if !src.is_empty() {
            self.channel.set_modified(true);
        }
        self.position += src.len() as u64;
        Ok(src.len())
    }

    /// The current position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the position; it may point beyond the current end.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        self.check_open()?;
        self.position = position;
        Ok(())
    }

    /// The current size of the backing buffer.
    pub fn size(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.channel.size())
    }

    /// Cut the buffer down to the given size; shorter buffers are left
    /// alone. The position is clamped to the new size.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.check_open()?;
        if !self.options.writable() {
            return Err(GitFsError::AccessDenied(self.path().to_string()));
        }
        let mut buffer = self.channel.lock_buffer();
        if (size as usize) < buffer.len() {
            buffer.truncate(size as usize);
            self.channel.set_modified(true);
        }
        drop(buffer);
        if self.position > size {
            self.position = size;
        }
        Ok(())
    }

    /// Detach from the channel. The channel is garbage-collected if this
    /// was the last handle and the buffer is unmodified. Closing an
    /// already-closed handle has no effect.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.channel.detach();
        if let Some(inner) = self.fs.upgrade() {
            if let Ok(mut state) = inner.lock() {
                state.garbage_collect_channel(&self.channel);
            }
        }
    }
}

impl Drop for SeekableByteChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl io::Read for SeekableByteChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SeekableByteChannel::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for SeekableByteChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SeekableByteChannel::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for SeekableByteChannel {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(offset) => offset as i128,
            io::SeekFrom::End(delta) => self.size().map_err(io::Error::from)? as i128 + delta as i128,
            io::SeekFrom::Current(delta) => self.position as i128 + delta as i128,
        };
        if target < 0 || target > u64::MAX as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            ));
        }
        self.set_position(target as u64).map_err(io::Error::from)?;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_handle(options: OpenOptions) -> SeekableByteChannel {
        let channel = Arc::new(MemoryChannel::new("test.txt"));
        SeekableByteChannel::new(channel, Weak::new(), options)
    }

    #[test]
    fn test_write_then_read_back() {
        let mut handle = detached_handle(OpenOptions::reading().with_write().with_create());
        assert_eq!(handle.write(b"hello").unwrap(), 5);
        handle.set_position(0).unwrap();
        let mut buf = [0u8; 16];
        let n = handle.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(handle.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_overwrite_middle() {
        let mut handle = detached_handle(OpenOptions::reading().with_write().with_create());
        handle.write(b"abcdef").unwrap();
        handle.set_position(2).unwrap();
        handle.write(b"XY").unwrap();
        handle.set_position(0).unwrap();
        let mut buf = [0u8; 6];
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"abXYef");
    }

    #[test]
    fn test_append_ignores_position() {
        let channel = Arc::new(MemoryChannel::with_bytes("f", b"base".to_vec(), false));
        let mut appender = SeekableByteChannel::new(
            Arc::clone(&channel),
            Weak::new(),
            OpenOptions::new().with_append(),
        );
        appender.set_position(0).unwrap();
        appender.write(b"+more").unwrap();
        assert_eq!(appender.size().unwrap(), 9);
        assert_eq!(&channel.lock_buffer()[..], b"base+more");
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let mut handle = detached_handle(OpenOptions::reading().with_write().with_create());
        handle.set_position(3).unwrap();
        handle.write(b"x").unwrap();
        handle.set_position(0).unwrap();
        let mut buf = [0u8; 4];
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"\0\0\0x");
    }

    #[test]
    fn test_truncate_clamps_position() {
        let mut handle = detached_handle(OpenOptions::reading().with_write().with_create());
        handle.write(b"0123456789").unwrap();
        handle.truncate(4).unwrap();
        assert_eq!(handle.size().unwrap(), 4);
        assert_eq!(handle.position(), 4);
    }

    #[test]
    fn test_truncate_option_clears_existing_content() {
        let channel = Arc::new(MemoryChannel::with_bytes("f", b"old".to_vec(), false));
        let handle = SeekableByteChannel::new(
            Arc::clone(&channel),
            Weak::new(),
            OpenOptions::new().with_write().with_truncate(),
        );
        assert_eq!(channel.size(), 0);
        assert!(channel.is_modified());
        drop(handle);
    }

    #[test]
    fn test_read_denied_on_write_only_handle() {
        let mut handle = detached_handle(OpenOptions::new().with_write());
        let mut buf = [0u8; 4];
        assert!(matches!(
            handle.read(&mut buf),
            Err(GitFsError::AccessDenied(_))
        ));
    }

    #[test]
    fn test_write_denied_on_read_only_handle() {
        let mut handle = detached_handle(OpenOptions::reading());
        assert!(matches!(
            handle.write(b"nope"),
            Err(GitFsError::AccessDenied(_))
        ));
    }

    #[test]
    fn test_closed_handle_fails() {
        let mut handle = detached_handle(OpenOptions::reading().with_write().with_create());
        handle.close();
        assert!(matches!(handle.write(b"x"), Err(GitFsError::Closed)));
        let mut buf = [0u8; 1];
        assert!(matches!(handle.read(&mut buf), Err(GitFsError::Closed)));
        // Closing again is a no-op.
        handle.close();
    }

    #[test]
    fn test_close_detaches() {
        let channel = Arc::new(MemoryChannel::new("f"));
        let mut handle = SeekableByteChannel::new(
            Arc::clone(&channel),
            Weak::new(),
            OpenOptions::writing(),
        );
        assert_eq!(channel.attached_count(), 1);
        handle.close();
        assert_eq!(channel.attached_count(), 0);
    }
}
