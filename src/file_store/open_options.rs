//! Options controlling how a byte channel is opened.

/// The set of options accepted by
/// [`GitFileStore::new_byte_channel`](super::GitFileStore::new_byte_channel).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub create_new: bool,
    pub append: bool,
    pub truncate: bool,
}

impl OpenOptions {
    /// An empty option set.
    pub fn new() -> Self {
        OpenOptions::default()
    }

    /// Read access only.
    pub fn reading() -> Self {
        OpenOptions::new().with_read()
    }

    /// Write access, creating the file if it is absent.
    pub fn writing() -> Self {
        OpenOptions::new().with_write().with_create()
    }

    pub fn with_read(mut self) -> Self {
        self.read = true;
        self
    }

    pub fn with_write(mut self) -> Self {
        self.write = true;
        self
    }

    pub fn with_create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn with_create_new(mut self) -> Self {
        self.create_new = true;
        self
    }

    pub fn with_append(mut self) -> Self {
        self.append = true;
        self
    }

    pub fn with_truncate(mut self) -> Self {
        self.truncate = true;
        self
    }

    /// Tests if this is exactly the read-only option set, which permits
    /// serving the open from the base tree without allocating the cache.
    pub fn is_read_only(&self) -> bool {
        self.read
            && !self.write
            && !self.create
            && !self.create_new
            && !self.append
            && !self.truncate
    }

    /// Whether a channel opened with these options accepts reads.
    ///
    /// Reading is the default when no writing option is present.
    pub fn readable(&self) -> bool {
        self.read || !(self.write || self.append)
    }

    /// Whether a channel opened with these options accepts writes.
    pub fn writable(&self) -> bool {
        self.write || self.append
    }

    /// Whether either creation option is present.
    pub fn creates(&self) -> bool {
        self.create || self.create_new
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_detection() {
        assert!(OpenOptions::reading().is_read_only());
        assert!(!OpenOptions::reading().with_write().is_read_only());
        assert!(!OpenOptions::writing().is_read_only());
        assert!(!OpenOptions::new().is_read_only());
    }

    #[test]
    fn test_readable_writable() {
        assert!(OpenOptions::new().readable());
        assert!(!OpenOptions::new().writable());
        let w = OpenOptions::new().with_write();
        assert!(!w.readable());
        assert!(w.writable());
        let rw = OpenOptions::reading().with_write();
        assert!(rw.readable());
        assert!(rw.writable());
        assert!(OpenOptions::new().with_append().writable());
    }
}
