//! Object identifiers and file modes.

use std::fmt;

use sha2::{Digest, Sha256};

use super::{Result, StoreError};

/// Length of an object id in bytes.
pub const OBJECT_ID_LEN: usize = 32;

/// A sha-256 content hash identifying a blob, tree or commit.
///
/// The distinguished all-zero value means "no content yet"; it is never
/// the hash of a stored object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// The distinguished zero id.
    pub const fn zero() -> Self {
        ObjectId([0; OBJECT_ID_LEN])
    }

    /// Returns true if this is the distinguished zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; OBJECT_ID_LEN]
    }

    /// Create an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        ObjectId(bytes)
    }

    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Parse an id from its lowercase hexadecimal name.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| StoreError::InvalidObject(format!("bad object id '{hex_str}': {e}")))?;
        let bytes: [u8; OBJECT_ID_LEN] = bytes
            .try_into()
            .map_err(|_| StoreError::InvalidObject(format!("bad object id length: '{hex_str}'")))?;
        Ok(ObjectId(bytes))
    }

    /// The canonical hexadecimal name of this id.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hash an object body under its kind header, producing its id.
    ///
    /// The hashed input is `"{kind} {len}\0"` followed by the body, the
    /// git object framing.
    pub fn hash_object(kind: ObjectKind, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(body.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(body);
        ObjectId(hasher.finalize().into())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.hex())
    }
}

/// The kind of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    /// The kind name used in the object framing.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }
}

/// The mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// A regular file.
    RegularFile,
    /// An executable file.
    ExecutableFile,
    /// A subtree.
    Tree,
    /// A reference to a commit in another repository.
    Gitlink,
    /// No entry.
    Missing,
}

impl FileMode {
    /// The git mode bits for this mode.
    pub fn bits(&self) -> u32 {
        match self {
            FileMode::RegularFile => 0o100644,
            FileMode::ExecutableFile => 0o100755,
            FileMode::Tree => 0o040000,
            FileMode::Gitlink => 0o160000,
            FileMode::Missing => 0,
        }
    }

    /// Decode git mode bits.
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            0o100644 => Ok(FileMode::RegularFile),
            0o100755 => Ok(FileMode::ExecutableFile),
            0o040000 => Ok(FileMode::Tree),
            0o160000 => Ok(FileMode::Gitlink),
            0 => Ok(FileMode::Missing),
            other => Err(StoreError::InvalidObject(format!(
                "unrecognized file mode {other:o}"
            ))),
        }
    }

    /// Returns true for the subtree mode.
    pub fn is_tree(&self) -> bool {
        matches!(self, FileMode::Tree)
    }

    /// Returns true for the missing mode.
    pub fn is_missing(&self) -> bool {
        matches!(self, FileMode::Missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_id() {
        let zero = ObjectId::zero();
        assert!(zero.is_zero());
        assert_eq!(zero.hex(), "0".repeat(OBJECT_ID_LEN * 2));
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = ObjectId::hash_object(ObjectKind::Blob, b"hello");
        let parsed = ObjectId::from_hex(&id.hex()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(ObjectId::from_hex("zz").is_err());
        assert!(ObjectId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_hash_is_kind_sensitive() {
        let blob = ObjectId::hash_object(ObjectKind::Blob, b"data");
        let tree = ObjectId::hash_object(ObjectKind::Tree, b"data");
        assert_ne!(blob, tree);
    }

    #[test]
    fn test_mode_bits_roundtrip() {
        for mode in [
            FileMode::RegularFile,
            FileMode::ExecutableFile,
            FileMode::Tree,
            FileMode::Gitlink,
            FileMode::Missing,
        ] {
            assert_eq!(FileMode::from_bits(mode.bits()).unwrap(), mode);
        }
        assert!(FileMode::from_bits(0o120000).is_err());
    }
}
