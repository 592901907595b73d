//! Tree object serialization and path walking.
//!
//! A tree maps names to `(mode, id)` pairs. The serialized form is the
//! git framing: for each entry, the octal mode, a space, the name, a NUL
//! byte and the raw id bytes. Entries are ordered git-style, with
//! directory names comparing as if they had a trailing `/`, so identical
//! content always serializes to identical bytes.

use std::cmp::Ordering;

use super::object_store::ObjectStore;
use super::{FileMode, ObjectId, Result, StoreError, OBJECT_ID_LEN};

/// A single entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Entry name within the tree; never contains `/` or NUL.
    pub name: String,
    /// Entry mode.
    pub mode: FileMode,
    /// Id of the referenced blob, subtree or gitlink commit.
    pub id: ObjectId,
}

impl TreeEntry {
    /// Create a new tree entry.
    pub fn new(name: impl Into<String>, mode: FileMode, id: ObjectId) -> Self {
        TreeEntry {
            name: name.into(),
            mode,
            id,
        }
    }
}

/// Compare two entries in canonical tree order.
///
/// Directory names sort as if they carried a trailing `/`.
pub(crate) fn canonical_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let a_name = a.name.as_bytes();
    let b_name = b.name.as_bytes();
    let common = a_name.len().min(b_name.len());
    match a_name[..common].cmp(&b_name[..common]) {
        Ordering::Equal => {}
        other => return other,
    }
    let a_next = suffix_byte(a_name, common, a.mode);
    let b_next = suffix_byte(b_name, common, b.mode);
    a_next.cmp(&b_next)
}

fn suffix_byte(name: &[u8], at: usize, mode: FileMode) -> u8 {
    if at < name.len() {
        name[at]
    } else if mode.is_tree() {
        b'/'
    } else {
        0
    }
}

/// Serialize entries into canonical tree bytes.
///
/// Missing-mode entries are skipped; the remainder is sorted into
/// canonical order before encoding.
pub(crate) fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut sorted: Vec<&TreeEntry> = entries.iter().filter(|e| !e.mode.is_missing()).collect();
    sorted.sort_by(|a, b| canonical_order(a, b));

    let mut out = Vec::new();
    for entry in sorted {
        out.extend_from_slice(format!("{:o}", entry.mode.bits()).as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.id.as_bytes());
    }
    out
}

/// Decode canonical tree bytes back into entries.
pub(crate) fn decode_tree(bytes: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| StoreError::InvalidObject("truncated tree entry mode".into()))?;
        let mode_str = std::str::from_utf8(&rest[..space])
            .map_err(|_| StoreError::InvalidObject("non-ASCII tree entry mode".into()))?;
        let bits = u32::from_str_radix(mode_str, 8)
            .map_err(|_| StoreError::InvalidObject(format!("bad tree entry mode '{mode_str}'")))?;
        let mode = FileMode::from_bits(bits)?;
        rest = &rest[space + 1..];

        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| StoreError::InvalidObject("truncated tree entry name".into()))?;
        let name = std::str::from_utf8(&rest[..nul])
            .map_err(|_| StoreError::InvalidObject("non-UTF-8 tree entry name".into()))?
            .to_string();
        rest = &rest[nul + 1..];

        if rest.len() < OBJECT_ID_LEN {
            return Err(StoreError::InvalidObject("truncated tree entry id".into()));
        }
        let mut id = [0u8; OBJECT_ID_LEN];
        id.copy_from_slice(&rest[..OBJECT_ID_LEN]);
        rest = &rest[OBJECT_ID_LEN..];

        entries.push(TreeEntry {
            name,
            mode,
            id: ObjectId::from_bytes(id),
        });
    }
    Ok(entries)
}

/// Resolve a `/`-separated path against a tree, returning the mode and id
/// of the entry it names, or `None` if any component is absent.
///
/// The empty path resolves to the tree itself.
pub fn walk_tree(
    store: &dyn ObjectStore,
    tree: ObjectId,
    path: &str,
) -> Result<Option<(FileMode, ObjectId)>> {
    if path.is_empty() {
        return Ok(Some((FileMode::Tree, tree)));
    }
    let mut current = tree;
    let mut components = path.split('/').peekable();
    while let Some(component) = components.next() {
        let entries = store.read_tree(current)?;
        let Some(entry) = entries.iter().find(|e| e.name == component) else {
            return Ok(None);
        };
        if components.peek().is_none() {
            return Ok(Some((entry.mode, entry.id)));
        }
        if !entry.mode.is_tree() {
            return Ok(None);
        }
        current = entry.id;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_id(n: u8) -> ObjectId {
        ObjectId::from_bytes([n; OBJECT_ID_LEN])
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let entries = vec![
            TreeEntry::new("b.txt", FileMode::RegularFile, blob_id(1)),
            TreeEntry::new("a", FileMode::Tree, blob_id(2)),
            TreeEntry::new("run.sh", FileMode::ExecutableFile, blob_id(3)),
        ];
        let bytes = encode_tree(&entries);
        let decoded = decode_tree(&bytes).unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(decoded.iter().any(|e| e.name == "a" && e.mode.is_tree()));
    }

    #[test]
    fn test_canonical_order_puts_directory_after_dotted_file() {
        // "a.txt" sorts before the directory "a" because '.' < '/'.
        let file = TreeEntry::new("a.txt", FileMode::RegularFile, blob_id(1));
        let dir = TreeEntry::new("a", FileMode::Tree, blob_id(2));
        assert_eq!(canonical_order(&file, &dir), Ordering::Less);

        // "a0" sorts after the directory "a" because '0' > '/'.
        let file0 = TreeEntry::new("a0", FileMode::RegularFile, blob_id(3));
        assert_eq!(canonical_order(&dir, &file0), Ordering::Less);
    }

    #[test]
    fn test_encode_is_order_insensitive() {
        let a = TreeEntry::new("x", FileMode::RegularFile, blob_id(1));
        let b = TreeEntry::new("y", FileMode::RegularFile, blob_id(2));
        assert_eq!(
            encode_tree(&[a.clone(), b.clone()]),
            encode_tree(&[b, a])
        );
    }

    #[test]
    fn test_encode_skips_missing_entries() {
        let entries = vec![
            TreeEntry::new("gone", FileMode::Missing, ObjectId::zero()),
            TreeEntry::new("kept", FileMode::RegularFile, blob_id(1)),
        ];
        let decoded = decode_tree(&encode_tree(&entries)).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "kept");
    }
}
