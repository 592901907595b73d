//! Branch head lifecycle helpers.
//!
//! The variants differ only in the reflog message they leave behind and
//! in whether the update is forced.

use super::object_store::ObjectStore;
use super::{Commit, ObjectId, Result};

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Normalize a branch name to its full reference name.
pub fn ensure_branch_ref_name(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("{BRANCH_REF_PREFIX}{name}")
    }
}

/// Tests if a branch exists.
pub fn branch_exists(store: &dyn ObjectStore, name: &str) -> Result<bool> {
    Ok(store.resolve_ref(&ensure_branch_ref_name(name))?.is_some())
}

/// The commit a branch head currently points at, or `None` if the
/// branch does not exist.
pub fn get_head_commit(store: &dyn ObjectStore, name: &str) -> Result<Option<Commit>> {
    match store.resolve_ref(&ensure_branch_ref_name(name))? {
        Some(id) => Ok(Some(store.read_commit(id)?)),
        None => Ok(None),
    }
}

/// Point a branch at its first commit.
pub fn init_branch_head(
    store: &dyn ObjectStore,
    name: &str,
    commit_id: ObjectId,
    short_message: &str,
) -> Result<()> {
    set_branch_head(
        store,
        name,
        commit_id,
        &make_reflog_message("commit (initial)", short_message),
        false,
    )
}

/// Advance a branch to a new commit.
pub fn commit_branch_head(
    store: &dyn ObjectStore,
    name: &str,
    commit_id: ObjectId,
    short_message: &str,
) -> Result<()> {
    set_branch_head(
        store,
        name,
        commit_id,
        &make_reflog_message("commit", short_message),
        false,
    )
}

/// Replace a branch head with an amended commit.
pub fn amend_branch_head(
    store: &dyn ObjectStore,
    name: &str,
    commit_id: ObjectId,
    short_message: &str,
) -> Result<()> {
    set_branch_head(
        store,
        name,
        commit_id,
        &make_reflog_message("commit (amend)", short_message),
        true,
    )
}

/// Move a branch head to an arbitrary commit.
pub fn reset_branch_head(store: &dyn ObjectStore, name: &str, commit_id: ObjectId) -> Result<()> {
    let ref_name = ensure_branch_ref_name(name);
    set_branch_head(
        store,
        name,
        commit_id,
        &make_reflog_message(&ref_name, "updating HEAD"),
        true,
    )
}

fn set_branch_head(
    store: &dyn ObjectStore,
    name: &str,
    commit_id: ObjectId,
    reflog_message: &str,
    force: bool,
) -> Result<()> {
    let ref_name = ensure_branch_ref_name(name);
    let current = store.resolve_ref(&ref_name)?;
    store.update_ref(&ref_name, commit_id, current, force, reflog_message)
}

fn make_reflog_message(action: &str, details: &str) -> String {
    format!("{action}: {details}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PersonIdent};

    fn make_commit(store: &MemoryStore, message: &str) -> ObjectId {
        let tree = store.insert_tree(&[]).unwrap();
        let ident = PersonIdent::new("Test", "test@example.com");
        store
            .insert_commit(tree, &[], &ident, &ident, message)
            .unwrap()
    }

    #[test]
    fn test_ensure_branch_ref_name() {
        assert_eq!(ensure_branch_ref_name("main"), "refs/heads/main");
        assert_eq!(ensure_branch_ref_name("refs/heads/main"), "refs/heads/main");
    }

    #[test]
    fn test_init_then_commit() {
        let store = MemoryStore::new();
        let c1 = make_commit(&store, "first");
        let c2 = make_commit(&store, "second");

        assert!(!branch_exists(&store, "main").unwrap());
        init_branch_head(&store, "main", c1, "first").unwrap();
        assert!(branch_exists(&store, "main").unwrap());
        commit_branch_head(&store, "main", c2, "second").unwrap();

        let head = get_head_commit(&store, "main").unwrap().unwrap();
        assert_eq!(head.id, c2);

        let log = store.reflog("refs/heads/main").unwrap();
        assert_eq!(log[0].message, "commit (initial): first");
        assert_eq!(log[1].message, "commit: second");
    }

    #[test]
    fn test_amend_reflog_message() {
        let store = MemoryStore::new();
        let c1 = make_commit(&store, "first");
        let c2 = make_commit(&store, "first, fixed");
        init_branch_head(&store, "main", c1, "first").unwrap();
        amend_branch_head(&store, "main", c2, "first, fixed").unwrap();

        let log = store.reflog("refs/heads/main").unwrap();
        assert_eq!(log[1].message, "commit (amend): first, fixed");
    }

    #[test]
    fn test_reset_branch_head() {
        let store = MemoryStore::new();
        let c1 = make_commit(&store, "first");
        let c2 = make_commit(&store, "second");
        init_branch_head(&store, "main", c1, "first").unwrap();
        commit_branch_head(&store, "main", c2, "second").unwrap();
        reset_branch_head(&store, "main", c1).unwrap();

        let head = get_head_commit(&store, "main").unwrap().unwrap();
        assert_eq!(head.id, c1);
        let log = store.reflog("refs/heads/main").unwrap();
        assert_eq!(log[2].message, "refs/heads/main: updating HEAD");
    }
}
