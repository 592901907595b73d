//! Filesystem lifecycle phases.

use std::fmt;

/// The lifecycle phase of a filesystem instance.
///
/// The core stores and reports this tag; it never transitions it. The
/// surrounding orchestration uses it as a coordination hint while running
/// multi-step operations such as merges or stash application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsState {
    #[default]
    Normal,
    CheckingOut,
    Committing,
    Merging,
    MergingConflict,
    CherryPicking,
    CherryPickingConflict,
    Resetting,
    CreatingStash,
    ApplyingStash,
}

impl FsState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsState::Normal => "normal",
            FsState::CheckingOut => "checking-out",
            FsState::Committing => "committing",
            FsState::Merging => "merging",
            FsState::MergingConflict => "merging-conflict",
            FsState::CherryPicking => "cherry-picking",
            FsState::CherryPickingConflict => "cherry-picking-conflict",
            FsState::Resetting => "resetting",
            FsState::CreatingStash => "creating-stash",
            FsState::ApplyingStash => "applying-stash",
        }
    }
}

impl fmt::Display for FsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_normal() {
        assert_eq!(FsState::default(), FsState::Normal);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(FsState::Merging.to_string(), "merging");
        assert_eq!(FsState::CherryPickingConflict.to_string(), "cherry-picking-conflict");
        assert_eq!(FsState::ApplyingStash.to_string(), "applying-stash");
    }
}
