//! Arena keys.
//!
//! Entities never hold references to each other; they hold copyable keys
//! into the owning [`Directory`](super::Directory)'s arenas. Each key
//! carries the directory's instance id, so a key minted by one directory is
//! rejected by another instead of silently aliasing an unrelated slot.

use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_DIRECTORY_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identifier of a [`Directory`](super::Directory) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirectoryId(u32);

impl DirectoryId {
    pub(crate) fn next() -> Self {
        DirectoryId(NEXT_DIRECTORY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

macro_rules! arena_key {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name {
            pub(crate) dir: DirectoryId,
            pub(crate) index: u32,
        }

        impl $name {
            pub(crate) fn new(dir: DirectoryId, index: usize) -> Self {
                Self {
                    dir,
                    index: index as u32,
                }
            }

            pub(crate) fn index(self) -> usize {
                self.index as usize
            }

            pub(crate) fn directory_id(self) -> DirectoryId {
                self.dir
            }
        }
    };
}

arena_key!(
    /// Key of a container within its directory.
    ContainerKey
);
arena_key!(
    /// Key of a user within its directory.
    UserKey
);
arena_key!(
    /// Key of a group within its directory.
    GroupKey
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_ids_are_unique() {
        let a = DirectoryId::next();
        let b = DirectoryId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_keys_compare_by_directory_and_index() {
        let dir = DirectoryId::next();
        let a = UserKey::new(dir, 0);
        let b = UserKey::new(dir, 1);
        assert!(a < b);
        assert_eq!(a, UserKey::new(dir, 0));
    }
}
