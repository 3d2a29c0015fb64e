//! Entity lifecycle state and group typing.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a container, user or group.
///
/// Removal is a two-step protocol: `remove_*` stages the entity as
/// [`PendingRemoval`](EntityState::PendingRemoval) until the reconciler
/// confirms the remote deletion, after which the slot becomes a
/// [`Destroyed`](EntityState::Destroyed) tombstone. `destroy_*` jumps
/// straight to the tombstone with no remote effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityState {
    /// Live entity.
    Active,
    /// Staged for deletion on the remote directory.
    PendingRemoval,
    /// Local tombstone; the slot is never reused.
    Destroyed,
}

impl EntityState {
    /// Whether the entity is still part of the graph (active or staged).
    pub fn is_present(self) -> bool {
        !matches!(self, EntityState::Destroyed)
    }
}

/// Group scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupScope {
    DomainLocal,
    Global,
    Universal,
}

/// Group category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupCategory {
    Security,
    Distribution,
}

/// The seven `/etc/shadow` aging fields, carried as optional directory
/// attributes on POSIX users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowAttrs {
    /// Days since the epoch of the last password change.
    pub last_change: Option<i64>,
    /// Minimum days between password changes.
    pub min: Option<i64>,
    /// Maximum password age in days.
    pub max: Option<i64>,
    /// Days of warning before expiry.
    pub warning: Option<i64>,
    /// Days of inactivity allowed after expiry.
    pub inactive: Option<i64>,
    /// Account expiry as days since the epoch.
    pub expire: Option<i64>,
    /// Reserved flag field.
    pub flag: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_presence() {
        assert!(EntityState::Active.is_present());
        assert!(EntityState::PendingRemoval.is_present());
        assert!(!EntityState::Destroyed.is_present());
    }
}
