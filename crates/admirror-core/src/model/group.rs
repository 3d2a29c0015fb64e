//! Groups and their POSIX extension.

use std::collections::BTreeSet;

use crate::model::error::{ModelError, ModelResult};
use crate::model::keys::{ContainerKey, GroupKey, UserKey};
use crate::model::types::{EntityState, GroupCategory, GroupScope};

/// POSIX attributes of a group.
#[derive(Debug, Clone)]
pub struct PosixGroup {
    pub(crate) gid: u32,
    pub(crate) nis_domain: Option<String>,
    pub(crate) unix_password: Option<String>,
}

impl PosixGroup {
    pub(crate) fn new(gid: u32) -> Self {
        PosixGroup {
            gid,
            nis_domain: None,
            unix_password: None,
        }
    }

    /// POSIX group identifier.
    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// NIS domain.
    pub fn nis_domain(&self) -> Option<&str> {
        self.nis_domain.as_deref()
    }

    /// UNIX password hash.
    pub fn unix_password(&self) -> Option<&str> {
        self.unix_password.as_deref()
    }
}

/// A directory group.
#[derive(Debug, Clone)]
pub struct Group {
    pub(crate) name: String,
    pub(crate) container: ContainerKey,
    pub(crate) rid: Option<u32>,
    pub(crate) scope: GroupScope,
    pub(crate) category: GroupCategory,
    pub(crate) users: BTreeSet<UserKey>,
    pub(crate) groups: BTreeSet<GroupKey>,
    pub(crate) removed_users: BTreeSet<UserKey>,
    pub(crate) removed_groups: BTreeSet<GroupKey>,
    pub(crate) posix: Option<PosixGroup>,
    pub(crate) loaded: bool,
    pub(crate) modified: bool,
    pub(crate) state: EntityState,
}

impl Group {
    pub(crate) fn new(
        name: String,
        container: ContainerKey,
        scope: GroupScope,
        category: GroupCategory,
    ) -> Self {
        Group {
            name,
            container,
            rid: None,
            scope,
            category,
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
            removed_users: BTreeSet::new(),
            removed_groups: BTreeSet::new(),
            posix: None,
            loaded: false,
            modified: true,
            state: EntityState::Active,
        }
    }

    /// The group name, unique case-insensitively across the directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the owning container.
    pub fn container(&self) -> ContainerKey {
        self.container
    }

    /// Relative identifier, assigned by the remote directory.
    pub fn rid(&self) -> Option<u32> {
        self.rid
    }

    /// Group scope.
    pub fn scope(&self) -> GroupScope {
        self.scope
    }

    /// Group category.
    pub fn category(&self) -> GroupCategory {
        self.category
    }

    /// Whether this group may be used as a primary group: a security group
    /// of global or universal scope.
    pub fn is_primary_capable(&self) -> bool {
        self.category == GroupCategory::Security
            && matches!(self.scope, GroupScope::Global | GroupScope::Universal)
    }

    /// Keys of explicit user members.
    pub fn users(&self) -> impl Iterator<Item = UserKey> + '_ {
        self.users.iter().copied()
    }

    /// Keys of explicit group members.
    pub fn groups(&self) -> impl Iterator<Item = GroupKey> + '_ {
        self.groups.iter().copied()
    }

    /// User memberships staged for remote removal.
    pub fn removed_users(&self) -> impl Iterator<Item = UserKey> + '_ {
        self.removed_users.iter().copied()
    }

    /// Group memberships staged for remote removal.
    pub fn removed_groups(&self) -> impl Iterator<Item = GroupKey> + '_ {
        self.removed_groups.iter().copied()
    }

    /// POSIX extension, when present.
    pub fn posix(&self) -> Option<&PosixGroup> {
        self.posix.as_ref()
    }

    /// Whether the group carries the POSIX extension.
    pub fn is_posix(&self) -> bool {
        self.posix.is_some()
    }

    /// POSIX group identifier, when present.
    pub fn gid(&self) -> Option<u32> {
        self.posix.as_ref().map(PosixGroup::gid)
    }

    /// Whether the group was hydrated from the remote directory.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Whether local edits are pending synchronization.
    pub fn modified(&self) -> bool {
        self.modified
    }

    /// Lifecycle state.
    pub fn state(&self) -> EntityState {
        self.state
    }

    // Scalar setters.

    pub fn set_nis_domain(&mut self, value: Option<String>) -> ModelResult<()> {
        self.posix_fields()?.nis_domain = value;
        self.modified = true;
        Ok(())
    }

    pub fn set_unix_password(&mut self, value: Option<String>) -> ModelResult<()> {
        self.posix_fields()?.unix_password = value;
        self.modified = true;
        Ok(())
    }

    fn posix_fields(&mut self) -> ModelResult<&mut PosixGroup> {
        let name = self.name.clone();
        self.posix
            .as_mut()
            .ok_or(ModelError::NotPosixGroup { name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::keys::DirectoryId;

    fn sample(scope: GroupScope, category: GroupCategory) -> Group {
        Group::new(
            "staff".to_string(),
            ContainerKey::new(DirectoryId::next(), 0),
            scope,
            category,
        )
    }

    #[test]
    fn test_primary_capability() {
        assert!(sample(GroupScope::Global, GroupCategory::Security).is_primary_capable());
        assert!(sample(GroupScope::Universal, GroupCategory::Security).is_primary_capable());
        assert!(!sample(GroupScope::DomainLocal, GroupCategory::Security).is_primary_capable());
        assert!(!sample(GroupScope::Global, GroupCategory::Distribution).is_primary_capable());
        assert!(!sample(GroupScope::Universal, GroupCategory::Distribution).is_primary_capable());
    }

    #[test]
    fn test_posix_setters_require_extension() {
        let mut group = sample(GroupScope::Global, GroupCategory::Security);
        assert!(matches!(
            group.set_nis_domain(Some("lab".to_string())),
            Err(ModelError::NotPosixGroup { .. })
        ));
        group.posix = Some(PosixGroup::new(2000));
        group.set_nis_domain(Some("lab".to_string())).unwrap();
        assert_eq!(group.posix().unwrap().nis_domain(), Some("lab"));
    }
}
