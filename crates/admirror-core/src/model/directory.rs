//! The directory root: arena storage and every graph invariant.
//!
//! All cross-entity mutation goes through [`Directory`] so that the
//! invariants of the identity graph hold after every call: flat uniqueness
//! namespaces (account names, RIDs, UIDs, GIDs), implicit primary/main
//! group membership, cascading removal, and the two-step removal protocol.
//! Every mutator validates completely before touching any edge; a returned
//! error means the graph is unchanged.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::container::{normalize_name, validate_name, Container};
use crate::model::error::{ModelError, ModelResult};
use crate::model::group::{Group, PosixGroup};
use crate::model::keys::{ContainerKey, DirectoryId, GroupKey, UserKey};
use crate::model::types::{EntityState, GroupCategory, GroupScope};
use crate::model::user::{PosixUser, User};
use crate::schema::escape_dn_value;

/// Static configuration of a directory scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySettings {
    /// Root distinguished name, e.g. `dc=example,dc=com`.
    pub root_dn: String,

    /// Floor for allocated UIDs when none are in use yet.
    #[serde(default = "default_min_id")]
    pub min_uid: u32,

    /// Floor for allocated GIDs when none are in use yet.
    #[serde(default = "default_min_id")]
    pub min_gid: u32,

    /// Name of the default users container.
    #[serde(default = "default_users_container")]
    pub users_container: String,
}

fn default_min_id() -> u32 {
    1000
}

fn default_users_container() -> String {
    "cn=Users".to_string()
}

impl DirectorySettings {
    /// Create settings for the given root DN with defaults.
    pub fn new(root_dn: impl Into<String>) -> Self {
        Self {
            root_dn: root_dn.into(),
            min_uid: default_min_id(),
            min_gid: default_min_id(),
            users_container: default_users_container(),
        }
    }

    /// Override the UID floor.
    #[must_use]
    pub fn with_min_uid(mut self, min_uid: u32) -> Self {
        self.min_uid = min_uid;
        self
    }

    /// Override the GID floor.
    #[must_use]
    pub fn with_min_gid(mut self, min_gid: u32) -> Self {
        self.min_gid = min_gid;
        self
    }
}

/// The root of one directory scope's identity graph.
pub struct Directory {
    id: DirectoryId,
    settings: DirectorySettings,
    containers: Vec<Container>,
    users: Vec<User>,
    groups: Vec<Group>,
    rids: BTreeSet<u32>,
    uids: BTreeSet<u32>,
    gids: BTreeSet<u32>,
    default_container: ContainerKey,
}

impl Directory {
    /// Create an empty graph for the given scope.
    ///
    /// The default users container always exists; it can never be removed
    /// or destroyed.
    pub fn new(settings: DirectorySettings) -> ModelResult<Self> {
        let users_container = normalize_name(&settings.users_container);
        validate_name(&users_container)?;

        let id = DirectoryId::next();
        let mut directory = Directory {
            id,
            settings,
            containers: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
            rids: BTreeSet::new(),
            uids: BTreeSet::new(),
            gids: BTreeSet::new(),
            default_container: ContainerKey::new(id, 0),
        };
        directory.containers.push(Container::new(users_container));
        Ok(directory)
    }

    /// The scope's settings.
    pub fn settings(&self) -> &DirectorySettings {
        &self.settings
    }

    /// Root distinguished name.
    pub fn root_dn(&self) -> &str {
        &self.settings.root_dn
    }

    /// Key of the default users container.
    pub fn default_container(&self) -> ContainerKey {
        self.default_container
    }

    // ------------------------------------------------------------------
    // Key resolution

    fn container_index(&self, key: ContainerKey) -> ModelResult<usize> {
        if key.directory_id() != self.id || key.index() >= self.containers.len() {
            return Err(ModelError::ForeignDirectory);
        }
        Ok(key.index())
    }

    fn user_index(&self, key: UserKey) -> ModelResult<usize> {
        if key.directory_id() != self.id || key.index() >= self.users.len() {
            return Err(ModelError::ForeignDirectory);
        }
        Ok(key.index())
    }

    fn group_index(&self, key: GroupKey) -> ModelResult<usize> {
        if key.directory_id() != self.id || key.index() >= self.groups.len() {
            return Err(ModelError::ForeignDirectory);
        }
        Ok(key.index())
    }

    /// Borrow a container.
    pub fn container(&self, key: ContainerKey) -> ModelResult<&Container> {
        Ok(&self.containers[self.container_index(key)?])
    }

    /// Borrow a user.
    pub fn user(&self, key: UserKey) -> ModelResult<&User> {
        Ok(&self.users[self.user_index(key)?])
    }

    /// Borrow a group.
    pub fn group(&self, key: GroupKey) -> ModelResult<&Group> {
        Ok(&self.groups[self.group_index(key)?])
    }

    /// Mutably borrow an active user for scalar edits.
    pub fn user_mut(&mut self, key: UserKey) -> ModelResult<&mut User> {
        let index = self.user_index(key)?;
        let user = &mut self.users[index];
        if user.state != EntityState::Active {
            return Err(ModelError::NotActive {
                name: user.username.clone(),
            });
        }
        Ok(user)
    }

    /// Mutably borrow an active group for scalar edits.
    pub fn group_mut(&mut self, key: GroupKey) -> ModelResult<&mut Group> {
        let index = self.group_index(key)?;
        let group = &mut self.groups[index];
        if group.state != EntityState::Active {
            return Err(ModelError::NotActive {
                name: group.name.clone(),
            });
        }
        Ok(group)
    }

    fn active_container(&self, key: ContainerKey) -> ModelResult<usize> {
        let index = self.container_index(key)?;
        if self.containers[index].state != EntityState::Active {
            return Err(ModelError::NotActive {
                name: self.containers[index].name.clone(),
            });
        }
        Ok(index)
    }

    fn active_user(&self, key: UserKey) -> ModelResult<usize> {
        let index = self.user_index(key)?;
        if self.users[index].state != EntityState::Active {
            return Err(ModelError::NotActive {
                name: self.users[index].username.clone(),
            });
        }
        Ok(index)
    }

    fn active_group(&self, key: GroupKey) -> ModelResult<usize> {
        let index = self.group_index(key)?;
        if self.groups[index].state != EntityState::Active {
            return Err(ModelError::NotActive {
                name: self.groups[index].name.clone(),
            });
        }
        Ok(index)
    }

    // ------------------------------------------------------------------
    // Iteration

    /// All non-destroyed containers.
    pub fn containers(&self) -> impl Iterator<Item = (ContainerKey, &Container)> {
        self.containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state.is_present())
            .map(|(i, c)| (ContainerKey::new(self.id, i), c))
    }

    /// All non-destroyed users.
    pub fn users(&self) -> impl Iterator<Item = (UserKey, &User)> {
        self.users
            .iter()
            .enumerate()
            .filter(|(_, u)| u.state.is_present())
            .map(|(i, u)| (UserKey::new(self.id, i), u))
    }

    /// All non-destroyed groups.
    pub fn groups(&self) -> impl Iterator<Item = (GroupKey, &Group)> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.state.is_present())
            .map(|(i, g)| (GroupKey::new(self.id, i), g))
    }

    /// RIDs currently in use in this scope.
    pub fn rids(&self) -> impl Iterator<Item = u32> + '_ {
        self.rids.iter().copied()
    }

    /// UIDs currently claimed in this scope.
    pub fn uids(&self) -> impl Iterator<Item = u32> + '_ {
        self.uids.iter().copied()
    }

    /// GIDs currently claimed in this scope.
    pub fn gids(&self) -> impl Iterator<Item = u32> + '_ {
        self.gids.iter().copied()
    }

    // ------------------------------------------------------------------
    // Distinguished names

    /// Distinguished name of a container.
    pub fn container_dn(&self, key: ContainerKey) -> ModelResult<String> {
        let container = self.container(key)?;
        Ok(format!("{},{}", container.name, self.settings.root_dn))
    }

    /// Distinguished name of a user, derived from its common name.
    pub fn user_dn(&self, key: UserKey) -> ModelResult<String> {
        let user = self.user(key)?;
        let container = self.container(user.container)?;
        Ok(format!(
            "cn={},{},{}",
            escape_dn_value(&user.common_name),
            container.name,
            self.settings.root_dn
        ))
    }

    /// Distinguished name of a group.
    pub fn group_dn(&self, key: GroupKey) -> ModelResult<String> {
        let group = self.group(key)?;
        let container = self.container(group.container)?;
        Ok(format!(
            "cn={},{},{}",
            escape_dn_value(&group.name),
            container.name,
            self.settings.root_dn
        ))
    }

    /// Derived GID of a POSIX user: the GID of its UNIX main group.
    pub fn user_gid(&self, key: UserKey) -> ModelResult<Option<u32>> {
        let user = self.user(key)?;
        match &user.posix {
            Some(posix) => Ok(self.group(posix.main_group)?.gid()),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Uniqueness checks

    fn check_account_name_free(&self, name: &str) -> ModelResult<()> {
        let clash = self
            .users
            .iter()
            .any(|u| u.state.is_present() && u.username.eq_ignore_ascii_case(name))
            || self
                .groups
                .iter()
                .any(|g| g.state.is_present() && g.name.eq_ignore_ascii_case(name));
        if clash {
            return Err(ModelError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn check_rid_free(&self, rid: u32) -> ModelResult<()> {
        if self.rids.contains(&rid) {
            return Err(ModelError::DuplicateRid { rid });
        }
        Ok(())
    }

    fn check_uid_free(&self, uid: u32) -> ModelResult<()> {
        if self.uids.contains(&uid) {
            return Err(ModelError::DuplicateUid { uid });
        }
        Ok(())
    }

    fn check_gid_free(&self, gid: u32) -> ModelResult<()> {
        if self.gids.contains(&gid) {
            return Err(ModelError::DuplicateGid { gid });
        }
        Ok(())
    }

    fn check_primary_capable(&self, key: GroupKey) -> ModelResult<()> {
        let group = &self.groups[self.active_group(key)?];
        if !group.is_primary_capable() {
            return Err(ModelError::InvalidPrimaryGroup {
                name: group.name.clone(),
                reason: "primary groups must be security groups of global or universal scope"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn check_posix_group(&self, key: GroupKey) -> ModelResult<()> {
        let group = &self.groups[self.active_group(key)?];
        if !group.is_posix() {
            return Err(ModelError::NotPosixGroup {
                name: group.name.clone(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Containers

    /// Create a container.
    ///
    /// The name is normalized (whitespace around separators stripped) and
    /// validated; container names are unique case-insensitively.
    pub fn create_container(&mut self, name: &str) -> ModelResult<ContainerKey> {
        let name = normalize_name(name);
        validate_name(&name)?;
        if self
            .containers
            .iter()
            .any(|c| c.state.is_present() && c.name.eq_ignore_ascii_case(&name))
        {
            return Err(ModelError::DuplicateContainer { name });
        }

        let key = ContainerKey::new(self.id, self.containers.len());
        debug!(container = %name, "Creating container");
        self.containers.push(Container::new(name));
        Ok(key)
    }

    /// Stage a container and everything it owns for remote deletion.
    ///
    /// Fails before any change when a group in this container is still the
    /// primary or UNIX main group of a user outside it.
    pub fn remove_container(&mut self, key: ContainerKey) -> ModelResult<()> {
        let index = self.active_container(key)?;
        if key == self.default_container {
            return Err(ModelError::DefaultContainer);
        }

        self.check_container_groups_unreferenced(key)?;

        let users: Vec<UserKey> = self.containers[index]
            .users
            .iter()
            .copied()
            .filter(|&u| self.users[u.index()].state == EntityState::Active)
            .collect();
        let groups: Vec<GroupKey> = self.containers[index]
            .groups
            .iter()
            .copied()
            .filter(|&g| self.groups[g.index()].state == EntityState::Active)
            .collect();

        for user in users {
            self.remove_user(user)?;
        }
        for group in groups {
            self.remove_group(group)?;
        }

        debug!(container = %self.containers[index].name, "Container staged for removal");
        self.containers[index].state = EntityState::PendingRemoval;
        Ok(())
    }

    /// Forget a container and everything it owns, with no remote effect.
    pub fn destroy_container(&mut self, key: ContainerKey) -> ModelResult<()> {
        let index = self.active_container(key)?;
        if key == self.default_container {
            return Err(ModelError::DefaultContainer);
        }

        self.check_container_groups_unreferenced(key)?;

        let users: Vec<UserKey> = self.containers[index].users.iter().copied().collect();
        let groups: Vec<GroupKey> = self.containers[index].groups.iter().copied().collect();
        for user in users {
            if self.users[user.index()].state.is_present() {
                self.erase_user(user);
            }
        }
        for group in groups {
            if self.groups[group.index()].state.is_present() {
                self.erase_group(group);
            }
        }
        self.containers[index].state = EntityState::Destroyed;
        Ok(())
    }

    /// Error when a group of the container is the primary or main group of
    /// any active user living outside the container.
    fn check_container_groups_unreferenced(&self, key: ContainerKey) -> ModelResult<()> {
        let container = &self.containers[key.index()];
        for &group_key in &container.groups {
            let group = &self.groups[group_key.index()];
            if group.state != EntityState::Active {
                continue;
            }
            for user in &self.users {
                if user.state != EntityState::Active || user.container == key {
                    continue;
                }
                if user.primary_group == group_key {
                    return Err(ModelError::GroupInUse {
                        name: group.name.clone(),
                        role: "primary group",
                        referenced_by: user.username.clone(),
                    });
                }
                if user.posix.as_ref().map(|p| p.main_group) == Some(group_key) {
                    return Err(ModelError::GroupInUse {
                        name: group.name.clone(),
                        role: "UNIX main group",
                        referenced_by: user.username.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Groups

    /// Create a group.
    pub fn create_group(
        &mut self,
        container: ContainerKey,
        name: &str,
        scope: GroupScope,
        category: GroupCategory,
    ) -> ModelResult<GroupKey> {
        let container_index = self.active_container(container)?;
        self.check_account_name_free(name)?;

        let key = GroupKey::new(self.id, self.groups.len());
        debug!(group = %name, "Creating group");
        self.groups
            .push(Group::new(name.to_string(), container, scope, category));
        self.containers[container_index].groups.insert(key);
        Ok(key)
    }

    /// Create a group carrying the POSIX extension.
    pub fn create_posix_group(
        &mut self,
        container: ContainerKey,
        name: &str,
        scope: GroupScope,
        category: GroupCategory,
        gid: u32,
    ) -> ModelResult<GroupKey> {
        self.active_container(container)?;
        self.check_account_name_free(name)?;
        self.check_gid_free(gid)?;

        let key = self.create_group(container, name, scope, category)?;
        self.groups[key.index()].posix = Some(PosixGroup::new(gid));
        self.gids.insert(gid);
        Ok(key)
    }

    /// Add the POSIX extension to an existing group.
    pub fn extend_posix_group(&mut self, key: GroupKey, gid: u32) -> ModelResult<()> {
        let index = self.active_group(key)?;
        if self.groups[index].is_posix() {
            return Err(ModelError::AlreadyPosix {
                name: self.groups[index].name.clone(),
            });
        }
        self.check_gid_free(gid)?;

        self.groups[index].posix = Some(PosixGroup::new(gid));
        self.groups[index].modified = true;
        self.gids.insert(gid);
        Ok(())
    }

    /// Stage a group for remote deletion.
    ///
    /// Refused while any active user of the whole directory references the
    /// group as primary group or (for POSIX groups) as UNIX main group.
    /// Cascades: the group is stripped from every other group and every
    /// user, each removed edge recorded in the owning staging set.
    pub fn remove_group(&mut self, key: GroupKey) -> ModelResult<()> {
        let index = self.active_group(key)?;
        self.check_group_unreferenced(key)?;

        for group in &mut self.groups {
            if group.state.is_present() && group.groups.remove(&key) {
                group.removed_groups.insert(key);
                group.modified = true;
            }
        }
        for user in &mut self.users {
            if user.state.is_present() && user.groups.remove(&key) {
                user.removed_groups.insert(key);
            }
        }

        debug!(group = %self.groups[index].name, "Group staged for removal");
        self.groups[index].state = EntityState::PendingRemoval;
        Ok(())
    }

    /// Forget a group locally, with no remote effect.
    ///
    /// The same still-referenced checks as [`remove_group`](Self::remove_group)
    /// apply.
    pub fn destroy_group(&mut self, key: GroupKey) -> ModelResult<()> {
        let index = self.group_index(key)?;
        if !self.groups[index].state.is_present() {
            return Err(ModelError::NotActive {
                name: self.groups[index].name.clone(),
            });
        }
        self.check_group_unreferenced(key)?;
        self.erase_group(key);
        Ok(())
    }

    fn check_group_unreferenced(&self, key: GroupKey) -> ModelResult<()> {
        let group = &self.groups[key.index()];
        for user in &self.users {
            if user.state != EntityState::Active {
                continue;
            }
            if user.primary_group == key {
                return Err(ModelError::GroupInUse {
                    name: group.name.clone(),
                    role: "primary group",
                    referenced_by: user.username.clone(),
                });
            }
            if user.posix.as_ref().map(|p| p.main_group) == Some(key) {
                return Err(ModelError::GroupInUse {
                    name: group.name.clone(),
                    role: "UNIX main group",
                    referenced_by: user.username.clone(),
                });
            }
        }
        Ok(())
    }

    /// Drop every trace of a group: edges, staging entries, identifiers.
    fn erase_group(&mut self, key: GroupKey) {
        for group in &mut self.groups {
            group.groups.remove(&key);
            group.removed_groups.remove(&key);
        }
        for user in &mut self.users {
            user.groups.remove(&key);
            user.removed_groups.remove(&key);
        }
        let (rid, gid, container) = {
            let group = &self.groups[key.index()];
            (group.rid, group.gid(), group.container)
        };
        if let Some(rid) = rid {
            self.rids.remove(&rid);
        }
        if let Some(gid) = gid {
            self.gids.remove(&gid);
        }
        self.groups[key.index()].state = EntityState::Destroyed;
        self.containers[container.index()].groups.remove(&key);
    }

    // ------------------------------------------------------------------
    // Users

    /// Create a user.
    ///
    /// The primary group must be a security group of global or universal
    /// scope in this directory. Primary membership is implicit: the user is
    /// never listed in the group's explicit member set.
    pub fn create_user(
        &mut self,
        container: ContainerKey,
        username: &str,
        primary_group: GroupKey,
    ) -> ModelResult<UserKey> {
        let container_index = self.active_container(container)?;
        self.check_account_name_free(username)?;
        self.check_primary_capable(primary_group)?;

        let key = UserKey::new(self.id, self.users.len());
        debug!(user = %username, "Creating user");
        self.users
            .push(User::new(username.to_string(), container, primary_group));
        self.containers[container_index].users.insert(key);
        Ok(key)
    }

    /// Create a user carrying the POSIX extension.
    ///
    /// When the UNIX main group differs from the primary group the user
    /// also becomes an ordinary Windows-level member of it.
    pub fn create_posix_user(
        &mut self,
        container: ContainerKey,
        username: &str,
        primary_group: GroupKey,
        uid: u32,
        main_group: GroupKey,
    ) -> ModelResult<UserKey> {
        self.active_container(container)?;
        self.check_account_name_free(username)?;
        self.check_primary_capable(primary_group)?;
        self.check_uid_free(uid)?;
        self.check_posix_group(main_group)?;

        let key = self.create_user(container, username, primary_group)?;
        self.users[key.index()].posix = Some(PosixUser::new(uid, main_group));
        self.uids.insert(uid);
        if main_group != primary_group {
            self.link_membership(key, main_group);
        }
        Ok(key)
    }

    /// Add the POSIX extension to an existing user.
    pub fn extend_posix_user(
        &mut self,
        key: UserKey,
        uid: u32,
        main_group: GroupKey,
    ) -> ModelResult<()> {
        let index = self.active_user(key)?;
        if self.users[index].is_posix() {
            return Err(ModelError::AlreadyPosix {
                name: self.users[index].username.clone(),
            });
        }
        self.check_uid_free(uid)?;
        self.check_posix_group(main_group)?;

        self.users[index].posix = Some(PosixUser::new(uid, main_group));
        self.users[index].modified = true;
        self.uids.insert(uid);
        if main_group != self.users[index].primary_group {
            self.link_membership(key, main_group);
        }
        Ok(())
    }

    /// Change a user's primary group.
    ///
    /// The order mirrors the remote directory's observable behavior: the
    /// new group is assigned, any explicit membership in it is dropped
    /// (that membership is implicit now), then the user gains ordinary
    /// membership in the group it was demoted from.
    pub fn set_primary_group(&mut self, user: UserKey, group: GroupKey) -> ModelResult<()> {
        let user_index = self.active_user(user)?;
        self.check_primary_capable(group)?;

        let old = self.users[user_index].primary_group;
        self.users[user_index].primary_group = group;
        self.users[user_index].modified = true;

        // Drop explicit membership in the new primary group. The remote
        // side discards the member value itself when primaryGroupID moves,
        // so no removal is staged.
        self.users[user_index].groups.remove(&group);
        self.groups[group.index()].users.remove(&user);

        if old != group {
            self.link_membership(user, old);
        }
        Ok(())
    }

    /// Change a POSIX user's UNIX main group.
    ///
    /// The user's derived GID mirrors the new group. Unless the group is
    /// also the primary group, the user becomes an ordinary Windows-level
    /// member of it; the UNIX-level membership stays implicit.
    pub fn set_unix_main_group(&mut self, user: UserKey, group: GroupKey) -> ModelResult<()> {
        let user_index = self.active_user(user)?;
        self.check_posix_group(group)?;
        if self.users[user_index].posix.is_none() {
            return Err(ModelError::NotPosixUser {
                name: self.users[user_index].username.clone(),
            });
        }

        let posix = self.users[user_index].posix.as_mut().expect("checked");
        if posix.main_group == group {
            return Ok(());
        }
        posix.main_group = group;
        self.users[user_index].modified = true;

        if group != self.users[user_index].primary_group {
            self.link_membership(user, group);
        }
        Ok(())
    }

    /// Stage a user for remote deletion, stripping it from every group's
    /// member set and recording the removed edges.
    pub fn remove_user(&mut self, key: UserKey) -> ModelResult<()> {
        let index = self.active_user(key)?;

        for group in &mut self.groups {
            if group.state.is_present() && group.users.remove(&key) {
                group.removed_users.insert(key);
                group.modified = true;
            }
        }
        let user = &mut self.users[index];
        let memberships: Vec<GroupKey> = user.groups.iter().copied().collect();
        for group in memberships {
            user.removed_groups.insert(group);
        }
        user.groups.clear();

        debug!(user = %user.username, "User staged for removal");
        user.state = EntityState::PendingRemoval;
        Ok(())
    }

    /// Forget a user locally, with no remote effect.
    pub fn destroy_user(&mut self, key: UserKey) -> ModelResult<()> {
        let index = self.user_index(key)?;
        if !self.users[index].state.is_present() {
            return Err(ModelError::NotActive {
                name: self.users[index].username.clone(),
            });
        }
        self.erase_user(key);
        Ok(())
    }

    /// Drop every trace of a user: edges, staging entries, identifiers.
    fn erase_user(&mut self, key: UserKey) {
        for group in &mut self.groups {
            group.users.remove(&key);
            group.removed_users.remove(&key);
        }
        let (rid, uid, container) = {
            let user = &self.users[key.index()];
            (user.rid, user.posix.as_ref().map(PosixUser::uid), user.container)
        };
        if let Some(rid) = rid {
            self.rids.remove(&rid);
        }
        if let Some(uid) = uid {
            self.uids.remove(&uid);
        }
        self.users[key.index()].state = EntityState::Destroyed;
        self.containers[container.index()].users.remove(&key);
    }

    // ------------------------------------------------------------------
    // Membership

    /// Add a user as an explicit member of a group.
    ///
    /// Rejected for the user's primary group (membership is implicit) and
    /// idempotent when the edge already exists.
    pub fn add_user_to_group(&mut self, user: UserKey, group: GroupKey) -> ModelResult<()> {
        let user_index = self.active_user(user)?;
        self.active_group(group)?;

        if self.users[user_index].primary_group == group {
            return Err(ModelError::ImplicitMembership {
                member: self.users[user_index].username.clone(),
                group: self.groups[group.index()].name.clone(),
            });
        }
        self.link_membership(user, group);
        Ok(())
    }

    /// Remove a user's explicit membership, staging the edge for remote
    /// removal.
    ///
    /// Rejected for implicit memberships: the primary group and a POSIX
    /// user's UNIX main group.
    pub fn remove_user_from_group(&mut self, user: UserKey, group: GroupKey) -> ModelResult<()> {
        let user_index = self.active_user(user)?;
        self.active_group(group)?;

        let implicit = self.users[user_index].primary_group == group
            || self.users[user_index].posix.as_ref().map(|p| p.main_group) == Some(group);
        if implicit {
            return Err(ModelError::ImplicitMembership {
                member: self.users[user_index].username.clone(),
                group: self.groups[group.index()].name.clone(),
            });
        }

        if self.groups[group.index()].users.remove(&user) {
            self.groups[group.index()].removed_users.insert(user);
            self.groups[group.index()].modified = true;
            self.users[user_index].groups.remove(&group);
            self.users[user_index].removed_groups.insert(group);
        }
        Ok(())
    }

    /// Add a group as an explicit member of another group.
    pub fn add_group_to_group(&mut self, member: GroupKey, group: GroupKey) -> ModelResult<()> {
        self.active_group(member)?;
        self.active_group(group)?;
        if member == group {
            return Err(ModelError::SelfMembership {
                name: self.groups[group.index()].name.clone(),
            });
        }
        if self.groups[group.index()].groups.insert(member) {
            self.groups[group.index()].removed_groups.remove(&member);
            self.groups[group.index()].modified = true;
        }
        Ok(())
    }

    /// Remove a group's explicit membership in another group, staging the
    /// edge for remote removal.
    pub fn remove_group_from_group(&mut self, member: GroupKey, group: GroupKey) -> ModelResult<()> {
        self.active_group(member)?;
        self.active_group(group)?;
        if self.groups[group.index()].groups.remove(&member) {
            self.groups[group.index()].removed_groups.insert(member);
            self.groups[group.index()].modified = true;
        }
        Ok(())
    }

    /// Establish a membership edge, clearing any staged removal of it.
    fn link_membership(&mut self, user: UserKey, group: GroupKey) {
        if self.groups[group.index()].users.insert(user) {
            self.groups[group.index()].removed_users.remove(&user);
            self.groups[group.index()].modified = true;
            self.users[user.index()].groups.insert(group);
            self.users[user.index()].removed_groups.remove(&group);
        }
    }

    // ------------------------------------------------------------------
    // Lookups

    fn state_matches(state: EntityState, include_removed: bool) -> bool {
        match state {
            EntityState::Active => true,
            EntityState::PendingRemoval => include_removed,
            EntityState::Destroyed => false,
        }
    }

    /// Find a user by predicate.
    pub fn find_user<P>(&self, include_removed: bool, predicate: P) -> Option<UserKey>
    where
        P: Fn(&User) -> bool,
    {
        self.users
            .iter()
            .enumerate()
            .find(|(_, u)| Self::state_matches(u.state, include_removed) && predicate(u))
            .map(|(i, _)| UserKey::new(self.id, i))
    }

    /// Find a user by account name, case-insensitive.
    pub fn find_user_by_username(&self, username: &str, include_removed: bool) -> Option<UserKey> {
        self.find_user(include_removed, |u| {
            u.username.eq_ignore_ascii_case(username)
        })
    }

    /// Find a user by RID.
    pub fn find_user_by_rid(&self, rid: u32, include_removed: bool) -> Option<UserKey> {
        self.find_user(include_removed, |u| u.rid == Some(rid))
    }

    /// Find a POSIX user by UID.
    pub fn find_user_by_uid(&self, uid: u32, include_removed: bool) -> Option<UserKey> {
        self.find_user(include_removed, |u| {
            u.posix.as_ref().map(PosixUser::uid) == Some(uid)
        })
    }

    /// Find a user by distinguished name, case-insensitive.
    pub fn find_user_by_dn(&self, dn: &str, include_removed: bool) -> Option<UserKey> {
        self.users
            .iter()
            .enumerate()
            .filter(|(_, u)| Self::state_matches(u.state, include_removed))
            .map(|(i, _)| UserKey::new(self.id, i))
            .find(|&key| {
                self.user_dn(key)
                    .map(|candidate| candidate.eq_ignore_ascii_case(dn))
                    .unwrap_or(false)
            })
    }

    /// Find a group by predicate.
    pub fn find_group<P>(&self, include_removed: bool, predicate: P) -> Option<GroupKey>
    where
        P: Fn(&Group) -> bool,
    {
        self.groups
            .iter()
            .enumerate()
            .find(|(_, g)| Self::state_matches(g.state, include_removed) && predicate(g))
            .map(|(i, _)| GroupKey::new(self.id, i))
    }

    /// Find a group by name, case-insensitive.
    pub fn find_group_by_name(&self, name: &str, include_removed: bool) -> Option<GroupKey> {
        self.find_group(include_removed, |g| g.name.eq_ignore_ascii_case(name))
    }

    /// Find a group by RID.
    pub fn find_group_by_rid(&self, rid: u32, include_removed: bool) -> Option<GroupKey> {
        self.find_group(include_removed, |g| g.rid == Some(rid))
    }

    /// Find a POSIX group by GID.
    pub fn find_group_by_gid(&self, gid: u32, include_removed: bool) -> Option<GroupKey> {
        self.find_group(include_removed, |g| g.gid() == Some(gid))
    }

    /// Find a group by distinguished name, case-insensitive.
    pub fn find_group_by_dn(&self, dn: &str, include_removed: bool) -> Option<GroupKey> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| Self::state_matches(g.state, include_removed))
            .map(|(i, _)| GroupKey::new(self.id, i))
            .find(|&key| {
                self.group_dn(key)
                    .map(|candidate| candidate.eq_ignore_ascii_case(dn))
                    .unwrap_or(false)
            })
    }

    /// Find a non-destroyed container by normalized name, case-insensitive.
    pub fn find_container(&self, name: &str) -> Option<ContainerKey> {
        let name = normalize_name(name);
        self.containers
            .iter()
            .enumerate()
            .find(|(_, c)| c.state.is_present() && c.name.eq_ignore_ascii_case(&name))
            .map(|(i, _)| ContainerKey::new(self.id, i))
    }

    // ------------------------------------------------------------------
    // Engine support (crate-internal)

    /// Record a remotely assigned RID on a user.
    pub(crate) fn assign_user_rid(&mut self, key: UserKey, rid: u32) -> ModelResult<()> {
        let index = self.user_index(key)?;
        if self.users[index].rid == Some(rid) {
            return Ok(());
        }
        self.check_rid_free(rid)?;
        if let Some(old) = self.users[index].rid {
            self.rids.remove(&old);
        }
        self.users[index].rid = Some(rid);
        self.rids.insert(rid);
        Ok(())
    }

    /// Record a remotely assigned RID on a group.
    pub(crate) fn assign_group_rid(&mut self, key: GroupKey, rid: u32) -> ModelResult<()> {
        let index = self.group_index(key)?;
        if self.groups[index].rid == Some(rid) {
            return Ok(());
        }
        self.check_rid_free(rid)?;
        if let Some(old) = self.groups[index].rid {
            self.rids.remove(&old);
        }
        self.groups[index].rid = Some(rid);
        self.rids.insert(rid);
        Ok(())
    }

    /// Establish a membership edge hydrated from the remote directory,
    /// without dirtying the group. Implicit edges are skipped.
    pub(crate) fn link_loaded_user_member(&mut self, user: UserKey, group: GroupKey) {
        if self.users[user.index()].primary_group == group {
            return;
        }
        if self.groups[group.index()].users.insert(user) {
            self.users[user.index()].groups.insert(group);
        }
    }

    /// Group analogue of [`link_loaded_user_member`](Self::link_loaded_user_member).
    pub(crate) fn link_loaded_group_member(&mut self, member: GroupKey, group: GroupKey) {
        if member == group {
            return;
        }
        self.groups[group.index()].groups.insert(member);
    }

    /// Mark a user hydrated and clean.
    pub(crate) fn mark_user_loaded(&mut self, key: UserKey) {
        let user = &mut self.users[key.index()];
        user.loaded = true;
        user.modified = false;
    }

    /// Mark a group hydrated and clean.
    pub(crate) fn mark_group_loaded(&mut self, key: GroupKey) {
        let group = &mut self.groups[key.index()];
        group.loaded = true;
        group.modified = false;
    }

    pub(crate) fn set_user_loaded_flag(&mut self, key: UserKey) {
        self.users[key.index()].loaded = true;
    }

    pub(crate) fn set_group_loaded_flag(&mut self, key: GroupKey) {
        self.groups[key.index()].loaded = true;
    }

    /// Clear a user's dirty flag and staging after a successful sync pass.
    pub(crate) fn settle_user(&mut self, key: UserKey) {
        let user = &mut self.users[key.index()];
        user.loaded = true;
        user.modified = false;
        user.must_change_password = false;
        user.removed_groups.clear();
    }

    /// Clear a group's dirty flag and staging after a successful sync pass.
    pub(crate) fn settle_group(&mut self, key: GroupKey) {
        let group = &mut self.groups[key.index()];
        group.loaded = true;
        group.modified = false;
        group.removed_users.clear();
        group.removed_groups.clear();
    }

    /// Forget a user whose remote entry is confirmed gone.
    pub(crate) fn forget_user(&mut self, key: UserKey) {
        self.erase_user(key);
    }

    /// Forget a group whose remote entry is confirmed gone.
    pub(crate) fn forget_group(&mut self, key: GroupKey) {
        self.erase_group(key);
    }

    /// Forget a container whose remote entry is confirmed gone.
    pub(crate) fn forget_container(&mut self, key: ContainerKey) {
        self.containers[key.index()].state = EntityState::Destroyed;
    }

    pub(crate) fn take_user_password(&mut self, key: UserKey) -> Option<String> {
        self.users[key.index()].take_password()
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("root_dn", &self.settings.root_dn)
            .field("containers", &self.containers.len())
            .field("users", &self.users.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Directory {
        Directory::new(DirectorySettings::new("dc=example,dc=com")).unwrap()
    }

    /// A directory with a primary-capable group in the default container.
    fn directory_with_domain_users() -> (Directory, GroupKey) {
        let mut dir = directory();
        let group = dir
            .create_group(
                dir.default_container(),
                "Domain Users",
                GroupScope::Global,
                GroupCategory::Security,
            )
            .unwrap();
        (dir, group)
    }

    #[test]
    fn test_default_container_exists_and_is_protected() {
        let mut dir = directory();
        let default = dir.default_container();
        assert_eq!(dir.container(default).unwrap().name(), "cn=Users");
        assert_eq!(
            dir.remove_container(default).unwrap_err(),
            ModelError::DefaultContainer
        );
        assert_eq!(
            dir.destroy_container(default).unwrap_err(),
            ModelError::DefaultContainer
        );
    }

    #[test]
    fn test_duplicate_container_case_insensitive() {
        let mut dir = directory();
        dir.create_container("ou=People").unwrap();
        let err = dir.create_container("OU=People").unwrap_err();
        assert!(matches!(err, ModelError::DuplicateContainer { .. }));
        // Graph unchanged: only the default container and ou=People exist.
        assert_eq!(dir.containers().count(), 2);
    }

    #[test]
    fn test_container_name_normalization() {
        let mut dir = directory();
        let key = dir.create_container(" ou = Payroll , ou = Staff ").unwrap();
        assert_eq!(dir.container(key).unwrap().name(), "ou=Payroll,ou=Staff");
        assert_eq!(
            dir.container_dn(key).unwrap(),
            "ou=Payroll,ou=Staff,dc=example,dc=com"
        );
    }

    #[test]
    fn test_account_names_share_one_namespace() {
        let (mut dir, group) = directory_with_domain_users();
        let container = dir.default_container();
        dir.create_user(container, "staff", group).unwrap();
        let err = dir
            .create_group(container, "Staff", GroupScope::Global, GroupCategory::Security)
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateName { .. }));
    }

    #[test]
    fn test_duplicate_uid_and_gid_rejected() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_posix_group(
                container,
                "staff",
                GroupScope::Global,
                GroupCategory::Security,
                2000,
            )
            .unwrap();
        let err = dir
            .create_posix_group(
                container,
                "other",
                GroupScope::Global,
                GroupCategory::Security,
                2000,
            )
            .unwrap_err();
        assert_eq!(err, ModelError::DuplicateGid { gid: 2000 });

        dir.create_posix_user(container, "alice", domain_users, 1500, staff)
            .unwrap();
        let err = dir
            .create_posix_user(container, "bob", domain_users, 1500, staff)
            .unwrap_err();
        assert_eq!(err, ModelError::DuplicateUid { uid: 1500 });
    }

    #[test]
    fn test_primary_group_must_be_global_or_universal_security() {
        let (mut dir, _) = directory_with_domain_users();
        let container = dir.default_container();
        for (scope, category) in [
            (GroupScope::DomainLocal, GroupCategory::Security),
            (GroupScope::Global, GroupCategory::Distribution),
            (GroupScope::Universal, GroupCategory::Distribution),
            (GroupScope::DomainLocal, GroupCategory::Distribution),
        ] {
            let name = format!("g-{scope:?}-{category:?}");
            let group = dir.create_group(container, &name, scope, category).unwrap();
            let err = dir.create_user(container, "alice", group).unwrap_err();
            assert!(
                matches!(err, ModelError::InvalidPrimaryGroup { .. }),
                "{scope:?}/{category:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_primary_membership_is_implicit() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let alice = dir.create_user(container, "alice", domain_users).unwrap();

        assert!(!dir.group(domain_users).unwrap().users().any(|u| u == alice));
        let err = dir.add_user_to_group(alice, domain_users).unwrap_err();
        assert!(matches!(err, ModelError::ImplicitMembership { .. }));
    }

    #[test]
    fn test_set_primary_group_swaps_memberships() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_group(container, "staff", GroupScope::Global, GroupCategory::Security)
            .unwrap();
        let alice = dir.create_user(container, "alice", domain_users).unwrap();
        dir.add_user_to_group(alice, staff).unwrap();

        dir.set_primary_group(alice, staff).unwrap();

        let user = dir.user(alice).unwrap();
        assert_eq!(user.primary_group(), staff);
        // No explicit membership in the new primary group.
        assert!(!dir.group(staff).unwrap().users().any(|u| u == alice));
        // Ordinary membership in the demoted group.
        assert!(dir.group(domain_users).unwrap().users().any(|u| u == alice));
    }

    #[test]
    fn test_set_primary_group_to_itself_drops_explicit_membership() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let alice = dir.create_user(container, "alice", domain_users).unwrap();
        // Re-assigning the same primary group is a no-op that leaves no
        // explicit membership behind.
        dir.set_primary_group(alice, domain_users).unwrap();
        assert!(!dir.group(domain_users).unwrap().users().any(|u| u == alice));
        assert_eq!(dir.user(alice).unwrap().primary_group(), domain_users);
    }

    #[test]
    fn test_unix_main_group_confers_windows_membership() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_posix_group(
                container,
                "staff",
                GroupScope::Global,
                GroupCategory::Security,
                2000,
            )
            .unwrap();
        let alice = dir
            .create_posix_user(container, "alice", domain_users, 1500, staff)
            .unwrap();

        // Main group differs from primary group: ordinary Windows membership.
        assert!(dir.group(staff).unwrap().users().any(|u| u == alice));
        assert_eq!(dir.user_gid(alice).unwrap(), Some(2000));
        // The implicit UNIX membership cannot be removed.
        let err = dir.remove_user_from_group(alice, staff).unwrap_err();
        assert!(matches!(err, ModelError::ImplicitMembership { .. }));
    }

    #[test]
    fn test_unix_main_group_must_be_posix() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let err = dir
            .create_posix_user(container, "alice", domain_users, 1500, domain_users)
            .unwrap_err();
        assert!(matches!(err, ModelError::NotPosixGroup { .. }));
    }

    #[test]
    fn test_group_self_membership_rejected() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let err = dir.add_group_to_group(domain_users, domain_users).unwrap_err();
        assert!(matches!(err, ModelError::SelfMembership { .. }));
    }

    #[test]
    fn test_foreign_keys_rejected() {
        let (mut dir_a, group_a) = directory_with_domain_users();
        let (dir_b, group_b) = directory_with_domain_users();
        let err = dir_a.add_group_to_group(group_b, group_a).unwrap_err();
        assert_eq!(err, ModelError::ForeignDirectory);
        let err = dir_a
            .create_user(dir_b.default_container(), "alice", group_a)
            .unwrap_err();
        assert_eq!(err, ModelError::ForeignDirectory);
    }

    #[test]
    fn test_remove_group_blocked_while_referenced() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let alice = dir.create_user(container, "alice", domain_users).unwrap();

        let err = dir.remove_group(domain_users).unwrap_err();
        assert!(matches!(err, ModelError::GroupInUse { .. }));
        let err = dir.destroy_group(domain_users).unwrap_err();
        assert!(matches!(err, ModelError::GroupInUse { .. }));
        // The graph is unchanged.
        assert_eq!(
            dir.group(domain_users).unwrap().state(),
            EntityState::Active
        );

        // Once the referencing user is gone, removal succeeds.
        dir.destroy_user(alice).unwrap();
        dir.remove_group(domain_users).unwrap();
        assert_eq!(
            dir.group(domain_users).unwrap().state(),
            EntityState::PendingRemoval
        );
    }

    #[test]
    fn test_remove_posix_group_blocked_by_main_group_reference() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_posix_group(
                container,
                "staff",
                GroupScope::Global,
                GroupCategory::Security,
                2000,
            )
            .unwrap();
        dir.create_posix_user(container, "alice", domain_users, 1500, staff)
            .unwrap();

        let err = dir.remove_group(staff).unwrap_err();
        assert!(
            matches!(err, ModelError::GroupInUse { role, .. } if role == "UNIX main group")
        );
    }

    #[test]
    fn test_remove_group_cascades_and_stages() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_group(container, "staff", GroupScope::Global, GroupCategory::Security)
            .unwrap();
        let admins = dir
            .create_group(container, "admins", GroupScope::Global, GroupCategory::Security)
            .unwrap();
        let alice = dir.create_user(container, "alice", domain_users).unwrap();
        dir.add_user_to_group(alice, staff).unwrap();
        dir.add_group_to_group(staff, admins).unwrap();

        dir.remove_group(staff).unwrap();

        // Stripped from the parent group with a staged edge.
        assert!(!dir.group(admins).unwrap().groups().any(|g| g == staff));
        assert!(dir.group(admins).unwrap().removed_groups().any(|g| g == staff));
        // Stripped from the user with a staged edge.
        assert!(!dir.user(alice).unwrap().groups().any(|g| g == staff));
        assert!(dir.user(alice).unwrap().removed_groups().any(|g| g == staff));
    }

    #[test]
    fn test_remove_user_cascades_and_stages() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_group(container, "staff", GroupScope::Global, GroupCategory::Security)
            .unwrap();
        let alice = dir.create_user(container, "alice", domain_users).unwrap();
        dir.add_user_to_group(alice, staff).unwrap();

        dir.remove_user(alice).unwrap();

        assert_eq!(dir.user(alice).unwrap().state(), EntityState::PendingRemoval);
        assert!(!dir.group(staff).unwrap().users().any(|u| u == alice));
        assert!(dir.group(staff).unwrap().removed_users().any(|u| u == alice));
        // Removed users keep blocking their username until destroyed.
        let err = dir.create_user(container, "Alice", domain_users).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateName { .. }));
    }

    #[test]
    fn test_destroy_frees_identifiers() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_posix_group(
                container,
                "staff",
                GroupScope::Global,
                GroupCategory::Security,
                2000,
            )
            .unwrap();
        let alice = dir
            .create_posix_user(container, "alice", domain_users, 1500, staff)
            .unwrap();

        dir.destroy_user(alice).unwrap();
        assert!(!dir.uids().any(|uid| uid == 1500));
        // The username is free again.
        dir.create_user(container, "alice", domain_users).unwrap();

        // staff is still referenced by nobody now; destroy frees the GID.
        dir.destroy_group(staff).unwrap();
        assert!(!dir.gids().any(|gid| gid == 2000));
    }

    #[test]
    fn test_membership_round_trip_clears_staging() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_group(container, "staff", GroupScope::Global, GroupCategory::Security)
            .unwrap();
        let alice = dir.create_user(container, "alice", domain_users).unwrap();

        dir.add_user_to_group(alice, staff).unwrap();
        dir.remove_user_from_group(alice, staff).unwrap();
        assert!(dir.group(staff).unwrap().removed_users().any(|u| u == alice));

        // Re-adding the membership cancels the staged removal.
        dir.add_user_to_group(alice, staff).unwrap();
        assert!(!dir.group(staff).unwrap().removed_users().any(|u| u == alice));
        assert!(dir.group(staff).unwrap().users().any(|u| u == alice));
    }

    #[test]
    fn test_lookups() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let staff = dir
            .create_posix_group(
                container,
                "staff",
                GroupScope::Global,
                GroupCategory::Security,
                2000,
            )
            .unwrap();
        let alice = dir
            .create_posix_user(container, "alice", domain_users, 1500, staff)
            .unwrap();

        assert_eq!(dir.find_user_by_username("ALICE", false), Some(alice));
        assert_eq!(dir.find_user_by_uid(1500, false), Some(alice));
        assert_eq!(dir.find_group_by_gid(2000, false), Some(staff));
        assert_eq!(dir.find_group_by_name("STAFF", false), Some(staff));
        assert_eq!(
            dir.find_user_by_dn("CN=alice,CN=Users,DC=example,DC=com", false),
            Some(alice)
        );
        assert_eq!(
            dir.find_group(false, |g| g.gid() == Some(2000)),
            Some(staff)
        );

        // Removed entities only surface with the include_removed flag.
        dir.remove_user(alice).unwrap();
        assert_eq!(dir.find_user_by_username("alice", false), None);
        assert_eq!(dir.find_user_by_username("alice", true), Some(alice));
    }

    #[test]
    fn test_remove_container_cascades() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let people = dir.create_container("ou=People").unwrap();
        let bob = dir.create_user(people, "bob", domain_users).unwrap();

        dir.remove_container(people).unwrap();
        assert_eq!(
            dir.container(people).unwrap().state(),
            EntityState::PendingRemoval
        );
        assert_eq!(dir.user(bob).unwrap().state(), EntityState::PendingRemoval);
    }

    #[test]
    fn test_remove_container_blocked_by_outside_reference() {
        let (mut dir, _) = directory_with_domain_users();
        let people = dir.create_container("ou=People").unwrap();
        let team = dir
            .create_group(people, "team", GroupScope::Global, GroupCategory::Security)
            .unwrap();
        let outsider = dir
            .create_user(dir.default_container(), "carol", team)
            .unwrap();

        let err = dir.remove_container(people).unwrap_err();
        assert!(matches!(err, ModelError::GroupInUse { .. }));
        // Nothing was staged.
        assert_eq!(dir.container(people).unwrap().state(), EntityState::Active);
        assert_eq!(dir.group(team).unwrap().state(), EntityState::Active);
        assert_eq!(dir.user(outsider).unwrap().state(), EntityState::Active);
    }

    #[test]
    fn test_user_dn_escapes_common_name() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let key = dir.create_user(container, "jdoe", domain_users).unwrap();
        dir.user_mut(key)
            .unwrap()
            .set_common_name("Doe, John");
        assert_eq!(
            dir.user_dn(key).unwrap(),
            "cn=Doe\\, John,cn=Users,dc=example,dc=com"
        );
    }

    #[test]
    fn test_scalar_edit_marks_modified() {
        let (mut dir, domain_users) = directory_with_domain_users();
        let container = dir.default_container();
        let key = dir.create_user(container, "alice", domain_users).unwrap();
        dir.mark_user_loaded(key);
        assert!(!dir.user(key).unwrap().modified());

        dir.user_mut(key).unwrap().set_disabled(true);
        assert!(dir.user(key).unwrap().modified());
    }
}
