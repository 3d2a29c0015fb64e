//! Users and their POSIX extension.

use std::collections::BTreeSet;

use crate::model::error::{ModelError, ModelResult};
use crate::model::keys::{ContainerKey, GroupKey};
use crate::model::types::{EntityState, ShadowAttrs};

/// POSIX attributes of a user.
///
/// Carried by users that participate in the UNIX subsystem. The GID is not
/// stored here: it mirrors the UNIX main group and is derived through the
/// directory.
#[derive(Debug, Clone)]
pub struct PosixUser {
    pub(crate) uid: u32,
    pub(crate) main_group: GroupKey,
    pub(crate) shell: Option<String>,
    pub(crate) home: Option<String>,
    pub(crate) nis_domain: Option<String>,
    pub(crate) gecos: Option<String>,
    pub(crate) unix_password: Option<String>,
    pub(crate) shadow: ShadowAttrs,
}

impl PosixUser {
    pub(crate) fn new(uid: u32, main_group: GroupKey) -> Self {
        PosixUser {
            uid,
            main_group,
            shell: None,
            home: None,
            nis_domain: None,
            gecos: None,
            unix_password: None,
            shadow: ShadowAttrs::default(),
        }
    }

    /// POSIX user identifier.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Key of the UNIX main group.
    pub fn main_group(&self) -> GroupKey {
        self.main_group
    }

    /// Login shell.
    pub fn shell(&self) -> Option<&str> {
        self.shell.as_deref()
    }

    /// UNIX home directory.
    pub fn home(&self) -> Option<&str> {
        self.home.as_deref()
    }

    /// NIS domain.
    pub fn nis_domain(&self) -> Option<&str> {
        self.nis_domain.as_deref()
    }

    /// GECOS field.
    pub fn gecos(&self) -> Option<&str> {
        self.gecos.as_deref()
    }

    /// UNIX password hash.
    pub fn unix_password(&self) -> Option<&str> {
        self.unix_password.as_deref()
    }

    /// Shadow aging fields.
    pub fn shadow(&self) -> ShadowAttrs {
        self.shadow
    }
}

/// A directory user.
///
/// Graph-affecting mutations (primary group, memberships, removal) live on
/// [`Directory`](crate::model::Directory); the setters here touch only the
/// user's own scalar attributes and flip the modified flag.
#[derive(Debug, Clone)]
pub struct User {
    pub(crate) username: String,
    pub(crate) container: ContainerKey,
    pub(crate) rid: Option<u32>,
    pub(crate) disabled: bool,
    pub(crate) common_name: String,
    pub(crate) given_name: Option<String>,
    pub(crate) middle_name: Option<String>,
    pub(crate) surname: Option<String>,
    pub(crate) initials: Option<String>,
    pub(crate) script_path: Option<String>,
    pub(crate) profile_path: Option<String>,
    pub(crate) home_directory: Option<String>,
    pub(crate) home_drive: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) must_change_password: bool,
    pub(crate) primary_group: GroupKey,
    pub(crate) groups: BTreeSet<GroupKey>,
    pub(crate) removed_groups: BTreeSet<GroupKey>,
    pub(crate) posix: Option<PosixUser>,
    pub(crate) loaded: bool,
    pub(crate) modified: bool,
    pub(crate) state: EntityState,
}

impl User {
    pub(crate) fn new(username: String, container: ContainerKey, primary_group: GroupKey) -> Self {
        User {
            common_name: username.clone(),
            username,
            container,
            rid: None,
            disabled: false,
            given_name: None,
            middle_name: None,
            surname: None,
            initials: None,
            script_path: None,
            profile_path: None,
            home_directory: None,
            home_drive: None,
            password: None,
            must_change_password: false,
            primary_group,
            groups: BTreeSet::new(),
            removed_groups: BTreeSet::new(),
            posix: None,
            loaded: false,
            modified: true,
            state: EntityState::Active,
        }
    }

    /// The account name, unique case-insensitively across the directory.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Key of the owning container.
    pub fn container(&self) -> ContainerKey {
        self.container
    }

    /// Relative identifier, assigned by the remote directory.
    pub fn rid(&self) -> Option<u32> {
        self.rid
    }

    /// Whether the account is disabled.
    pub fn disabled(&self) -> bool {
        self.disabled
    }

    /// The common name, used as the entry's RDN.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn given_name(&self) -> Option<&str> {
        self.given_name.as_deref()
    }

    pub fn middle_name(&self) -> Option<&str> {
        self.middle_name.as_deref()
    }

    pub fn surname(&self) -> Option<&str> {
        self.surname.as_deref()
    }

    pub fn initials(&self) -> Option<&str> {
        self.initials.as_deref()
    }

    pub fn script_path(&self) -> Option<&str> {
        self.script_path.as_deref()
    }

    pub fn profile_path(&self) -> Option<&str> {
        self.profile_path.as_deref()
    }

    pub fn home_directory(&self) -> Option<&str> {
        self.home_directory.as_deref()
    }

    pub fn home_drive(&self) -> Option<&str> {
        self.home_drive.as_deref()
    }

    /// Whether a password is staged for the next sync.
    pub fn has_staged_password(&self) -> bool {
        self.password.is_some()
    }

    /// Whether the user must change the password at next logon.
    pub fn must_change_password(&self) -> bool {
        self.must_change_password
    }

    /// Key of the primary group.
    pub fn primary_group(&self) -> GroupKey {
        self.primary_group
    }

    /// Keys of the groups this user is an explicit member of.
    pub fn groups(&self) -> impl Iterator<Item = GroupKey> + '_ {
        self.groups.iter().copied()
    }

    /// Memberships staged for remote removal.
    pub fn removed_groups(&self) -> impl Iterator<Item = GroupKey> + '_ {
        self.removed_groups.iter().copied()
    }

    /// POSIX extension, when present.
    pub fn posix(&self) -> Option<&PosixUser> {
        self.posix.as_ref()
    }

    /// Whether the user carries the POSIX extension.
    pub fn is_posix(&self) -> bool {
        self.posix.is_some()
    }

    /// Whether the user was hydrated from the remote directory.
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

    // Scalar setters. Each marks the user modified.

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
        self.modified = true;
    }

    pub fn set_common_name(&mut self, common_name: impl Into<String>) {
        self.common_name = common_name.into();
        self.modified = true;
    }

    pub fn set_given_name(&mut self, value: Option<String>) {
        self.given_name = value;
        self.modified = true;
    }

    pub fn set_middle_name(&mut self, value: Option<String>) {
        self.middle_name = value;
        self.modified = true;
    }

    pub fn set_surname(&mut self, value: Option<String>) {
        self.surname = value;
        self.modified = true;
    }

    pub fn set_initials(&mut self, value: Option<String>) {
        self.initials = value;
        self.modified = true;
    }

    pub fn set_script_path(&mut self, value: Option<String>) {
        self.script_path = value;
        self.modified = true;
    }

    /// Set the roaming profile path. Mutually exclusive with a home
    /// directory.
    pub fn set_profile_path(&mut self, value: Option<String>) -> ModelResult<()> {
        if value.is_some() && self.home_directory.is_some() {
            return Err(ModelError::ProfileHomeConflict);
        }
        self.profile_path = value;
        self.modified = true;
        Ok(())
    }

    /// Set the home directory. Mutually exclusive with a profile path;
    /// clearing it also clears the drive letter.
    pub fn set_home_directory(&mut self, value: Option<String>) -> ModelResult<()> {
        if value.is_some() && self.profile_path.is_some() {
            return Err(ModelError::ProfileHomeConflict);
        }
        if value.is_none() {
            self.home_drive = None;
        }
        self.home_directory = value;
        self.modified = true;
        Ok(())
    }

    /// Set the home drive letter; requires a home directory.
    pub fn set_home_drive(&mut self, value: Option<String>) -> ModelResult<()> {
        if value.is_some() && self.home_directory.is_none() {
            return Err(ModelError::HomeDriveWithoutDirectory);
        }
        self.home_drive = value;
        self.modified = true;
        Ok(())
    }

    /// Stage a password to be applied on the next sync. The staged value is
    /// write-only: it is consumed and cleared when applied.
    pub fn set_password(&mut self, password: impl Into<String>) -> ModelResult<()> {
        let password = password.into();
        if password.is_empty() {
            return Err(ModelError::EmptyPassword);
        }
        self.password = Some(password);
        self.modified = true;
        Ok(())
    }

    pub fn set_must_change_password(&mut self, value: bool) {
        self.must_change_password = value;
        self.modified = true;
    }

    pub fn set_shell(&mut self, value: Option<String>) -> ModelResult<()> {
        self.posix_fields()?.shell = value;
        self.modified = true;
        Ok(())
    }

    pub fn set_unix_home(&mut self, value: Option<String>) -> ModelResult<()> {
        self.posix_fields()?.home = value;
        self.modified = true;
        Ok(())
    }

    pub fn set_nis_domain(&mut self, value: Option<String>) -> ModelResult<()> {
        self.posix_fields()?.nis_domain = value;
        self.modified = true;
        Ok(())
    }

    pub fn set_gecos(&mut self, value: Option<String>) -> ModelResult<()> {
        self.posix_fields()?.gecos = value;
        self.modified = true;
        Ok(())
    }

    pub fn set_unix_password(&mut self, value: Option<String>) -> ModelResult<()> {
        self.posix_fields()?.unix_password = value;
        self.modified = true;
        Ok(())
    }

    pub fn set_shadow(&mut self, shadow: ShadowAttrs) -> ModelResult<()> {
        self.posix_fields()?.shadow = shadow;
        self.modified = true;
        Ok(())
    }

    fn posix_fields(&mut self) -> ModelResult<&mut PosixUser> {
        let name = self.username.clone();
        self.posix
            .as_mut()
            .ok_or(ModelError::NotPosixUser { name })
    }

    /// Hydrate profile fields from remote data without the local
    /// exclusivity checks; the remote directory is authoritative.
    pub(crate) fn hydrate_profile(
        &mut self,
        script_path: Option<String>,
        profile_path: Option<String>,
        home_directory: Option<String>,
        home_drive: Option<String>,
    ) {
        self.script_path = script_path;
        self.profile_path = profile_path;
        self.home_directory = home_directory;
        self.home_drive = home_drive;
    }

    pub(crate) fn take_password(&mut self) -> Option<String> {
        self.password.take()
    }
}
