//! Identity graph error types.
//!
//! Every variant is an invariant violation raised synchronously at the
//! point of attempted mutation, before any edge has changed. They are all
//! recoverable: the graph is exactly as it was before the call.

use thiserror::Error;

/// Invariant violation raised by the identity graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// A container with this name already exists (case-insensitive).
    #[error("duplicate container name: {name}")]
    DuplicateContainer { name: String },

    /// An account (user or group) with this name already exists.
    ///
    /// Usernames and group names share one flat, case-insensitive namespace,
    /// as the directory's account-name attribute does.
    #[error("duplicate account name: {name}")]
    DuplicateName { name: String },

    /// The RID is already in use by another user or group.
    #[error("duplicate RID: {rid}")]
    DuplicateRid { rid: u32 },

    /// The UID is already in use by another POSIX user.
    #[error("duplicate UID: {uid}")]
    DuplicateUid { uid: u32 },

    /// The GID is already in use by another POSIX group.
    #[error("duplicate GID: {gid}")]
    DuplicateGid { gid: u32 },

    /// The container name does not parse as a directory path.
    #[error("invalid container name {name:?}: {reason}")]
    InvalidContainerName { name: String, reason: String },

    /// A primary group must be a security group of global or universal scope.
    #[error("group {name} cannot be a primary group: {reason}")]
    InvalidPrimaryGroup { name: String, reason: String },

    /// A UNIX main group must carry the POSIX extension.
    #[error("group {name} has no POSIX attributes")]
    NotPosixGroup { name: String },

    /// The user does not carry the POSIX extension.
    #[error("user {name} has no POSIX attributes")]
    NotPosixUser { name: String },

    /// The entity already carries the POSIX extension.
    #[error("{name} already carries POSIX attributes")]
    AlreadyPosix { name: String },

    /// The key was minted by a different directory instance.
    #[error("key belongs to a different directory")]
    ForeignDirectory,

    /// A group cannot be a member of itself.
    #[error("group {name} cannot be a member of itself")]
    SelfMembership { name: String },

    /// Explicit membership in a primary group is forbidden; the membership
    /// is implicit.
    #[error("{member} is an implicit member of {group}")]
    ImplicitMembership { member: String, group: String },

    /// The group is still referenced as a primary or UNIX main group.
    #[error("group {name} is still the {role} of {referenced_by}")]
    GroupInUse {
        name: String,
        role: &'static str,
        referenced_by: String,
    },

    /// The default users container cannot be removed or destroyed.
    #[error("the default users container cannot be removed")]
    DefaultContainer,

    /// The entity has been removed or destroyed and cannot be mutated.
    #[error("{name} is no longer active")]
    NotActive { name: String },

    /// A staged password must not be empty.
    #[error("password cannot be empty")]
    EmptyPassword,

    /// A home drive requires a home directory.
    #[error("home drive requires a home directory")]
    HomeDriveWithoutDirectory,

    /// Profile path and home directory are mutually exclusive.
    #[error("profile path and home directory are mutually exclusive")]
    ProfileHomeConflict,
}

/// Result type for identity graph operations.
pub type ModelResult<T> = Result<T, ModelError>;
