//! # admirror-core
//!
//! An in-memory mirror of a directory-service identity graph (users and
//! groups with POSIX extensions, organized in flat containers) and the
//! engine that reconciles it with the live directory.
//!
//! The flow: build or edit a [`model::Directory`], run [`load`] to
//! reconcile it with existing remote state, edit further, then run
//! [`sync`] to apply the ordered changeset. Loaded objects are clean;
//! locally authored ones carry dirty flags until synchronized.
//!
//! ```ignore
//! use admirror_client::{DirectoryConfig, LdapClient};
//! use admirror_core::model::{Directory, DirectorySettings, GroupCategory, GroupScope};
//!
//! let client = LdapClient::new(
//!     DirectoryConfig::new("dc01.example.com", "cn=Administrator,cn=Users,dc=example,dc=com")
//!         .with_password("secret")
//!         .with_ssl(),
//! )?;
//! let mut dir = Directory::new(DirectorySettings::new("dc=example,dc=com"))?;
//! admirror_core::load(&mut dir, &client).await?;
//!
//! let people = dir.create_container("ou=People")?;
//! let staff = dir.create_posix_group(
//!     people, "staff", GroupScope::Global, GroupCategory::Security, 2000,
//! )?;
//! let uid = admirror_core::alloc::next_uid(&dir, &client).await?;
//! let domain_users = dir.find_group_by_name("Domain Users", false).unwrap();
//! dir.create_posix_user(people, "alice", domain_users, uid, staff)?;
//!
//! let stats = admirror_core::sync(&mut dir, &client).await?;
//! assert!(stats.is_clean());
//! ```
//!
//! The engine is single-threaded and strictly sequential: directory calls
//! never overlap and no sync phase begins before the previous one drains.
//! Remote per-object failures are logged and counted, never raised;
//! re-running `sync` (or `load` then `sync`) resumes idempotently.

pub mod alloc;
pub mod error;
pub mod load;
pub mod model;
pub mod schema;
pub mod sync;

pub use error::{EngineError, EngineResult};
pub use load::load;
pub use sync::{sync, SyncStats};
