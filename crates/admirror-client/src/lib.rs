//! # Directory Client
//!
//! The protocol boundary between the admirror identity graph and a remote
//! directory server. The engine in `admirror-core` only ever talks to the
//! [`DirectoryClient`] trait defined here; the wire protocol itself is
//! delegated to an implementation.
//!
//! Two implementations ship with this crate:
//!
//! - [`LdapClient`] — production adapter over the `ldap3` library, with
//!   SSL/STARTTLS support and a lazily cached connection.
//! - [`MemoryClient`] — a deterministic in-memory directory tree used by
//!   tests and local experimentation.
//!
//! ## Example
//!
//! ```ignore
//! use admirror_client::{DirectoryConfig, LdapClient, DirectoryClient, Filter, Scope};
//!
//! let config = DirectoryConfig::new("dc01.example.com", "cn=Administrator,cn=Users,dc=example,dc=com")
//!     .with_password("secret")
//!     .with_ssl();
//! let client = LdapClient::new(config)?;
//! let entries = client
//!     .search("dc=example,dc=com", Scope::Subtree, &Filter::eq("objectClass", "group"), &["cn"])
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod ldap;
pub mod memory;

pub use client::DirectoryClient;
pub use config::DirectoryConfig;
pub use entry::{AttrValue, Entry, Modification};
pub use error::{ClientError, ClientResult};
pub use filter::{Filter, Scope};
pub use ldap::LdapClient;
pub use memory::MemoryClient;

/// LDAP result code: operation succeeded.
pub const RC_SUCCESS: u32 = 0;
/// LDAP result code: no such object.
pub const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code: invalid credentials.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code: entry already exists.
pub const RC_ALREADY_EXISTS: u32 = 68;
