//! The directory client trait.

use async_trait::async_trait;

use crate::entry::{AttrValue, Entry, Modification};
use crate::error::ClientResult;
use crate::filter::{Filter, Scope};

/// The four primitives the reconciliation engine needs from a directory.
///
/// Implementations are expected to surface non-zero remote result codes as
/// [`ClientError`](crate::ClientError) values carrying the code; the engine
/// treats those as per-object warnings, not batch failures.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Search under `base` with the given scope and filter, returning the
    /// named attributes (or all user attributes for `["*"]`).
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> ClientResult<Vec<Entry>>;

    /// Add an entry with the given attributes.
    async fn add(&self, dn: &str, attrs: Vec<(String, Vec<AttrValue>)>) -> ClientResult<()>;

    /// Apply an ordered list of modifications to an entry.
    async fn modify(&self, dn: &str, mods: Vec<Modification>) -> ClientResult<()>;

    /// Delete an entry by DN.
    async fn delete(&self, dn: &str) -> ClientResult<()>;
}
