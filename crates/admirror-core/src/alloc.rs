//! Free identifier allocation.
//!
//! UIDs and GIDs are allocated locally over sparse integer ranges; the
//! remote directory is consulted so a new identifier never collides with a
//! value the graph has not learned about yet. RIDs are never allocated
//! here: the remote side assigns them and they are read back from the
//! binary SID.

use tracing::debug;

use admirror_client::{DirectoryClient, Filter, Scope};

use crate::error::EngineResult;
use crate::model::Directory;
use crate::schema::{ATTR_GID_NUMBER, ATTR_UID_NUMBER};

/// Next free UID for the directory scope.
///
/// The union of UIDs present remotely under the root and UIDs claimed
/// locally is scanned for the first gap after the lowest contiguous run;
/// with no values at all the configured floor is returned.
pub async fn next_uid<C>(dir: &Directory, client: &C) -> EngineResult<u32>
where
    C: DirectoryClient + ?Sized,
{
    let mut values = scan_remote(dir, client, ATTR_UID_NUMBER).await?;
    values.extend(dir.uids());
    let next = next_free(values, dir.settings().min_uid);
    debug!(uid = next, "Allocated next free UID");
    Ok(next)
}

/// Next free GID for the directory scope.
pub async fn next_gid<C>(dir: &Directory, client: &C) -> EngineResult<u32>
where
    C: DirectoryClient + ?Sized,
{
    let mut values = scan_remote(dir, client, ATTR_GID_NUMBER).await?;
    values.extend(dir.gids());
    let next = next_free(values, dir.settings().min_gid);
    debug!(gid = next, "Allocated next free GID");
    Ok(next)
}

async fn scan_remote<C>(dir: &Directory, client: &C, attr: &str) -> EngineResult<Vec<u32>>
where
    C: DirectoryClient + ?Sized,
{
    let entries = client
        .search(
            dir.root_dn(),
            Scope::Subtree,
            &Filter::present(attr),
            &[attr],
        )
        .await?;
    Ok(entries.iter().filter_map(|e| e.attr_u32(attr)).collect())
}

/// One past the end of the contiguous run starting at the smallest value,
/// or the floor when no values exist.
fn next_free(mut values: Vec<u32>, floor: u32) -> u32 {
    values.sort_unstable();
    values.dedup();

    let Some(&first) = values.first() else {
        return floor;
    };
    let mut candidate = first;
    for &value in &values[1..] {
        if value != candidate + 1 {
            break;
        }
        candidate = value;
    }
    candidate + 1
}
