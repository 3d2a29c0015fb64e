//! The reconciler.
//!
//! [`sync`] applies the identity graph to the remote directory as a strict
//! seven-phase ordered batch. Each phase fully drains before the next
//! begins; the ordering exists to satisfy the remote side's referential
//! constraints (a group cannot be deleted while it is someone's primary
//! group, a user cannot be given a primary group that does not exist yet).
//!
//! 1. delete staged-removed users
//! 2. delete staged-removed groups (after a whole-directory reference scan)
//! 3. delete staged-removed containers
//! 4. create missing containers, materializing intermediate path segments
//! 5. create new groups, reading back their RIDs
//! 6. create new users (account control, password, primary group dance)
//! 7. attribute and membership convergence for modified groups, then users
//!
//! Per-object remote failures are logged as warnings and the batch
//! continues; only connection-level client failures abort the run.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, error, instrument, warn};

use admirror_client::{
    AttrValue, ClientResult, DirectoryClient, Entry, Filter, Modification, Scope,
};

use crate::error::EngineResult;
use crate::model::{
    ContainerKey, Directory, EntityState, GroupKey, PathSegment, ShadowAttrs, UserKey,
};
use crate::schema::{
    account_control, encode_password, group_type_mask, random_password, rid_from_sid,
    ATTR_ACCOUNT_CONTROL, ATTR_ACCOUNT_NAME, ATTR_CN, ATTR_DISPLAY_NAME, ATTR_GECOS,
    ATTR_GID_NUMBER, ATTR_GIVEN_NAME, ATTR_GROUP_TYPE, ATTR_GROUP_UNIX_PASSWORD,
    ATTR_HOME_DIRECTORY, ATTR_HOME_DRIVE, ATTR_INITIALS, ATTR_LOGIN_SHELL, ATTR_MEMBER,
    ATTR_MEMBER_UID, ATTR_MIDDLE_NAME, ATTR_NIS_DOMAIN, ATTR_OBJECT_CLASS, ATTR_OBJECT_SID,
    ATTR_POSIX_MEMBER, ATTR_PRIMARY_GROUP_ID, ATTR_PROFILE_PATH, ATTR_PWD_LAST_SET,
    ATTR_SCRIPT_PATH, ATTR_SHADOW_EXPIRE, ATTR_SHADOW_FLAG, ATTR_SHADOW_INACTIVE,
    ATTR_SHADOW_LAST_CHANGE, ATTR_SHADOW_MAX, ATTR_SHADOW_MIN, ATTR_SHADOW_WARNING, ATTR_SURNAME,
    ATTR_UID_NUMBER, ATTR_UNICODE_PWD, ATTR_UNIX_HOME, ATTR_UNIX_USER_PASSWORD, DOMAIN_USERS_RID,
    UAC_ACCOUNT_DISABLE, UAC_NORMAL_ACCOUNT,
};

/// Length of generated initial passwords.
const GENERATED_PASSWORD_LEN: usize = 16;

/// LDAP result code: attribute or value exists (tolerated on member adds).
const RC_ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
/// LDAP result code: no such attribute (tolerated on member deletes).
const RC_NO_SUCH_ATTRIBUTE: u32 = 16;

/// Counters describing what a [`sync`] run did.
///
/// `skipped` counts objects left unconverged by per-object remote failures;
/// a non-zero value means the run was partial and should be retried.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SyncStats {
    pub users_created: u32,
    pub users_updated: u32,
    pub users_deleted: u32,
    pub groups_created: u32,
    pub groups_updated: u32,
    pub groups_deleted: u32,
    pub containers_created: u32,
    pub containers_deleted: u32,
    pub skipped: u32,
}

impl SyncStats {
    /// Whether every object converged.
    pub fn is_clean(&self) -> bool {
        self.skipped == 0
    }
}

/// Outcome of a single remote operation.
enum Outcome {
    /// The operation succeeded.
    Done,
    /// The target entry does not exist.
    Missing,
    /// The operation failed with a result code; already logged.
    Failed,
}

/// Classify an operation result: result-code failures become warnings,
/// connection-level failures abort the batch.
fn outcome(result: ClientResult<()>, dn: &str, action: &str) -> EngineResult<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::Done),
        Err(e) => match e.result_code() {
            Some(admirror_client::RC_NO_SUCH_OBJECT) => Ok(Outcome::Missing),
            Some(code) => {
                warn!(dn = %dn, code, error = %e, "Remote {action} failed; continuing");
                Ok(Outcome::Failed)
            }
            None => Err(e.into()),
        },
    }
}

/// Apply the identity graph to the remote directory.
#[instrument(skip(dir, client), fields(root = %dir.root_dn()))]
pub async fn sync<C>(dir: &mut Directory, client: &C) -> EngineResult<SyncStats>
where
    C: DirectoryClient + ?Sized,
{
    let mut stats = SyncStats::default();
    let mut blocked_containers: BTreeSet<ContainerKey> = BTreeSet::new();

    delete_users(dir, client, &mut stats).await?;
    delete_groups(dir, client, &mut stats, &mut blocked_containers).await?;
    delete_containers(dir, client, &mut stats, &blocked_containers).await?;
    create_containers(dir, client, &mut stats).await?;
    create_groups(dir, client, &mut stats).await?;
    create_users(dir, client, &mut stats).await?;
    update_groups(dir, client, &mut stats).await?;
    update_users(dir, client, &mut stats).await?;

    debug!(?stats, "Sync complete");
    Ok(stats)
}

// ----------------------------------------------------------------------
// Phase 1: staged-removed users

async fn delete_users<C>(dir: &mut Directory, client: &C, stats: &mut SyncStats) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Phase 1: deleting removed users");
    let doomed: Vec<UserKey> = dir
        .users()
        .filter(|(_, u)| u.state() == EntityState::PendingRemoval)
        .map(|(key, _)| key)
        .collect();

    for key in doomed {
        let dn = dir.user_dn(key)?;
        match outcome(client.delete(&dn).await, &dn, "user delete")? {
            Outcome::Done => {
                debug!(dn = %dn, "User deleted");
                dir.forget_user(key);
                stats.users_deleted += 1;
            }
            Outcome::Missing => {
                // Already gone remotely; the local tombstone converges.
                dir.forget_user(key);
            }
            Outcome::Failed => stats.skipped += 1,
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Phase 2: staged-removed groups

async fn delete_groups<C>(
    dir: &mut Directory,
    client: &C,
    stats: &mut SyncStats,
    blocked: &mut BTreeSet<ContainerKey>,
) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Phase 2: deleting removed groups");
    let doomed: Vec<GroupKey> = dir
        .groups()
        .filter(|(_, g)| g.state() == EntityState::PendingRemoval)
        .map(|(key, _)| key)
        .collect();

    for key in doomed {
        let group = dir.group(key)?;
        let container = group.container();
        let dn = dir.group_dn(key)?;

        // The whole remote directory is re-scanned, not just the local
        // graph: an entry this graph never learned about may still declare
        // the group as its primary or UNIX main group.
        let mut branches = Vec::new();
        if let Some(rid) = dir.group(key)?.rid() {
            branches.push(Filter::eq(ATTR_PRIMARY_GROUP_ID, rid.to_string()));
        }
        if let Some(gid) = dir.group(key)?.gid() {
            branches.push(Filter::and(vec![
                Filter::eq(ATTR_OBJECT_CLASS, "user"),
                Filter::eq(ATTR_GID_NUMBER, gid.to_string()),
            ]));
        }
        if !branches.is_empty() {
            let holdouts = client
                .search(dir.root_dn(), Scope::Subtree, &Filter::Or(branches), &[ATTR_CN])
                .await?;
            if !holdouts.is_empty() {
                warn!(
                    dn = %dn,
                    holdouts = holdouts.len(),
                    "Group still referenced remotely; not deleted and its container cannot be fully removed"
                );
                blocked.insert(container);
                stats.skipped += 1;
                continue;
            }
        }

        match outcome(client.delete(&dn).await, &dn, "group delete")? {
            Outcome::Done => {
                debug!(dn = %dn, "Group deleted");
                dir.forget_group(key);
                stats.groups_deleted += 1;
            }
            Outcome::Missing => {
                dir.forget_group(key);
            }
            Outcome::Failed => stats.skipped += 1,
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Phase 3: staged-removed containers

async fn delete_containers<C>(
    dir: &mut Directory,
    client: &C,
    stats: &mut SyncStats,
    blocked: &BTreeSet<ContainerKey>,
) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Phase 3: deleting removed containers");
    let doomed: Vec<ContainerKey> = dir
        .containers()
        .filter(|(_, c)| c.state() == EntityState::PendingRemoval)
        .map(|(key, _)| key)
        .collect();

    for key in doomed {
        let dn = dir.container_dn(key)?;
        if blocked.contains(&key) {
            warn!(dn = %dn, "Container not removed: a group in it is still referenced remotely");
            stats.skipped += 1;
            continue;
        }
        // Leftover members mean earlier phases could not delete everything.
        let container = dir.container(key)?;
        if container.users().next().is_some() || container.groups().next().is_some() {
            warn!(dn = %dn, "Container not removed: it still holds undeleted entries");
            stats.skipped += 1;
            continue;
        }
        // A container nesting another known container by path must outlive it.
        let suffix = format!(",{}", dn.to_ascii_lowercase());
        let nests = dir
            .containers()
            .filter(|&(other, _)| other != key)
            .any(|(other, _)| {
                dir.container_dn(other)
                    .map(|d| d.to_ascii_lowercase().ends_with(&suffix))
                    .unwrap_or(false)
            });
        if nests {
            warn!(dn = %dn, "Container not removed: another known container nests under it");
            stats.skipped += 1;
            continue;
        }

        match outcome(client.delete(&dn).await, &dn, "container delete")? {
            Outcome::Done => {
                debug!(dn = %dn, "Container deleted");
                dir.forget_container(key);
                stats.containers_deleted += 1;
            }
            Outcome::Missing => {
                dir.forget_container(key);
            }
            Outcome::Failed => stats.skipped += 1,
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Phase 4: create containers

async fn create_containers<C>(
    dir: &mut Directory,
    client: &C,
    stats: &mut SyncStats,
) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Phase 4: creating containers");
    let wanted: Vec<ContainerKey> = dir
        .containers()
        .filter(|(_, c)| c.state() == EntityState::Active)
        .map(|(key, _)| key)
        .collect();

    for key in wanted {
        let dn = dir.container_dn(key)?;
        if entry_exists(client, &dn).await? {
            continue;
        }

        let segments: Vec<(PathSegment, String)> = match dir.container(key)?.segments() {
            Ok(segments) => segments
                .into_iter()
                .map(|(kind, value)| (kind, value.to_string()))
                .collect(),
            Err(e) => {
                error!(dn = %dn, error = %e, "Unrecognized container path; not created");
                stats.skipped += 1;
                continue;
            }
        };

        // Materialize missing path segments root-to-leaf.
        let mut parent = dir.root_dn().to_string();
        let mut failed = false;
        for (kind, value) in segments.into_iter().rev() {
            let (prefix, object_class, naming_attr) = match kind {
                PathSegment::OrganizationalUnit => ("ou", "organizationalUnit", "ou"),
                PathSegment::Container => ("cn", "container", "cn"),
            };
            let node_dn = format!("{prefix}={value},{parent}");
            if !entry_exists(client, &node_dn).await? {
                let attrs = vec![
                    (
                        ATTR_OBJECT_CLASS.to_string(),
                        vec![AttrValue::from("top"), AttrValue::from(object_class)],
                    ),
                    (naming_attr.to_string(), vec![AttrValue::from(value.as_str())]),
                ];
                match outcome(client.add(&node_dn, attrs).await, &node_dn, "container add")? {
                    Outcome::Done => {
                        debug!(dn = %node_dn, "Container node created");
                        stats.containers_created += 1;
                    }
                    Outcome::Missing => {
                        warn!(dn = %node_dn, "Container add failed: parent entry missing");
                        stats.skipped += 1;
                        failed = true;
                        break;
                    }
                    Outcome::Failed => {
                        stats.skipped += 1;
                        failed = true;
                        break;
                    }
                }
            }
            parent = node_dn;
        }
        if failed {
            continue;
        }
    }
    Ok(())
}

async fn entry_exists<C>(client: &C, dn: &str) -> EngineResult<bool>
where
    C: DirectoryClient + ?Sized,
{
    let entries = client
        .search(dn, Scope::Base, &Filter::present(ATTR_OBJECT_CLASS), &[ATTR_OBJECT_CLASS])
        .await?;
    Ok(!entries.is_empty())
}

async fn fetch_entry<C>(client: &C, dn: &str) -> EngineResult<Option<Entry>>
where
    C: DirectoryClient + ?Sized,
{
    let entries = client
        .search(dn, Scope::Base, &Filter::present(ATTR_OBJECT_CLASS), &["*"])
        .await?;
    Ok(entries.into_iter().next())
}

/// Point lookup by account name under the root, guarding creation phases
/// against duplicates the graph does not know about.
async fn find_by_account_name<C>(
    client: &C,
    root: &str,
    object_class: &str,
    name: &str,
) -> EngineResult<Option<Entry>>
where
    C: DirectoryClient + ?Sized,
{
    let filter = Filter::and(vec![
        Filter::eq(ATTR_OBJECT_CLASS, object_class),
        Filter::eq(ATTR_ACCOUNT_NAME, name),
    ]);
    let entries = client
        .search(root, Scope::Subtree, &filter, &[ATTR_OBJECT_SID])
        .await?;
    Ok(entries.into_iter().next())
}

/// Read an entry's SID back and return the RID.
async fn read_back_rid<C>(client: &C, dn: &str) -> EngineResult<Option<u32>>
where
    C: DirectoryClient + ?Sized,
{
    let entries = client
        .search(dn, Scope::Base, &Filter::present(ATTR_OBJECT_CLASS), &[ATTR_OBJECT_SID])
        .await?;
    Ok(entries
        .into_iter()
        .next()
        .and_then(|e| e.bin_attr(ATTR_OBJECT_SID).and_then(rid_from_sid)))
}

// ----------------------------------------------------------------------
// Phase 5: create groups

async fn create_groups<C>(dir: &mut Directory, client: &C, stats: &mut SyncStats) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Phase 5: creating groups");
    let wanted: Vec<GroupKey> = dir
        .groups()
        .filter(|(_, g)| g.state() == EntityState::Active && !g.loaded())
        .map(|(key, _)| key)
        .collect();

    for key in wanted {
        let name = dir.group(key)?.name().to_string();
        let dn = dir.group_dn(key)?;

        if let Some(existing) = find_by_account_name(client, dir.root_dn(), "group", &name).await? {
            debug!(dn = %existing.dn, "Group already exists remotely; adopting");
            capture_rid_from_entry(dir, key, &existing);
            dir.set_group_loaded_flag(key);
            continue;
        }

        let group = dir.group(key)?;
        let mask = group_type_mask(group.scope(), group.category());
        let mut attrs = vec![
            (
                ATTR_OBJECT_CLASS.to_string(),
                vec![AttrValue::from("top"), AttrValue::from("group")],
            ),
            (ATTR_CN.to_string(), vec![AttrValue::from(name.as_str())]),
            (
                ATTR_ACCOUNT_NAME.to_string(),
                vec![AttrValue::from(name.as_str())],
            ),
            (
                ATTR_GROUP_TYPE.to_string(),
                vec![AttrValue::from(mask.to_string())],
            ),
        ];
        if let Some(posix) = group.posix() {
            attrs.push((
                ATTR_GID_NUMBER.to_string(),
                vec![AttrValue::from(posix.gid())],
            ));
            if let Some(nis) = posix.nis_domain() {
                attrs.push((ATTR_NIS_DOMAIN.to_string(), vec![AttrValue::from(nis)]));
            }
            if let Some(pw) = posix.unix_password() {
                attrs.push((
                    ATTR_GROUP_UNIX_PASSWORD.to_string(),
                    vec![AttrValue::from(pw)],
                ));
            }
        }

        match outcome(client.add(&dn, attrs).await, &dn, "group add")? {
            Outcome::Done => {
                match read_back_rid(client, &dn).await? {
                    Some(rid) => {
                        if let Err(e) = dir.assign_group_rid(key, rid) {
                            warn!(dn = %dn, rid, error = %e, "Could not record group RID");
                        }
                    }
                    None => warn!(dn = %dn, "Created group has no decodable SID"),
                }
                dir.set_group_loaded_flag(key);
                stats.groups_created += 1;
                debug!(dn = %dn, "Group created");
            }
            Outcome::Missing => {
                warn!(dn = %dn, "Group add failed: container entry missing");
                stats.skipped += 1;
            }
            Outcome::Failed => stats.skipped += 1,
        }
    }
    Ok(())
}

fn capture_rid_from_entry(dir: &mut Directory, key: GroupKey, entry: &Entry) {
    if let Some(rid) = entry.bin_attr(ATTR_OBJECT_SID).and_then(rid_from_sid) {
        if let Err(e) = dir.assign_group_rid(key, rid) {
            warn!(dn = %entry.dn, rid, error = %e, "Could not record group RID");
        }
    }
}

// ----------------------------------------------------------------------
// Phase 6: create users

async fn create_users<C>(dir: &mut Directory, client: &C, stats: &mut SyncStats) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Phase 6: creating users");
    let wanted: Vec<UserKey> = dir
        .users()
        .filter(|(_, u)| u.state() == EntityState::Active && !u.loaded())
        .map(|(key, _)| key)
        .collect();

    for key in wanted {
        let username = dir.user(key)?.username().to_string();
        let dn = dir.user_dn(key)?;

        if let Some(existing) = find_by_account_name(client, dir.root_dn(), "user", &username).await?
        {
            debug!(dn = %existing.dn, "User already exists remotely; adopting");
            if let Some(rid) = existing.bin_attr(ATTR_OBJECT_SID).and_then(rid_from_sid) {
                if let Err(e) = dir.assign_user_rid(key, rid) {
                    warn!(dn = %existing.dn, rid, error = %e, "Could not record user RID");
                }
            }
            dir.set_user_loaded_flag(key);
            continue;
        }

        // The primary group must exist remotely by now; phase 5 runs first.
        let primary = dir.user(key)?.primary_group();
        let Some(primary_rid) = dir.group(primary)?.rid() else {
            error!(
                dn = %dn,
                group = %dir.group(primary)?.name(),
                "Primary group has no RID; user not created"
            );
            stats.skipped += 1;
            continue;
        };

        let user = dir.user(key)?;
        let mut attrs = vec![
            (
                ATTR_OBJECT_CLASS.to_string(),
                vec![
                    AttrValue::from("top"),
                    AttrValue::from("person"),
                    AttrValue::from("organizationalPerson"),
                    AttrValue::from("user"),
                ],
            ),
            (
                ATTR_CN.to_string(),
                vec![AttrValue::from(user.common_name())],
            ),
            (
                ATTR_ACCOUNT_NAME.to_string(),
                vec![AttrValue::from(username.as_str())],
            ),
            (
                ATTR_ACCOUNT_CONTROL.to_string(),
                vec![AttrValue::from(account_control(user.disabled()).to_string())],
            ),
        ];
        for (attr, value) in user_scalar_plan(dir, key)? {
            if let Some(value) = value {
                attrs.push((attr.to_string(), vec![AttrValue::from(value.as_str())]));
            }
        }

        match outcome(client.add(&dn, attrs).await, &dn, "user add")? {
            Outcome::Done => {}
            Outcome::Missing => {
                warn!(dn = %dn, "User add failed: container entry missing");
                stats.skipped += 1;
                continue;
            }
            Outcome::Failed => {
                stats.skipped += 1;
                continue;
            }
        }

        match read_back_rid(client, &dn).await? {
            Some(rid) => {
                if let Err(e) = dir.assign_user_rid(key, rid) {
                    warn!(dn = %dn, rid, error = %e, "Could not record user RID");
                }
            }
            None => warn!(dn = %dn, "Created user has no decodable SID"),
        }

        // Apply the staged password, or generate one: accounts never stay
        // passwordless.
        let staged = dir.user(key)?.has_staged_password();
        let password = dir
            .take_user_password(key)
            .unwrap_or_else(|| random_password(GENERATED_PASSWORD_LEN));
        match encode_password(&password) {
            Ok(encoded) => {
                let mods = vec![Modification::Replace(
                    ATTR_UNICODE_PWD.to_string(),
                    vec![AttrValue::Bytes(encoded)],
                )];
                if let Outcome::Failed | Outcome::Missing =
                    outcome(client.modify(&dn, mods).await, &dn, "password set")?
                {
                    if staged {
                        warn!(dn = %dn, "Staged password was not applied");
                    }
                }
            }
            Err(e) => warn!(dn = %dn, error = %e, "Password not encodable"),
        }

        if dir.user(key)?.must_change_password() {
            let mods = vec![Modification::Replace(
                ATTR_PWD_LAST_SET.to_string(),
                vec![AttrValue::from("0")],
            )];
            let _ = outcome(client.modify(&dn, mods).await, &dn, "password-change marker")?;
        }

        // The remote side refuses a primaryGroupID the account is not yet a
        // member of, so membership is added first; the member value is
        // dropped server-side once the attribute moves.
        if primary_rid != DOMAIN_USERS_RID {
            let group_dn = dir.group_dn(primary)?;
            add_member_tolerant(client, &group_dn, &dn).await?;
            let mods = vec![Modification::Replace(
                ATTR_PRIMARY_GROUP_ID.to_string(),
                vec![AttrValue::from(primary_rid.to_string().as_str())],
            )];
            let _ = outcome(client.modify(&dn, mods).await, &dn, "primary group switch")?;
        }

        dir.set_user_loaded_flag(key);
        stats.users_created += 1;
        debug!(dn = %dn, "User created");
    }
    Ok(())
}

/// Add a member value, tolerating "already present".
async fn add_member_tolerant<C>(client: &C, group_dn: &str, member_dn: &str) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    let mods = vec![Modification::Add(
        ATTR_MEMBER.to_string(),
        vec![AttrValue::from(member_dn)],
    )];
    match client.modify(group_dn, mods).await {
        Ok(()) => Ok(()),
        Err(e) if e.result_code() == Some(RC_ATTRIBUTE_OR_VALUE_EXISTS) => Ok(()),
        Err(e) => match e.result_code() {
            Some(code) => {
                warn!(dn = %group_dn, member = %member_dn, code, "Member add failed; continuing");
                Ok(())
            }
            None => Err(e.into()),
        },
    }
}

// ----------------------------------------------------------------------
// Phase 7: attribute and membership convergence

async fn update_groups<C>(dir: &mut Directory, client: &C, stats: &mut SyncStats) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Phase 7: updating groups");
    let dirty: Vec<GroupKey> = dir
        .groups()
        .filter(|(_, g)| g.state() == EntityState::Active && g.modified())
        .map(|(key, _)| key)
        .collect();

    for key in dirty {
        let dn = dir.group_dn(key)?;
        let Some(entry) = fetch_entry(client, &dn).await? else {
            warn!(dn = %dn, "Modified group has no remote entry; skipped");
            stats.skipped += 1;
            continue;
        };

        let mut mods = diff_scalars(&entry, group_scalar_plan(dir, key)?);
        mods.extend(group_member_mods(dir, key, &entry)?);

        if mods.is_empty() {
            dir.settle_group(key);
            continue;
        }
        if apply_mods(client, &dn, mods).await? {
            dir.settle_group(key);
            stats.groups_updated += 1;
            debug!(dn = %dn, "Group updated");
        } else {
            stats.skipped += 1;
        }
    }
    Ok(())
}

async fn update_users<C>(dir: &mut Directory, client: &C, stats: &mut SyncStats) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Phase 7: updating users");
    let dirty: Vec<UserKey> = dir
        .users()
        .filter(|(_, u)| u.state() == EntityState::Active && u.modified())
        .map(|(key, _)| key)
        .collect();

    for key in dirty {
        let dn = dir.user_dn(key)?;
        let Some(entry) = fetch_entry(client, &dn).await? else {
            warn!(dn = %dn, "Modified user has no remote entry; skipped");
            stats.skipped += 1;
            continue;
        };

        let mut mods = diff_scalars(&entry, user_scalar_plan(dir, key)?);

        // Account control: only the disable bit belongs to the graph; the
        // remote side's other flags are preserved.
        let remote_uac = entry
            .attr_u32(ATTR_ACCOUNT_CONTROL)
            .unwrap_or(UAC_NORMAL_ACCOUNT);
        let desired_uac = if dir.user(key)?.disabled() {
            remote_uac | UAC_ACCOUNT_DISABLE
        } else {
            remote_uac & !UAC_ACCOUNT_DISABLE
        };
        if desired_uac != remote_uac {
            mods.push(Modification::Replace(
                ATTR_ACCOUNT_CONTROL.to_string(),
                vec![AttrValue::from(desired_uac.to_string().as_str())],
            ));
        }

        // Primary group: membership first, then the attribute.
        let primary = dir.user(key)?.primary_group();
        let Some(primary_rid) = dir.group(primary)?.rid() else {
            error!(
                dn = %dn,
                group = %dir.group(primary)?.name(),
                "Primary group has no RID; user not updated"
            );
            stats.skipped += 1;
            continue;
        };
        if entry.attr_u32(ATTR_PRIMARY_GROUP_ID) != Some(primary_rid) {
            if primary_rid != DOMAIN_USERS_RID {
                let group_dn = dir.group_dn(primary)?;
                add_member_tolerant(client, &group_dn, &dn).await?;
            }
            mods.push(Modification::Replace(
                ATTR_PRIMARY_GROUP_ID.to_string(),
                vec![AttrValue::from(primary_rid.to_string().as_str())],
            ));
        }

        let staged_password = dir.user(key)?.has_staged_password();
        if staged_password {
            if let Some(password) = dir.take_user_password(key) {
                match encode_password(&password) {
                    Ok(encoded) => mods.push(Modification::Replace(
                        ATTR_UNICODE_PWD.to_string(),
                        vec![AttrValue::Bytes(encoded)],
                    )),
                    Err(e) => warn!(dn = %dn, error = %e, "Staged password not encodable"),
                }
            }
        }

        if dir.user(key)?.must_change_password() && entry.attr(ATTR_PWD_LAST_SET) != Some("0") {
            mods.push(Modification::Replace(
                ATTR_PWD_LAST_SET.to_string(),
                vec![AttrValue::from("0")],
            ));
        }

        if mods.is_empty() {
            dir.settle_user(key);
            continue;
        }
        if apply_mods(client, &dn, mods).await? {
            dir.settle_user(key);
            stats.users_updated += 1;
            debug!(dn = %dn, "User updated");
        } else {
            stats.skipped += 1;
        }
    }
    Ok(())
}

/// Apply modifications; tolerated per-value codes (16/20) are retried
/// value-by-value so one stale membership cannot sink the whole update.
async fn apply_mods<C>(client: &C, dn: &str, mods: Vec<Modification>) -> EngineResult<bool>
where
    C: DirectoryClient + ?Sized,
{
    match client.modify(dn, mods.clone()).await {
        Ok(()) => Ok(true),
        Err(e)
            if matches!(
                e.result_code(),
                Some(RC_ATTRIBUTE_OR_VALUE_EXISTS) | Some(RC_NO_SUCH_ATTRIBUTE)
            ) =>
        {
            // Replay one modification at a time, ignoring the stale ones.
            let mut all_ok = true;
            for modification in mods {
                match client.modify(dn, vec![modification]).await {
                    Ok(()) => {}
                    Err(e)
                        if matches!(
                            e.result_code(),
                            Some(RC_ATTRIBUTE_OR_VALUE_EXISTS) | Some(RC_NO_SUCH_ATTRIBUTE)
                        ) => {}
                    Err(e) => match e.result_code() {
                        Some(code) => {
                            warn!(dn = %dn, code, error = %e, "Modify failed; continuing");
                            all_ok = false;
                        }
                        None => return Err(e.into()),
                    },
                }
            }
            Ok(all_ok)
        }
        Err(e) => match e.result_code() {
            Some(code) => {
                warn!(dn = %dn, code, error = %e, "Modify failed; continuing");
                Ok(false)
            }
            None => Err(e.into()),
        },
    }
}

// ----------------------------------------------------------------------
// Attribute tables

/// The per-kind attribute table for users: (remote attribute, desired
/// value). An attribute that does not apply to the kind is simply absent.
fn user_scalar_plan(
    dir: &Directory,
    key: UserKey,
) -> EngineResult<Vec<(&'static str, Option<String>)>> {
    let user = dir.user(key)?;
    let owned = |v: Option<&str>| v.map(str::to_string);

    let mut plan = vec![
        (ATTR_DISPLAY_NAME, Some(user.common_name().to_string())),
        (ATTR_GIVEN_NAME, owned(user.given_name())),
        (ATTR_MIDDLE_NAME, owned(user.middle_name())),
        (ATTR_SURNAME, owned(user.surname())),
        (ATTR_INITIALS, owned(user.initials())),
        (ATTR_SCRIPT_PATH, owned(user.script_path())),
        (ATTR_PROFILE_PATH, owned(user.profile_path())),
        (ATTR_HOME_DIRECTORY, owned(user.home_directory())),
        (ATTR_HOME_DRIVE, owned(user.home_drive())),
    ];

    if let Some(posix) = user.posix() {
        let shadow: ShadowAttrs = posix.shadow();
        plan.push((ATTR_UID_NUMBER, Some(posix.uid().to_string())));
        plan.push((
            ATTR_GID_NUMBER,
            dir.user_gid(key)?.map(|gid| gid.to_string()),
        ));
        plan.push((ATTR_LOGIN_SHELL, owned(posix.shell())));
        plan.push((ATTR_UNIX_HOME, owned(posix.home())));
        plan.push((ATTR_GECOS, owned(posix.gecos())));
        plan.push((ATTR_NIS_DOMAIN, owned(posix.nis_domain())));
        plan.push((ATTR_UNIX_USER_PASSWORD, owned(posix.unix_password())));
        plan.push((ATTR_SHADOW_LAST_CHANGE, shadow.last_change.map(|v| v.to_string())));
        plan.push((ATTR_SHADOW_MIN, shadow.min.map(|v| v.to_string())));
        plan.push((ATTR_SHADOW_MAX, shadow.max.map(|v| v.to_string())));
        plan.push((ATTR_SHADOW_WARNING, shadow.warning.map(|v| v.to_string())));
        plan.push((ATTR_SHADOW_INACTIVE, shadow.inactive.map(|v| v.to_string())));
        plan.push((ATTR_SHADOW_EXPIRE, shadow.expire.map(|v| v.to_string())));
        plan.push((ATTR_SHADOW_FLAG, shadow.flag.map(|v| v.to_string())));
    }
    Ok(plan)
}

/// The per-kind attribute table for groups.
fn group_scalar_plan(
    dir: &Directory,
    key: GroupKey,
) -> EngineResult<Vec<(&'static str, Option<String>)>> {
    let group = dir.group(key)?;
    let mut plan = vec![(
        ATTR_GROUP_TYPE,
        Some(group_type_mask(group.scope(), group.category()).to_string()),
    )];
    if let Some(posix) = group.posix() {
        plan.push((ATTR_GID_NUMBER, Some(posix.gid().to_string())));
        plan.push((ATTR_NIS_DOMAIN, posix.nis_domain().map(str::to_string)));
        plan.push((
            ATTR_GROUP_UNIX_PASSWORD,
            posix.unix_password().map(str::to_string),
        ));
    }
    Ok(plan)
}

/// Field-by-field diff of the attribute table against the remote entry,
/// emitting only the changed attributes.
fn diff_scalars(entry: &Entry, plan: Vec<(&'static str, Option<String>)>) -> Vec<Modification> {
    let mut mods = Vec::new();
    for (attr, desired) in plan {
        let current = entry.attr(attr);
        match (current, desired) {
            (None, None) => {}
            (Some(current), Some(desired)) if current == desired => {}
            (_, Some(desired)) => mods.push(Modification::Replace(
                attr.to_string(),
                vec![AttrValue::from(desired.as_str())],
            )),
            (Some(_), None) => mods.push(Modification::Delete(attr.to_string(), Vec::new())),
        }
    }
    mods
}

/// Membership modifications for a group: adds from the set difference of
/// desired versus remote, deletes only for edges whose removal was staged
/// locally. Remote member values the graph never learned about are left
/// alone.
fn group_member_mods(
    dir: &Directory,
    key: GroupKey,
    entry: &Entry,
) -> EngineResult<Vec<Modification>> {
    let group = dir.group(key)?;
    let mut mods = Vec::new();

    // Windows membership: the member attribute holds DNs.
    let mut desired: Vec<String> = Vec::new();
    for user in group.users() {
        desired.push(dir.user_dn(user)?);
    }
    for member in group.groups() {
        desired.push(dir.group_dn(member)?);
    }
    let remote: HashSet<String> = entry
        .attrs(ATTR_MEMBER)
        .iter()
        .map(|dn| dn.to_ascii_lowercase())
        .collect();

    let adds: Vec<AttrValue> = desired
        .iter()
        .filter(|dn| !remote.contains(&dn.to_ascii_lowercase()))
        .map(|dn| AttrValue::from(dn.as_str()))
        .collect();

    let mut staged: Vec<String> = Vec::new();
    for user in group.removed_users() {
        staged.push(dir.user_dn(user)?);
    }
    for member in group.removed_groups() {
        staged.push(dir.group_dn(member)?);
    }
    let dels: Vec<AttrValue> = staged
        .iter()
        .filter(|dn| remote.contains(&dn.to_ascii_lowercase()))
        .map(|dn| AttrValue::from(dn.as_str()))
        .collect();

    if !adds.is_empty() {
        mods.push(Modification::Add(ATTR_MEMBER.to_string(), adds));
    }
    if !dels.is_empty() {
        mods.push(Modification::Delete(ATTR_MEMBER.to_string(), dels));
    }

    // POSIX membership: usernames of posix members, excluding users whose
    // UNIX main group is this group (that membership is implicit).
    if group.is_posix() {
        let mut desired_posix: Vec<String> = Vec::new();
        for user_key in group.users() {
            let user = dir.user(user_key)?;
            let Some(posix) = user.posix() else { continue };
            if posix.main_group() == key {
                continue;
            }
            desired_posix.push(user.username().to_string());
        }
        let mut staged_posix: Vec<String> = Vec::new();
        for user_key in group.removed_users() {
            let user = dir.user(user_key)?;
            if user.is_posix() {
                staged_posix.push(user.username().to_string());
            }
        }

        for attr in [ATTR_MEMBER_UID, ATTR_POSIX_MEMBER] {
            let remote: HashSet<String> = entry
                .attrs(attr)
                .iter()
                .map(|name| name.to_ascii_lowercase())
                .collect();
            let adds: Vec<AttrValue> = desired_posix
                .iter()
                .filter(|name| !remote.contains(&name.to_ascii_lowercase()))
                .map(|name| AttrValue::from(name.as_str()))
                .collect();
            let dels: Vec<AttrValue> = staged_posix
                .iter()
                .filter(|name| remote.contains(&name.to_ascii_lowercase()))
                .map(|name| AttrValue::from(name.as_str()))
                .collect();
            if !adds.is_empty() {
                mods.push(Modification::Add(attr.to_string(), adds));
            }
            if !dels.is_empty() {
                mods.push(Modification::Delete(attr.to_string(), dels));
            }
        }
    }

    Ok(mods)
}
