//! Directory mirror loader.
//!
//! Two-pass hydration of the identity graph from the remote directory:
//! groups first, then users (whose primary and UNIX main group references
//! need the groups in place), then a membership pass resolving `member`
//! DNs. Idempotent and safely re-invocable: entries already represented
//! locally are matched by name, never duplicated.
//!
//! An entry whose required cross-reference cannot be resolved is skipped
//! with a warning, not fatal; re-running after adding the missing
//! container or group picks it up.

use std::collections::BTreeSet;

use tracing::{debug, instrument, warn};

use admirror_client::{DirectoryClient, Entry, Filter, Scope};

use crate::error::EngineResult;
use crate::model::{ContainerKey, Directory, EntityState, GroupKey, ShadowAttrs, UserKey};
use crate::schema::{
    is_disabled, parse_group_type, rid_from_sid, ATTR_ACCOUNT_CONTROL, ATTR_ACCOUNT_NAME, ATTR_CN,
    ATTR_GECOS, ATTR_GID_NUMBER, ATTR_GIVEN_NAME, ATTR_GROUP_TYPE, ATTR_GROUP_UNIX_PASSWORD,
    ATTR_HOME_DIRECTORY, ATTR_HOME_DRIVE, ATTR_INITIALS, ATTR_LOGIN_SHELL, ATTR_MEMBER,
    ATTR_MIDDLE_NAME, ATTR_NIS_DOMAIN, ATTR_OBJECT_CLASS, ATTR_OBJECT_SID, ATTR_PRIMARY_GROUP_ID,
    ATTR_PROFILE_PATH, ATTR_SCRIPT_PATH, ATTR_SHADOW_EXPIRE, ATTR_SHADOW_FLAG,
    ATTR_SHADOW_INACTIVE, ATTR_SHADOW_LAST_CHANGE, ATTR_SHADOW_MAX, ATTR_SHADOW_MIN,
    ATTR_SHADOW_WARNING, ATTR_SURNAME, ATTR_UID_NUMBER, ATTR_UNIX_HOME, ATTR_UNIX_USER_PASSWORD,
    UAC_NORMAL_ACCOUNT,
};

const GROUP_LOAD_ATTRS: &[&str] = &[
    ATTR_CN,
    ATTR_ACCOUNT_NAME,
    ATTR_OBJECT_SID,
    ATTR_GROUP_TYPE,
    ATTR_GID_NUMBER,
    ATTR_NIS_DOMAIN,
    ATTR_GROUP_UNIX_PASSWORD,
];

const USER_LOAD_ATTRS: &[&str] = &[
    ATTR_CN,
    ATTR_ACCOUNT_NAME,
    ATTR_OBJECT_SID,
    ATTR_ACCOUNT_CONTROL,
    ATTR_PRIMARY_GROUP_ID,
    ATTR_GIVEN_NAME,
    ATTR_MIDDLE_NAME,
    ATTR_SURNAME,
    ATTR_INITIALS,
    ATTR_SCRIPT_PATH,
    ATTR_PROFILE_PATH,
    ATTR_HOME_DIRECTORY,
    ATTR_HOME_DRIVE,
    ATTR_UID_NUMBER,
    ATTR_GID_NUMBER,
    ATTR_LOGIN_SHELL,
    ATTR_UNIX_HOME,
    ATTR_GECOS,
    ATTR_NIS_DOMAIN,
    ATTR_UNIX_USER_PASSWORD,
    ATTR_SHADOW_LAST_CHANGE,
    ATTR_SHADOW_MIN,
    ATTR_SHADOW_MAX,
    ATTR_SHADOW_WARNING,
    ATTR_SHADOW_INACTIVE,
    ATTR_SHADOW_EXPIRE,
    ATTR_SHADOW_FLAG,
];

/// Reconcile the identity graph with the current remote directory state.
///
/// Every entity created or matched during this invocation ends up marked
/// loaded and clean; locally authored entities with no remote counterpart
/// keep their dirty flags and are created by the next
/// [`sync`](crate::sync::sync).
#[instrument(skip(dir, client), fields(root = %dir.root_dn()))]
pub async fn load<C>(dir: &mut Directory, client: &C) -> EngineResult<()>
where
    C: DirectoryClient + ?Sized,
{
    debug!("Directory load starting");

    let containers: Vec<ContainerKey> = dir
        .containers()
        .filter(|(_, c)| c.state() == EntityState::Active)
        .map(|(key, _)| key)
        .collect();

    let mut touched_groups: BTreeSet<GroupKey> = BTreeSet::new();
    let mut touched_users: BTreeSet<UserKey> = BTreeSet::new();

    // Pass 1: groups, so user cross-references can resolve.
    for &container in &containers {
        let base = dir.container_dn(container)?;
        let entries = client
            .search(
                &base,
                Scope::OneLevel,
                &Filter::eq(ATTR_OBJECT_CLASS, "group"),
                GROUP_LOAD_ATTRS,
            )
            .await?;
        debug!(container = %base, groups = entries.len(), "Loading groups");
        for entry in entries {
            if let Some(key) = load_group_entry(dir, container, &entry) {
                touched_groups.insert(key);
            }
        }
    }

    // Pass 2: users.
    for &container in &containers {
        let base = dir.container_dn(container)?;
        let entries = client
            .search(
                &base,
                Scope::OneLevel,
                &Filter::eq(ATTR_OBJECT_CLASS, "user"),
                USER_LOAD_ATTRS,
            )
            .await?;
        debug!(container = %base, users = entries.len(), "Loading users");
        for entry in entries {
            if let Some(key) = load_user_entry(dir, container, &entry) {
                touched_users.insert(key);
            }
        }
    }

    // Pass 3: explicit membership edges. Implicit primary/main edges are
    // never represented in the member attribute and are not derived here.
    let groups: Vec<GroupKey> = dir
        .groups()
        .filter(|(_, g)| g.state() == EntityState::Active)
        .map(|(key, _)| key)
        .collect();
    for &group in &groups {
        let dn = dir.group_dn(group)?;
        let entries = client
            .search(
                &dn,
                Scope::Base,
                &Filter::present(ATTR_OBJECT_CLASS),
                &[ATTR_MEMBER],
            )
            .await?;
        let Some(entry) = entries.into_iter().next() else {
            continue;
        };
        for member_dn in entry.attrs(ATTR_MEMBER) {
            if let Some(user) = dir.find_user_by_dn(member_dn, false) {
                dir.link_loaded_user_member(user, group);
            } else if let Some(member) = dir.find_group_by_dn(member_dn, false) {
                dir.link_loaded_group_member(member, group);
            } else {
                warn!(group = %dn, member = %member_dn, "Skipping unresolvable member reference");
            }
        }
    }

    for key in touched_groups {
        dir.mark_group_loaded(key);
    }
    for key in touched_users {
        dir.mark_user_loaded(key);
    }

    debug!("Directory load complete");
    Ok(())
}

/// Hydrate one group entry. Returns the touched key, or `None` when the
/// entry was skipped.
fn load_group_entry(dir: &mut Directory, container: ContainerKey, entry: &Entry) -> Option<GroupKey> {
    let Some(name) = entry.attr(ATTR_ACCOUNT_NAME).or_else(|| entry.attr(ATTR_CN)) else {
        warn!(entry = %entry.dn, "Skipping group entry: no account name");
        return None;
    };
    let name = name.to_string();

    if let Some(existing) = dir.find_group_by_name(&name, true) {
        capture_group_rid(dir, existing, entry);
        return Some(existing);
    }
    if dir.find_user_by_username(&name, true).is_some() {
        warn!(entry = %entry.dn, "Skipping group entry: name collides with a known user");
        return None;
    }

    let Some((scope, category)) = entry
        .attr_i64(ATTR_GROUP_TYPE)
        .and_then(|mask| i32::try_from(mask).ok())
        .and_then(parse_group_type)
    else {
        warn!(entry = %entry.dn, "Skipping group entry: unrecognized groupType");
        return None;
    };

    let created = match entry.attr_u32(ATTR_GID_NUMBER) {
        Some(gid) => dir.create_posix_group(container, &name, scope, category, gid),
        None => dir.create_group(container, &name, scope, category),
    };
    let key = match created {
        Ok(key) => key,
        Err(e) => {
            warn!(entry = %entry.dn, error = %e, "Skipping group entry");
            return None;
        }
    };

    let is_posix = dir.group(key).map(|g| g.is_posix()).unwrap_or(false);
    if is_posix {
        if let Ok(group) = dir.group_mut(key) {
            let _ = group.set_nis_domain(entry.attr(ATTR_NIS_DOMAIN).map(str::to_string));
            let _ =
                group.set_unix_password(entry.attr(ATTR_GROUP_UNIX_PASSWORD).map(str::to_string));
        }
    }
    capture_group_rid(dir, key, entry);
    Some(key)
}

/// Hydrate one user entry. Returns the touched key, or `None` when the
/// entry was skipped.
fn load_user_entry(dir: &mut Directory, container: ContainerKey, entry: &Entry) -> Option<UserKey> {
    let Some(username) = entry.attr(ATTR_ACCOUNT_NAME) else {
        warn!(entry = %entry.dn, "Skipping user entry: no account name");
        return None;
    };
    let username = username.to_string();

    if let Some(existing) = dir.find_user_by_username(&username, true) {
        capture_user_rid(dir, existing, entry);
        return Some(existing);
    }
    if dir.find_group_by_name(&username, true).is_some() {
        warn!(entry = %entry.dn, "Skipping user entry: name collides with a known group");
        return None;
    }

    let Some(primary_rid) = entry.attr_u32(ATTR_PRIMARY_GROUP_ID) else {
        warn!(entry = %entry.dn, "Skipping user entry: no primary group attribute");
        return None;
    };
    let Some(primary_group) = dir.find_group_by_rid(primary_rid, false) else {
        warn!(
            entry = %entry.dn,
            rid = primary_rid,
            "Skipping user entry: primary group not known; load again after adding its container"
        );
        return None;
    };

    let uid = entry.attr_u32(ATTR_UID_NUMBER);
    let gid = entry.attr_u32(ATTR_GID_NUMBER);
    let created = match (uid, gid) {
        (Some(uid), Some(gid)) => {
            let Some(main_group) = dir.find_group_by_gid(gid, false) else {
                warn!(
                    entry = %entry.dn,
                    gid,
                    "Skipping user entry: UNIX main group not known; load again after adding its container"
                );
                return None;
            };
            dir.create_posix_user(container, &username, primary_group, uid, main_group)
        }
        _ => dir.create_user(container, &username, primary_group),
    };
    let key = match created {
        Ok(key) => key,
        Err(e) => {
            warn!(entry = %entry.dn, error = %e, "Skipping user entry");
            return None;
        }
    };

    hydrate_user_scalars(dir, key, entry);
    capture_user_rid(dir, key, entry);
    Some(key)
}

fn hydrate_user_scalars(dir: &mut Directory, key: UserKey, entry: &Entry) {
    let owned = |name: &str| entry.attr(name).map(str::to_string);

    let is_posix = dir.user(key).map(|u| u.is_posix()).unwrap_or(false);
    let Ok(user) = dir.user_mut(key) else {
        return;
    };

    if let Some(cn) = entry.attr(ATTR_CN) {
        user.set_common_name(cn);
    }
    user.set_given_name(owned(ATTR_GIVEN_NAME));
    user.set_middle_name(owned(ATTR_MIDDLE_NAME));
    user.set_surname(owned(ATTR_SURNAME));
    user.set_initials(owned(ATTR_INITIALS));
    user.set_disabled(is_disabled(
        entry.attr_u32(ATTR_ACCOUNT_CONTROL).unwrap_or(UAC_NORMAL_ACCOUNT),
    ));
    // Remote data is authoritative; the local exclusivity rules only guard
    // locally authored edits.
    user.hydrate_profile(
        owned(ATTR_SCRIPT_PATH),
        owned(ATTR_PROFILE_PATH),
        owned(ATTR_HOME_DIRECTORY),
        owned(ATTR_HOME_DRIVE),
    );

    if is_posix {
        let _ = user.set_shell(owned(ATTR_LOGIN_SHELL));
        let _ = user.set_unix_home(owned(ATTR_UNIX_HOME));
        let _ = user.set_gecos(owned(ATTR_GECOS));
        let _ = user.set_nis_domain(owned(ATTR_NIS_DOMAIN));
        let _ = user.set_unix_password(owned(ATTR_UNIX_USER_PASSWORD));
        let _ = user.set_shadow(ShadowAttrs {
            last_change: entry.attr_i64(ATTR_SHADOW_LAST_CHANGE),
            min: entry.attr_i64(ATTR_SHADOW_MIN),
            max: entry.attr_i64(ATTR_SHADOW_MAX),
            warning: entry.attr_i64(ATTR_SHADOW_WARNING),
            inactive: entry.attr_i64(ATTR_SHADOW_INACTIVE),
            expire: entry.attr_i64(ATTR_SHADOW_EXPIRE),
            flag: entry.attr_i64(ATTR_SHADOW_FLAG),
        });
    }
}

fn capture_group_rid(dir: &mut Directory, key: GroupKey, entry: &Entry) {
    let Ok(group) = dir.group(key) else { return };
    if group.rid().is_some() {
        return;
    }
    if let Some(rid) = entry.bin_attr(ATTR_OBJECT_SID).and_then(rid_from_sid) {
        if let Err(e) = dir.assign_group_rid(key, rid) {
            warn!(entry = %entry.dn, rid, error = %e, "Could not record group RID");
        }
    }
}

fn capture_user_rid(dir: &mut Directory, key: UserKey, entry: &Entry) {
    let Ok(user) = dir.user(key) else { return };
    if user.rid().is_some() {
        return;
    }
    if let Some(rid) = entry.bin_attr(ATTR_OBJECT_SID).and_then(rid_from_sid) {
        if let Err(e) = dir.assign_user_rid(key, rid) {
            warn!(entry = %entry.dn, rid, error = %e, "Could not record user RID");
        }
    }
}
