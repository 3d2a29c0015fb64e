//! In-memory directory double.
//!
//! A deterministic [`DirectoryClient`] implementation holding a DN-keyed
//! entry tree. Used by the engine's test suites and for local
//! experimentation without a directory server.
//!
//! Beyond plain storage it reproduces the server-side behaviors the
//! reconciliation engine's contract depends on:
//!
//! - `objectSid` values are minted for new `user`/`group` entries from a
//!   monotonically increasing RID,
//! - new `user` entries get `primaryGroupID` 513 when none is supplied,
//! - replacing a user's `primaryGroupID` drops the user's explicit `member`
//!   value from the group gaining primary status,
//! - result codes 32 (noSuchObject), 66 (notAllowedOnNonLeaf) and 68
//!   (entryAlreadyExists) are reported as a real server would.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::DirectoryClient;
use crate::entry::{AttrValue, Entry, Modification};
use crate::error::{ClientError, ClientResult};
use crate::filter::{Filter, Scope};

const WELL_KNOWN_DOMAIN_USERS_RID: &str = "513";

/// In-memory directory tree.
pub struct MemoryClient {
    state: RwLock<State>,
}

struct State {
    /// Normalized DN -> entry.
    entries: HashMap<String, Entry>,
    /// Next RID handed out for minted SIDs.
    next_rid: u32,
}

/// Normalize a DN for keying: lowercase, spaces around commas stripped.
fn norm_dn(dn: &str) -> String {
    dn.split(',')
        .map(|part| part.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parent DN, if any.
fn parent_dn(dn: &str) -> Option<&str> {
    dn.split_once(',').map(|(_, rest)| rest)
}

/// Build a domain SID blob with the given trailing RID.
///
/// Layout per MS-DTYP: revision, sub-authority count, 48-bit big-endian
/// authority, then little-endian 32-bit sub-authorities.
fn mint_sid(rid: u32) -> Vec<u8> {
    let sub_auths: [u32; 5] = [21, 0x0102_0304, 0x0506_0708, 0x090a_0b0c, rid];
    let mut sid = Vec::with_capacity(8 + 4 * sub_auths.len());
    sid.push(1); // revision
    sid.push(sub_auths.len() as u8);
    sid.extend_from_slice(&[0, 0, 0, 0, 0, 5]); // NT authority
    for sub in sub_auths {
        sid.extend_from_slice(&sub.to_le_bytes());
    }
    sid
}

/// Trailing sub-authority of a SID blob.
fn sid_rid(sid: &[u8]) -> Option<u32> {
    if sid.len() < 12 || (sid.len() - 8) % 4 != 0 {
        return None;
    }
    let tail: [u8; 4] = sid[sid.len() - 4..].try_into().ok()?;
    Some(u32::from_le_bytes(tail))
}

impl MemoryClient {
    /// Create a tree seeded with the root entry.
    pub fn new(root_dn: impl Into<String>) -> Self {
        let root_dn = root_dn.into();
        let mut entries = HashMap::new();
        let root = Entry::new(root_dn.clone()).with("objectClass", "domain");
        entries.insert(norm_dn(&root_dn), root);
        Self {
            state: RwLock::new(State {
                entries,
                next_rid: 1100,
            }),
        }
    }

    /// Override the starting RID for minted SIDs.
    #[must_use]
    pub fn with_next_rid(self, rid: u32) -> Self {
        {
            let mut state = self.state.try_write().expect("unshared at construction");
            state.next_rid = rid;
        }
        self
    }

    /// Insert an entry verbatim, minting an `objectSid` when the entry is a
    /// user or group without one. Replaces any existing entry at the DN.
    pub async fn insert(&self, entry: Entry) {
        let mut state = self.state.write().await;
        let mut entry = entry;
        State::apply_server_defaults(&mut state.next_rid, &mut entry);
        state.entries.insert(norm_dn(&entry.dn), entry);
    }

    /// Fetch a stored entry by DN for test assertions.
    pub async fn entry(&self, dn: &str) -> Option<Entry> {
        self.state.read().await.entries.get(&norm_dn(dn)).cloned()
    }

    /// All stored DNs, for test assertions.
    pub async fn dns(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .entries
            .values()
            .map(|e| e.dn.clone())
            .collect()
    }

    fn matches(entry: &Entry, filter: &Filter) -> bool {
        match filter {
            Filter::And(filters) => filters.iter().all(|f| Self::matches(entry, f)),
            Filter::Or(filters) => filters.iter().any(|f| Self::matches(entry, f)),
            Filter::Not(filter) => !Self::matches(entry, filter),
            Filter::Equals { attribute, value } => entry
                .attrs(attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Filter::Present { attribute } => entry.has_attr(attribute),
        }
    }

    fn in_scope(entry_dn: &str, base: &str, scope: Scope) -> bool {
        let entry_dn = norm_dn(entry_dn);
        let base = norm_dn(base);
        match scope {
            Scope::Base => entry_dn == base,
            Scope::OneLevel => parent_dn(&entry_dn).map(norm_dn) == Some(base),
            Scope::Subtree => {
                entry_dn == base || entry_dn.ends_with(&format!(",{base}"))
            }
        }
    }

    fn select_attrs(entry: &Entry, attrs: &[&str]) -> Entry {
        if attrs.is_empty() || attrs.contains(&"*") {
            return entry.clone();
        }
        let mut selected = Entry::new(entry.dn.clone());
        for (name, values) in &entry.attrs {
            if attrs.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                selected.attrs.insert(name.clone(), values.clone());
            }
        }
        for (name, values) in &entry.bin_attrs {
            if attrs.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                selected.bin_attrs.insert(name.clone(), values.clone());
            }
        }
        selected
    }
}

impl State {
    fn apply_server_defaults(next_rid: &mut u32, entry: &mut Entry) {
        let classes = entry.attrs("objectClass").to_vec();
        let is_user = classes.iter().any(|c| c.eq_ignore_ascii_case("user"));
        let is_group = classes.iter().any(|c| c.eq_ignore_ascii_case("group"));

        if (is_user || is_group) && !entry.has_attr("objectSid") {
            let rid = *next_rid;
            *next_rid += 1;
            entry.bin_attrs.insert("objectSid".to_string(), vec![mint_sid(rid)]);
        }
        if is_user && !entry.has_attr("primaryGroupID") {
            entry.set(
                "primaryGroupID",
                vec![WELL_KNOWN_DOMAIN_USERS_RID.to_string()],
            );
        }
    }

    /// AD drops the explicit member value when a group becomes a user's
    /// primary group.
    fn strip_member_of_new_primary(&mut self, user_dn: &str, rid_text: &str) {
        let Ok(rid) = rid_text.parse::<u32>() else {
            return;
        };
        let user_dn = norm_dn(user_dn);
        for entry in self.entries.values_mut() {
            let is_group = entry
                .attrs("objectClass")
                .iter()
                .any(|c| c.eq_ignore_ascii_case("group"));
            if !is_group {
                continue;
            }
            if entry.bin_attr("objectSid").and_then(sid_rid) != Some(rid) {
                continue;
            }
            for (name, values) in entry.attrs.iter_mut() {
                if name.eq_ignore_ascii_case("member") {
                    values.retain(|v| norm_dn(v) != user_dn);
                }
            }
        }
    }
}

#[async_trait]
impl DirectoryClient for MemoryClient {
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> ClientResult<Vec<Entry>> {
        let state = self.state.read().await;
        if !state.entries.contains_key(&norm_dn(base)) {
            return Ok(Vec::new());
        }
        let mut results: Vec<Entry> = state
            .entries
            .values()
            .filter(|e| MemoryClient::in_scope(&e.dn, base, scope))
            .filter(|e| MemoryClient::matches(e, filter))
            .map(|e| MemoryClient::select_attrs(e, attrs))
            .collect();
        results.sort_by(|a, b| a.dn.cmp(&b.dn));
        debug!(base = %base, found = results.len(), "Memory search");
        Ok(results)
    }

    async fn add(&self, dn: &str, attrs: Vec<(String, Vec<AttrValue>)>) -> ClientResult<()> {
        let mut state = self.state.write().await;
        let key = norm_dn(dn);
        if state.entries.contains_key(&key) {
            return Err(ClientError::operation(
                crate::RC_ALREADY_EXISTS,
                dn,
                "entry already exists",
            ));
        }
        match parent_dn(dn) {
            Some(parent) if state.entries.contains_key(&norm_dn(parent)) => {}
            _ => {
                return Err(ClientError::operation(
                    crate::RC_NO_SUCH_OBJECT,
                    dn,
                    "parent entry does not exist",
                ));
            }
        }

        let mut entry = Entry::new(dn);
        for (name, values) in attrs {
            let mut text = Vec::new();
            let mut binary = Vec::new();
            for value in values {
                match value {
                    AttrValue::Text(s) => text.push(s),
                    AttrValue::Bytes(b) => binary.push(b),
                }
            }
            if !text.is_empty() {
                entry.attrs.insert(name.clone(), text);
            }
            if !binary.is_empty() {
                entry.bin_attrs.insert(name, binary);
            }
        }
        State::apply_server_defaults(&mut state.next_rid, &mut entry);
        state.entries.insert(key, entry);
        Ok(())
    }

    async fn modify(&self, dn: &str, mods: Vec<Modification>) -> ClientResult<()> {
        let mut state = self.state.write().await;
        let key = norm_dn(dn);
        if !state.entries.contains_key(&key) {
            return Err(ClientError::operation(
                crate::RC_NO_SUCH_OBJECT,
                dn,
                "no such object",
            ));
        }

        let mut primary_group_switch: Option<String> = None;

        {
            let entry = state.entries.get_mut(&key).expect("checked above");
            for modification in mods {
                match modification {
                    Modification::Replace(name, values) => {
                        if name.eq_ignore_ascii_case("primaryGroupID") {
                            if let Some(AttrValue::Text(rid)) = values.first() {
                                primary_group_switch = Some(rid.clone());
                            }
                        }
                        let mut text = Vec::new();
                        let mut binary = Vec::new();
                        for value in values {
                            match value {
                                AttrValue::Text(s) => text.push(s),
                                AttrValue::Bytes(b) => binary.push(b),
                            }
                        }
                        entry.attrs.retain(|k, _| !k.eq_ignore_ascii_case(&name));
                        entry
                            .bin_attrs
                            .retain(|k, _| !k.eq_ignore_ascii_case(&name));
                        if !text.is_empty() {
                            entry.attrs.insert(name.clone(), text);
                        }
                        if !binary.is_empty() {
                            entry.bin_attrs.insert(name, binary);
                        }
                    }
                    Modification::Add(name, values) => {
                        for value in values {
                            match value {
                                AttrValue::Text(s) => {
                                    let slot = entry
                                        .attrs
                                        .keys()
                                        .find(|k| k.eq_ignore_ascii_case(&name))
                                        .cloned()
                                        .unwrap_or_else(|| name.clone());
                                    let v = entry.attrs.entry(slot).or_default();
                                    if !v.iter().any(|x| x.eq_ignore_ascii_case(&s)) {
                                        v.push(s);
                                    }
                                }
                                AttrValue::Bytes(b) => {
                                    entry
                                        .bin_attrs
                                        .entry(name.clone())
                                        .or_default()
                                        .push(b);
                                }
                            }
                        }
                    }
                    Modification::Delete(name, values) => {
                        if values.is_empty() {
                            entry.attrs.retain(|k, _| !k.eq_ignore_ascii_case(&name));
                            entry
                                .bin_attrs
                                .retain(|k, _| !k.eq_ignore_ascii_case(&name));
                        } else {
                            let doomed: Vec<String> = values
                                .iter()
                                .filter_map(|v| v.as_text().map(str::to_string))
                                .collect();
                            for (k, v) in entry.attrs.iter_mut() {
                                if k.eq_ignore_ascii_case(&name) {
                                    v.retain(|x| {
                                        !doomed.iter().any(|d| d.eq_ignore_ascii_case(x))
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        if let Some(rid) = primary_group_switch {
            state.strip_member_of_new_primary(dn, &rid);
        }
        Ok(())
    }

    async fn delete(&self, dn: &str) -> ClientResult<()> {
        let mut state = self.state.write().await;
        let key = norm_dn(dn);
        if !state.entries.contains_key(&key) {
            return Err(ClientError::operation(
                crate::RC_NO_SUCH_OBJECT,
                dn,
                "no such object",
            ));
        }
        let has_children = state
            .entries
            .keys()
            .any(|k| k != &key && k.ends_with(&format!(",{key}")));
        if has_children {
            return Err(ClientError::operation(
                66,
                dn,
                "operation not allowed on non-leaf entry",
            ));
        }
        state.entries.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> &'static str {
        "dc=example,dc=com"
    }

    #[tokio::test]
    async fn test_add_and_base_search() {
        let client = MemoryClient::new(root());
        client
            .add(
                "cn=Users,dc=example,dc=com",
                vec![
                    ("objectClass".to_string(), vec!["container".into()]),
                    ("cn".to_string(), vec!["Users".into()]),
                ],
            )
            .await
            .unwrap();

        let found = client
            .search(
                "cn=Users,dc=example,dc=com",
                Scope::Base,
                &Filter::present("objectClass"),
                &["*"],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attr("cn"), Some("Users"));
    }

    #[tokio::test]
    async fn test_add_requires_parent() {
        let client = MemoryClient::new(root());
        let err = client
            .add(
                "cn=alice,ou=Missing,dc=example,dc=com",
                vec![("objectClass".to_string(), vec!["user".into()])],
            )
            .await
            .unwrap_err();
        assert_eq!(err.result_code(), Some(32));
    }

    #[tokio::test]
    async fn test_duplicate_add_reports_68() {
        let client = MemoryClient::new(root());
        let attrs = vec![("objectClass".to_string(), vec![AttrValue::from("container")])];
        client
            .add("cn=Users,dc=example,dc=com", attrs.clone())
            .await
            .unwrap();
        let err = client
            .add("cn=Users,dc=example,dc=com", attrs)
            .await
            .unwrap_err();
        assert_eq!(err.result_code(), Some(68));
    }

    #[tokio::test]
    async fn test_sid_minting_sequential() {
        let client = MemoryClient::new(root()).with_next_rid(5000);
        client
            .add(
                "cn=g1,dc=example,dc=com",
                vec![
                    ("objectClass".to_string(), vec!["group".into()]),
                    ("cn".to_string(), vec!["g1".into()]),
                ],
            )
            .await
            .unwrap();
        client
            .add(
                "cn=g2,dc=example,dc=com",
                vec![
                    ("objectClass".to_string(), vec!["group".into()]),
                    ("cn".to_string(), vec!["g2".into()]),
                ],
            )
            .await
            .unwrap();

        let g1 = client.entry("cn=g1,dc=example,dc=com").await.unwrap();
        let g2 = client.entry("cn=g2,dc=example,dc=com").await.unwrap();
        assert_eq!(sid_rid(g1.bin_attr("objectSid").unwrap()), Some(5000));
        assert_eq!(sid_rid(g2.bin_attr("objectSid").unwrap()), Some(5001));
    }

    #[tokio::test]
    async fn test_user_gets_default_primary_group() {
        let client = MemoryClient::new(root());
        client
            .add(
                "cn=alice,dc=example,dc=com",
                vec![
                    ("objectClass".to_string(), vec!["user".into()]),
                    ("sAMAccountName".to_string(), vec!["alice".into()]),
                ],
            )
            .await
            .unwrap();
        let alice = client.entry("cn=alice,dc=example,dc=com").await.unwrap();
        assert_eq!(alice.attr("primaryGroupID"), Some("513"));
    }

    #[tokio::test]
    async fn test_primary_group_switch_strips_member() {
        let client = MemoryClient::new(root()).with_next_rid(4000);
        client
            .add(
                "cn=staff,dc=example,dc=com",
                vec![
                    ("objectClass".to_string(), vec!["group".into()]),
                    ("cn".to_string(), vec!["staff".into()]),
                ],
            )
            .await
            .unwrap();
        client
            .add(
                "cn=alice,dc=example,dc=com",
                vec![
                    ("objectClass".to_string(), vec!["user".into()]),
                    ("cn".to_string(), vec!["alice".into()]),
                ],
            )
            .await
            .unwrap();
        client
            .modify(
                "cn=staff,dc=example,dc=com",
                vec![Modification::Add(
                    "member".to_string(),
                    vec!["cn=alice,dc=example,dc=com".into()],
                )],
            )
            .await
            .unwrap();
        client
            .modify(
                "cn=alice,dc=example,dc=com",
                vec![Modification::Replace(
                    "primaryGroupID".to_string(),
                    vec!["4000".into()],
                )],
            )
            .await
            .unwrap();

        let staff = client.entry("cn=staff,dc=example,dc=com").await.unwrap();
        assert!(staff.attrs("member").is_empty());
    }

    #[tokio::test]
    async fn test_delete_refuses_non_leaf() {
        let client = MemoryClient::new(root());
        client
            .add(
                "ou=People,dc=example,dc=com",
                vec![("objectClass".to_string(), vec!["organizationalUnit".into()])],
            )
            .await
            .unwrap();
        client
            .add(
                "cn=alice,ou=People,dc=example,dc=com",
                vec![("objectClass".to_string(), vec!["user".into()])],
            )
            .await
            .unwrap();

        let err = client.delete("ou=People,dc=example,dc=com").await.unwrap_err();
        assert_eq!(err.result_code(), Some(66));

        client
            .delete("cn=alice,ou=People,dc=example,dc=com")
            .await
            .unwrap();
        client.delete("ou=People,dc=example,dc=com").await.unwrap();
    }

    #[tokio::test]
    async fn test_one_level_scope() {
        let client = MemoryClient::new(root());
        client
            .add(
                "ou=People,dc=example,dc=com",
                vec![("objectClass".to_string(), vec!["organizationalUnit".into()])],
            )
            .await
            .unwrap();
        client
            .add(
                "cn=alice,ou=People,dc=example,dc=com",
                vec![("objectClass".to_string(), vec!["user".into()])],
            )
            .await
            .unwrap();

        let one_level = client
            .search(
                "ou=People,dc=example,dc=com",
                Scope::OneLevel,
                &Filter::eq("objectClass", "user"),
                &["*"],
            )
            .await
            .unwrap();
        assert_eq!(one_level.len(), 1);

        // The base itself is excluded from one-level results.
        let none = client
            .search(
                "ou=People,dc=example,dc=com",
                Scope::OneLevel,
                &Filter::eq("objectClass", "organizationalUnit"),
                &["*"],
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_search_missing_base_is_empty() {
        let client = MemoryClient::new(root());
        let found = client
            .search(
                "ou=Nope,dc=example,dc=com",
                Scope::Subtree,
                &Filter::present("objectClass"),
                &["*"],
            )
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
