//! Containers.
//!
//! A container is a namespace node (an `ou=` organizational unit or `cn=`
//! container path) holding users and groups. Containers form a logically
//! flat set: nesting exists only in the path syntax of the name, never as
//! parent/child object references. The reconciler materializes missing
//! intermediate path segments remotely.

use std::collections::BTreeSet;

use crate::model::error::{ModelError, ModelResult};
use crate::model::keys::{GroupKey, UserKey};
use crate::model::types::EntityState;

/// One path component of a container name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment {
    OrganizationalUnit,
    Container,
}

/// A namespace node owning users and groups.
#[derive(Debug, Clone)]
pub struct Container {
    pub(crate) name: String,
    pub(crate) users: BTreeSet<UserKey>,
    pub(crate) groups: BTreeSet<GroupKey>,
    pub(crate) state: EntityState,
}

impl Container {
    pub(crate) fn new(name: String) -> Self {
        Container {
            name,
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
            state: EntityState::Active,
        }
    }

    /// The normalized container name, e.g. `ou=People` or
    /// `ou=Payroll,ou=Staff`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle state.
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Keys of the users owned by this container.
    pub fn users(&self) -> impl Iterator<Item = UserKey> + '_ {
        self.users.iter().copied()
    }

    /// Keys of the groups owned by this container.
    pub fn groups(&self) -> impl Iterator<Item = GroupKey> + '_ {
        self.groups.iter().copied()
    }

    /// Path components leaf-first, with their segment kinds.
    pub fn segments(&self) -> ModelResult<Vec<(PathSegment, &str)>> {
        self.name.split(',').map(segment_kind).collect()
    }
}

/// Normalize a container name: components trimmed of surrounding
/// whitespace, whitespace around the `=` separator stripped.
pub(crate) fn normalize_name(name: &str) -> String {
    name.split(',')
        .map(|component| {
            let component = component.trim();
            match component.split_once('=') {
                Some((prefix, value)) => format!("{}={}", prefix.trim(), value.trim()),
                None => component.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Validate a normalized container name.
///
/// Every component must be `ou=<value>` or `cn=<value>`, and an OU
/// component may not be nested under a CN component (CN nodes cannot
/// structurally contain OU nodes; the reverse is legal).
pub(crate) fn validate_name(name: &str) -> ModelResult<()> {
    if name.is_empty() {
        return Err(ModelError::InvalidContainerName {
            name: name.to_string(),
            reason: "name is empty".to_string(),
        });
    }

    let mut seen_cn_toward_root = false;
    // Walk root-to-leaf so CN-containment is visible when we reach an OU.
    for component in name.split(',').rev() {
        match segment_kind(component)? {
            (PathSegment::Container, _) => seen_cn_toward_root = true,
            (PathSegment::OrganizationalUnit, _) => {
                if seen_cn_toward_root {
                    return Err(ModelError::InvalidContainerName {
                        name: name.to_string(),
                        reason: format!(
                            "organizational unit {component:?} cannot be nested under a cn container"
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

fn segment_kind(component: &str) -> ModelResult<(PathSegment, &str)> {
    let err = |reason: &str| ModelError::InvalidContainerName {
        name: component.to_string(),
        reason: reason.to_string(),
    };
    let (prefix, value) = component
        .split_once('=')
        .ok_or_else(|| err("missing ou= or cn= prefix"))?;
    if value.is_empty() {
        return Err(err("empty component value"));
    }
    if prefix.eq_ignore_ascii_case("ou") {
        Ok((PathSegment::OrganizationalUnit, value))
    } else if prefix.eq_ignore_ascii_case("cn") {
        Ok((PathSegment::Container, value))
    } else {
        Err(err("unknown path segment prefix"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("ou=People"), "ou=People");
        assert_eq!(normalize_name(" ou = People , ou = Staff "), "ou=People,ou=Staff");
        assert_eq!(normalize_name("cn=Users"), "cn=Users");
    }

    #[test]
    fn test_validate_accepts_cn_under_ou() {
        assert!(validate_name("cn=Service,ou=People").is_ok());
        assert!(validate_name("ou=Payroll,ou=Staff").is_ok());
        assert!(validate_name("cn=Users").is_ok());
    }

    #[test]
    fn test_validate_rejects_ou_under_cn() {
        let err = validate_name("ou=Hidden,cn=Users").unwrap_err();
        assert!(matches!(err, ModelError::InvalidContainerName { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        assert!(validate_name("dc=example").is_err());
        assert!(validate_name("People").is_err());
        assert!(validate_name("ou=").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_segments() {
        let container = Container::new("cn=Service,ou=People".to_string());
        let segments = container.segments().unwrap();
        assert_eq!(segments[0], (PathSegment::Container, "Service"));
        assert_eq!(segments[1], (PathSegment::OrganizationalUnit, "People"));
    }
}
