//! Directory schema constants and codecs.
//!
//! Attribute names and the handful of fiddly encodings the directory side
//! requires: the `unicodePwd` UTF-16LE quoting, the `userAccountControl`
//! bitmask, the `groupType` bitmask and binary SID decoding.

use crate::model::{GroupCategory, GroupScope, ModelError, ModelResult};

// Account attributes.
pub const ATTR_OBJECT_CLASS: &str = "objectClass";
pub const ATTR_CN: &str = "cn";
pub const ATTR_ACCOUNT_NAME: &str = "sAMAccountName";
pub const ATTR_DISPLAY_NAME: &str = "displayName";
pub const ATTR_GIVEN_NAME: &str = "givenName";
pub const ATTR_MIDDLE_NAME: &str = "middleName";
pub const ATTR_SURNAME: &str = "sn";
pub const ATTR_INITIALS: &str = "initials";
pub const ATTR_OBJECT_SID: &str = "objectSid";
pub const ATTR_ACCOUNT_CONTROL: &str = "userAccountControl";
pub const ATTR_PRIMARY_GROUP_ID: &str = "primaryGroupID";
pub const ATTR_SCRIPT_PATH: &str = "scriptPath";
pub const ATTR_PROFILE_PATH: &str = "profilePath";
pub const ATTR_HOME_DIRECTORY: &str = "homeDirectory";
pub const ATTR_HOME_DRIVE: &str = "homeDrive";
pub const ATTR_UNICODE_PWD: &str = "unicodePwd";
pub const ATTR_PWD_LAST_SET: &str = "pwdLastSet";

// Group attributes.
pub const ATTR_GROUP_TYPE: &str = "groupType";
pub const ATTR_MEMBER: &str = "member";

// POSIX (RFC 2307 / Services for UNIX) attributes.
pub const ATTR_UID_NUMBER: &str = "uidNumber";
pub const ATTR_GID_NUMBER: &str = "gidNumber";
pub const ATTR_LOGIN_SHELL: &str = "loginShell";
pub const ATTR_UNIX_HOME: &str = "unixHomeDirectory";
pub const ATTR_GECOS: &str = "gecos";
pub const ATTR_NIS_DOMAIN: &str = "msSFU30NisDomain";
pub const ATTR_UNIX_USER_PASSWORD: &str = "unixUserPassword";
pub const ATTR_GROUP_UNIX_PASSWORD: &str = "msSFU30Password";
pub const ATTR_MEMBER_UID: &str = "memberUid";
pub const ATTR_POSIX_MEMBER: &str = "msSFU30PosixMember";

// Shadow aging attributes, matching the seven /etc/shadow fields.
pub const ATTR_SHADOW_LAST_CHANGE: &str = "shadowLastChange";
pub const ATTR_SHADOW_MIN: &str = "shadowMin";
pub const ATTR_SHADOW_MAX: &str = "shadowMax";
pub const ATTR_SHADOW_WARNING: &str = "shadowWarning";
pub const ATTR_SHADOW_INACTIVE: &str = "shadowInactive";
pub const ATTR_SHADOW_EXPIRE: &str = "shadowExpire";
pub const ATTR_SHADOW_FLAG: &str = "shadowFlag";

/// userAccountControl: normal account.
pub const UAC_NORMAL_ACCOUNT: u32 = 0x200;
/// userAccountControl: account disabled.
pub const UAC_ACCOUNT_DISABLE: u32 = 0x2;

/// The well-known RID of the default primary group ("Domain Users").
pub const DOMAIN_USERS_RID: u32 = 513;

const GT_GLOBAL: i32 = 0x0002;
const GT_DOMAIN_LOCAL: i32 = 0x0004;
const GT_UNIVERSAL: i32 = 0x0008;
// Security-enabled bit, 0x80000000.
const GT_SECURITY: i32 = i32::MIN;

/// Compute the `userAccountControl` value for an account.
#[must_use]
pub fn account_control(disabled: bool) -> u32 {
    let mut uac = UAC_NORMAL_ACCOUNT;
    if disabled {
        uac |= UAC_ACCOUNT_DISABLE;
    }
    uac
}

/// Whether a `userAccountControl` value has the disabled bit set.
#[must_use]
pub fn is_disabled(uac: u32) -> bool {
    uac & UAC_ACCOUNT_DISABLE != 0
}

/// Encode the `groupType` bitmask for a scope/category combination.
#[must_use]
pub fn group_type_mask(scope: GroupScope, category: GroupCategory) -> i32 {
    let base = match scope {
        GroupScope::DomainLocal => GT_DOMAIN_LOCAL,
        GroupScope::Global => GT_GLOBAL,
        GroupScope::Universal => GT_UNIVERSAL,
    };
    match category {
        GroupCategory::Security => base | GT_SECURITY,
        GroupCategory::Distribution => base,
    }
}

/// Decode a `groupType` bitmask into scope and category.
///
/// Returns `None` for masks that name no scope or more than one.
#[must_use]
pub fn parse_group_type(mask: i32) -> Option<(GroupScope, GroupCategory)> {
    let scope = match mask & (GT_GLOBAL | GT_DOMAIN_LOCAL | GT_UNIVERSAL) {
        GT_GLOBAL => GroupScope::Global,
        GT_DOMAIN_LOCAL => GroupScope::DomainLocal,
        GT_UNIVERSAL => GroupScope::Universal,
        _ => return None,
    };
    let category = if mask & GT_SECURITY != 0 {
        GroupCategory::Security
    } else {
        GroupCategory::Distribution
    };
    Some((scope, category))
}

/// Decode the trailing relative identifier from a binary SID.
///
/// SID layout (MS-DTYP 2.4.2): one revision byte, one sub-authority count
/// byte, a 48-bit big-endian authority, then `count` little-endian 32-bit
/// sub-authorities. The RID is the last sub-authority.
#[must_use]
pub fn rid_from_sid(sid: &[u8]) -> Option<u32> {
    if sid.len() < 8 {
        return None;
    }
    let count = sid[1] as usize;
    if count == 0 || sid.len() != 8 + 4 * count {
        return None;
    }
    let tail: [u8; 4] = sid[sid.len() - 4..].try_into().ok()?;
    Some(u32::from_le_bytes(tail))
}

/// Encode a plaintext password for the `unicodePwd` attribute.
///
/// The directory requires the password surrounded with double quotes and
/// encoded as UTF-16LE; anything else is rejected by the server.
pub fn encode_password(password: &str) -> ModelResult<Vec<u8>> {
    if password.is_empty() {
        return Err(ModelError::EmptyPassword);
    }
    let quoted = format!("\"{password}\"");
    Ok(quoted.encode_utf16().flat_map(u16::to_le_bytes).collect())
}

/// Escape special characters in a DN attribute value per RFC 4514.
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            '"' | '+' | ',' | ';' | '<' | '>' | '\\' | '=' => {
                result.push('\\');
                result.push(c);
            }
            '#' if i == 0 => {
                result.push('\\');
                result.push(c);
            }
            ' ' if i == 0 || i == value.len() - 1 => {
                result.push('\\');
                result.push(c);
            }
            _ => result.push(c),
        }
    }
    result
}

/// Generate a random initial password.
///
/// One character from each complexity category is guaranteed so the value
/// passes the usual directory password policy.
#[must_use]
pub fn random_password(len: usize) -> String {
    use rand::seq::SliceRandom;
    use rand::Rng;

    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const LOWER: &[u8] = b"abcdefghjkmnpqrstuvwxyz";
    const DIGIT: &[u8] = b"23456789";
    const SYMBOL: &[u8] = b"!#$%+-=?";
    const ALL: &[&[u8]] = &[UPPER, LOWER, DIGIT, SYMBOL];

    let len = len.max(8);
    let mut rng = rand::thread_rng();
    let mut chars: Vec<u8> = ALL
        .iter()
        .map(|set| set[rng.gen_range(0..set.len())])
        .collect();
    while chars.len() < len {
        let set = ALL[rng.gen_range(0..ALL.len())];
        chars.push(set[rng.gen_range(0..set.len())]);
    }
    chars.shuffle(&mut rng);
    String::from_utf8(chars).expect("generated from ASCII sets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_control() {
        assert_eq!(account_control(false), 0x200);
        assert_eq!(account_control(true), 0x202);
        assert!(!is_disabled(0x200));
        assert!(is_disabled(0x202));
    }

    #[test]
    fn test_group_type_round_trip() {
        let combos = [
            (GroupScope::DomainLocal, GroupCategory::Security),
            (GroupScope::DomainLocal, GroupCategory::Distribution),
            (GroupScope::Global, GroupCategory::Security),
            (GroupScope::Global, GroupCategory::Distribution),
            (GroupScope::Universal, GroupCategory::Security),
            (GroupScope::Universal, GroupCategory::Distribution),
        ];
        for (scope, category) in combos {
            let mask = group_type_mask(scope, category);
            assert_eq!(parse_group_type(mask), Some((scope, category)));
        }
    }

    #[test]
    fn test_group_type_known_values() {
        // Global security is the directory default, -2147483646.
        assert_eq!(
            group_type_mask(GroupScope::Global, GroupCategory::Security),
            -2147483646
        );
        assert_eq!(
            group_type_mask(GroupScope::DomainLocal, GroupCategory::Distribution),
            4
        );
    }

    #[test]
    fn test_parse_group_type_rejects_garbage() {
        assert_eq!(parse_group_type(0), None);
        assert_eq!(parse_group_type(0x2 | 0x4), None);
    }

    #[test]
    fn test_rid_from_sid() {
        // S-1-5-21-x-y-z-1105
        let mut sid = vec![1u8, 5, 0, 0, 0, 0, 0, 5];
        for sub in [21u32, 1111, 2222, 3333, 1105] {
            sid.extend_from_slice(&sub.to_le_bytes());
        }
        assert_eq!(rid_from_sid(&sid), Some(1105));
    }

    #[test]
    fn test_rid_from_sid_rejects_malformed() {
        assert_eq!(rid_from_sid(&[]), None);
        assert_eq!(rid_from_sid(&[1, 0, 0, 0, 0, 0, 0, 5]), None);
        // Count byte says 2 sub-authorities but only one present.
        let mut sid = vec![1u8, 2, 0, 0, 0, 0, 0, 5];
        sid.extend_from_slice(&21u32.to_le_bytes());
        assert_eq!(rid_from_sid(&sid), None);
    }

    #[test]
    fn test_encode_password() {
        let encoded = encode_password("Secret1!").unwrap();
        let expected: Vec<u8> = "\"Secret1!\""
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(encoded, expected);
        // Starts and ends with UTF-16LE '"'.
        assert_eq!(&encoded[..2], &[0x22, 0x00]);
        assert_eq!(&encoded[encoded.len() - 2..], &[0x22, 0x00]);
    }

    #[test]
    fn test_encode_password_rejects_empty() {
        assert!(encode_password("").is_err());
    }

    #[test]
    fn test_escape_dn_value() {
        assert_eq!(escape_dn_value("John Doe"), "John Doe");
        assert_eq!(escape_dn_value("Doe, John"), "Doe\\, John");
        assert_eq!(escape_dn_value("#tag"), "\\#tag");
        assert_eq!(escape_dn_value(" padded "), "\\ padded\\ ");
        assert_eq!(escape_dn_value("a=b"), "a\\=b");
    }

    #[test]
    fn test_random_password_shape() {
        let pw = random_password(16);
        assert_eq!(pw.len(), 16);
        assert!(pw.bytes().any(|b| b.is_ascii_uppercase()));
        assert!(pw.bytes().any(|b| b.is_ascii_lowercase()));
        assert!(pw.bytes().any(|b| b.is_ascii_digit()));
        assert!(pw.bytes().any(|b| !b.is_ascii_alphanumeric()));
        assert_ne!(random_password(16), random_password(16));
    }
}
