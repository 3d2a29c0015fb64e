//! Directory entries and modify operations.
//!
//! An [`Entry`] is the unit a search returns: a distinguished name plus
//! multi-valued attributes. Attribute names are matched case-insensitively
//! throughout (RFC 4512); some attributes are optionally absent and must be
//! probed, never indexed.

use std::collections::HashMap;

/// A single attribute value, text or binary.
///
/// Binary values matter in two places: `objectSid` comes back as a binary
/// blob, and `unicodePwd` must be written as UTF-16LE bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl AttrValue {
    /// Get as text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Bytes(_) => None,
        }
    }

    /// Get as bytes if this is a binary value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AttrValue::Bytes(b) => Some(b),
            AttrValue::Text(_) => None,
        }
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(bytes: Vec<u8>) -> Self {
        AttrValue::Bytes(bytes)
    }
}

impl From<u32> for AttrValue {
    fn from(n: u32) -> Self {
        AttrValue::Text(n.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Text(n.to_string())
    }
}

/// One attribute change in a modify operation.
#[derive(Debug, Clone)]
pub enum Modification {
    /// Replace all values of the attribute.
    Replace(String, Vec<AttrValue>),
    /// Add values to a multi-valued attribute.
    Add(String, Vec<AttrValue>),
    /// Delete specific values, or all values when the list is empty.
    Delete(String, Vec<AttrValue>),
}

impl Modification {
    /// The attribute this modification targets.
    pub fn attribute(&self) -> &str {
        match self {
            Modification::Replace(name, _)
            | Modification::Add(name, _)
            | Modification::Delete(name, _) => name,
        }
    }
}

/// An entry returned by a directory search.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    /// Distinguished name.
    pub dn: String,
    /// Text attributes, multi-valued.
    pub attrs: HashMap<String, Vec<String>>,
    /// Binary attributes, multi-valued.
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    /// Create an empty entry with the given DN.
    pub fn new(dn: impl Into<String>) -> Self {
        Entry {
            dn: dn.into(),
            attrs: HashMap::new(),
            bin_attrs: HashMap::new(),
        }
    }

    /// Set a text attribute, replacing existing values.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.attrs.insert(name.into(), values);
    }

    /// Builder-style single-valued text attribute.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), vec![value.into()]);
        self
    }

    /// Builder-style multi-valued text attribute.
    #[must_use]
    pub fn with_values(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.attrs.insert(name.into(), values);
        self
    }

    /// Builder-style binary attribute.
    #[must_use]
    pub fn with_binary(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.bin_attrs.insert(name.into(), vec![value]);
        self
    }

    /// First value of a text attribute, case-insensitive on the name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attr_values(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values of a text attribute, case-insensitive on the name.
    pub fn attrs(&self, name: &str) -> &[String] {
        self.attr_values(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of a binary attribute, case-insensitive on the name.
    ///
    /// Falls back to the text map since some transports deliver every
    /// attribute as text.
    pub fn bin_attr(&self, name: &str) -> Option<&[u8]> {
        for (key, values) in &self.bin_attrs {
            if key.eq_ignore_ascii_case(name) {
                return values.first().map(Vec::as_slice);
            }
        }
        self.attr(name).map(str::as_bytes)
    }

    /// Whether the attribute is present with at least one value.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attr_values(name).map(|v| !v.is_empty()).unwrap_or(false)
            || self
                .bin_attrs
                .keys()
                .any(|k| k.eq_ignore_ascii_case(name))
    }

    /// First value parsed as u32.
    pub fn attr_u32(&self, name: &str) -> Option<u32> {
        self.attr(name).and_then(|v| v.parse().ok())
    }

    /// First value parsed as i64.
    pub fn attr_i64(&self, name: &str) -> Option<i64> {
        self.attr(name).and_then(|v| v.parse().ok())
    }

    fn attr_values(&self, name: &str) -> Option<&Vec<String>> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let entry = Entry::new("cn=staff,ou=People,dc=example,dc=com")
            .with("sAMAccountName", "staff")
            .with("gidNumber", "2000");

        assert_eq!(entry.attr("samaccountname"), Some("staff"));
        assert_eq!(entry.attr("SAMACCOUNTNAME"), Some("staff"));
        assert_eq!(entry.attr_u32("gidnumber"), Some(2000));
        assert!(entry.has_attr("GidNumber"));
        assert!(!entry.has_attr("uidNumber"));
    }

    #[test]
    fn test_multi_valued() {
        let entry = Entry::new("cn=staff,dc=example,dc=com").with_values(
            "member",
            vec![
                "cn=alice,cn=Users,dc=example,dc=com".to_string(),
                "cn=bob,cn=Users,dc=example,dc=com".to_string(),
            ],
        );
        assert_eq!(entry.attrs("member").len(), 2);
        assert_eq!(entry.attr("member"), Some("cn=alice,cn=Users,dc=example,dc=com"));
        assert!(entry.attrs("absent").is_empty());
    }

    #[test]
    fn test_binary_attr() {
        let sid = vec![1u8, 1, 0, 0, 0, 0, 0, 5, 0x20, 0x00, 0x00, 0x00];
        let entry = Entry::new("cn=g,dc=example,dc=com").with_binary("objectSid", sid.clone());
        assert_eq!(entry.bin_attr("objectsid"), Some(sid.as_slice()));
        assert!(entry.has_attr("objectSid"));
    }

    #[test]
    fn test_attr_value_conversions() {
        assert_eq!(AttrValue::from("x").as_text(), Some("x"));
        assert_eq!(AttrValue::from(513u32).as_text(), Some("513"));
        let bytes = AttrValue::from(vec![0u8, 1]);
        assert_eq!(bytes.as_bytes(), Some(&[0u8, 1][..]));
        assert_eq!(bytes.as_text(), None);
    }
}
