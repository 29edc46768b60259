//! HTTP header lists.
//!
//! Storage keeps insertion order so callers can inspect what they added.
//! Encoding and comparison use the canonical view: one entry per lower-cased
//! name, values joined with `,`, sorted by name.

use crate::WireError;
use std::collections::BTreeMap;

/// Case-insensitive header multimap
#[derive(Debug, Clone, Default)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    /// Create an empty header list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, keeping existing values for the same name
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// Replace every value for `name` with `value`
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref().to_ascii_lowercase();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.push((name, value.into()));
    }

    /// Remove every value for `name`, returning whether any existed
    pub fn remove(&mut self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let before = self.entries.len();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.len() != before
    }

    /// Combined value for `name`
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }

    /// Every value stored for `name`, in insertion order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether `name` has at least one value
    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.entries.iter().any(|(n, _)| *n == name)
    }

    /// Iterate `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no values are stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One comma-joined value per name, sorted by name
    pub fn canonical_fields(&self) -> BTreeMap<&str, String> {
        let mut fields: BTreeMap<&str, String> = BTreeMap::new();
        for (name, value) in &self.entries {
            fields
                .entry(name.as_str())
                .and_modify(|joined| {
                    joined.push(',');
                    joined.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }
        fields
    }

    /// Check every name and value can be written to a bundle
    pub fn validate(&self) -> Result<(), WireError> {
        for (name, value) in &self.entries {
            validate_name(name)?;
            validate_value(name, value)?;
        }
        Ok(())
    }
}

impl PartialEq for HeaderList {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_fields() == other.canonical_fields()
    }
}

impl Eq for HeaderList {}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderList::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Header names on the wire: non-empty lower-case token characters, no leading `:`.
pub fn validate_name(name: &str) -> Result<(), WireError> {
    let valid = !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_lowercase()
                || b.is_ascii_digit()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        });
    if valid {
        Ok(())
    } else {
        Err(WireError::HeaderName(name.to_string()))
    }
}

/// Header values must not contain CR, LF or NUL.
pub fn validate_value(name: &str, value: &str) -> Result<(), WireError> {
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(WireError::HeaderValue(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = HeaderList::new();
        headers.append("Content-Type", "text/html");
        assert_eq!(headers.get("content-type").as_deref(), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE").as_deref(), Some("text/html"));
        assert!(headers.contains("Content-type"));
        assert_eq!(headers.iter().next(), Some(("content-type", "text/html")));
    }

    #[test]
    fn test_multiple_values_join() {
        let headers: HeaderList = [("Accept", "a"), ("accept", "b"), ("x-other", "c")]
            .into_iter()
            .collect();
        assert_eq!(headers.get("accept").as_deref(), Some("a,b"));
        assert_eq!(headers.get_all("accept"), vec!["a", "b"]);

        let fields = headers.canonical_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["accept"], "a,b");
    }

    #[test]
    fn test_insert_and_remove() {
        let mut headers = HeaderList::new();
        headers.append("digest", "old");
        headers.append("digest", "older");
        headers.insert("Digest", "new");
        assert_eq!(headers.get_all("digest"), vec!["new"]);
        assert!(headers.remove("DIGEST"));
        assert!(!headers.remove("digest"));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_equality_uses_canonical_view() {
        let split: HeaderList = [("a", "1"), ("a", "2")].into_iter().collect();
        let joined: HeaderList = [("A", "1,2")].into_iter().collect();
        assert_eq!(split, joined);
    }

    #[test]
    fn test_validation() {
        assert!(validate_name("content-type").is_ok());
        assert!(validate_name(":status").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("Upper").is_err());
        assert!(validate_value("x", "fine value").is_ok());
        assert!(validate_value("x", "bad\r\nvalue").is_err());

        let mut headers = HeaderList::new();
        headers.append("x-test", "a\0b");
        assert!(matches!(headers.validate(), Err(WireError::HeaderValue(_))));
    }
}
