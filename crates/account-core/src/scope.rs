//! An unordered set of opaque capability strings, canonically encoded as a
//! space-delimited string.

use std::collections::BTreeSet;
use std::fmt;

/// An unordered, deduplicated set of non-empty scope strings.
///
/// Encodes to a single space-delimited string with scopes in sorted order,
/// so that two sets containing the same scopes always produce the same
/// encoding regardless of insertion order. The empty set encodes to `""`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a `ScopeSet` from an iterator of scope strings. Empty strings
    /// are dropped rather than rejected, matching the original's lenient
    /// intake at the network-response boundary.
    pub fn from_iter<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            scopes
                .into_iter()
                .map(Into::into)
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Parse a space-delimited encoded scope string back into a set.
    #[must_use]
    pub fn from_encoded(encoded: &str) -> Self {
        Self::from_iter(encoded.split(' '))
    }

    #[must_use]
    pub fn single(scope: impl Into<String>) -> Self {
        Self::from_iter([scope.into()])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn insert(&mut self, scope: impl Into<String>) {
        let scope = scope.into();
        if !scope.is_empty() {
            self.0.insert(scope);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Canonical space-delimited encoding, e.g. `"mail.read mail.send"`.
    #[must_use]
    pub fn encode(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromIterator<String> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        ScopeSet::from_iter(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_order_independent() {
        let a = ScopeSet::from_iter(["b", "a", "c"]);
        let b = ScopeSet::from_iter(["c", "b", "a"]);
        assert_eq!(a.encode(), b.encode());
        assert_eq!(a.encode(), "a b c");
    }

    #[test]
    fn empty_set_encodes_empty() {
        assert_eq!(ScopeSet::new().encode(), "");
    }

    #[test]
    fn round_trip() {
        let s = ScopeSet::from_iter(["mail.read", "mail.send"]);
        assert_eq!(ScopeSet::from_encoded(&s.encode()), s);
    }

    #[test]
    fn drops_empty_scope_strings() {
        let s = ScopeSet::from_iter(["a", "", "b"]);
        assert_eq!(s.len(), 2);
    }
}
