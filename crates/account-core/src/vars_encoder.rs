//! `RequestVarsEncoder`: a sorted map of request variables that can be
//! serialized either as a `application/x-www-form-urlencoded` body or as a
//! URL query string.
//!
//! The two escape modes differ only in how a literal space is represented
//! (`+` in form bodies, `%20` in query strings); everything else uses
//! percent-encoding via `url::form_urlencoded`.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use url::form_urlencoded;

/// Everything `NON_ALPHANUMERIC` encodes, except the handful of characters
/// RFC 3986 allows unescaped in a query component.
const QUERY_ASCII_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A map of request variables, keyed and iterated in sorted order.
#[derive(Debug, Clone, Default)]
pub struct RequestVarsEncoder {
    vars: BTreeMap<String, String>,
}

impl RequestVarsEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Add a field only if `value` is `Some`.
    pub fn set_opt(
        &mut self,
        name: impl Into<String>,
        value: Option<impl Into<String>>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.set(name, value);
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode as an `application/x-www-form-urlencoded` body, fields in
    /// alphabetical key order.
    #[must_use]
    pub fn encode_form_body(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.vars {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }

    /// Encode as a URL query string (no leading `?`), fields in alphabetical
    /// key order: space becomes `%20`, not `+` — unlike
    /// [`Self::encode_form_body`].
    #[must_use]
    pub fn encode_query_string(&self) -> String {
        self.vars
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn percent_encode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, QUERY_ASCII_SET).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_sorted_alphabetically_by_key() {
        let mut enc = RequestVarsEncoder::new();
        enc.set("scope", "ALL")
            .set("grant_type", "auth_token")
            .set("client_id", "cid")
            .set("auth_token", "mock-auth-token");
        let pairs: Vec<_> = enc.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("auth_token", "mock-auth-token"),
                ("client_id", "cid"),
                ("grant_type", "auth_token"),
                ("scope", "ALL"),
            ]
        );
    }

    #[test]
    fn re_setting_a_key_updates_value_in_place() {
        let mut enc = RequestVarsEncoder::new();
        enc.set("a", "1").set("b", "2").set("a", "3");
        let pairs: Vec<_> = enc.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn form_body_escapes_space_as_plus() {
        let mut enc = RequestVarsEncoder::new();
        enc.set("scope", "a b");
        assert_eq!(enc.encode_form_body(), "scope=a+b");
    }

    #[test]
    fn query_string_escapes_space_as_percent20() {
        let mut enc = RequestVarsEncoder::new();
        enc.set("q", "a b");
        assert_eq!(enc.encode_query_string(), "q=a%20b");
    }

    #[test]
    fn set_opt_skips_none() {
        let mut enc = RequestVarsEncoder::new();
        enc.set_opt("device_name", None::<String>);
        assert!(enc.is_empty());
        enc.set_opt("device_name", Some("laptop"));
        assert_eq!(enc.get("device_name"), Some("laptop"));
    }

    #[test]
    fn form_body_is_alphabetical() {
        let mut enc = RequestVarsEncoder::new();
        enc.set("grant_type", "auth_token")
            .set("client_id", "cid")
            .set("scope", "ALL")
            .set("auth_token", "mock-auth-token");
        assert_eq!(
            enc.encode_form_body(),
            "auth_token=mock-auth-token&client_id=cid&grant_type=auth_token&scope=ALL"
        );
    }
}
