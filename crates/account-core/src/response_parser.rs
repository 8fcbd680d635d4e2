//! `ResponseParser`: a typed-field extractor for JSON response bodies, with
//! required/optional and strict/soft modes.

use serde_json::Value;

use crate::error::{Error, Result};

/// Wraps a parsed JSON object and extracts typed fields from it, tracking
/// which fields were requested so callers can distinguish "absent" from
/// "present but wrong type".
pub struct ResponseParser {
    value: Value,
}

impl ResponseParser {
    /// Parse a response body as a JSON object.
    ///
    /// # Errors
    /// Returns [`Error::ParseError`] if the body is not valid JSON or not a
    /// JSON object.
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| Error::ParseError(e.to_string()))?;
        if !value.is_object() {
            return Err(Error::ParseError(
                "expected a JSON object at the response root".to_string(),
            ));
        }
        Ok(Self { value })
    }

    /// Extract a required string field. Errors if absent or not a string.
    ///
    /// # Errors
    /// Returns [`Error::ParseError`] if the field is missing or not a string.
    pub fn require_string(&self, field: &str) -> Result<String> {
        self.value
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::ParseError(format!("missing required field `{field}`")))
    }

    /// Extract an optional string field. Returns `Ok(None)` if the field is
    /// absent; errors only if present with the wrong type ("strict" mode).
    ///
    /// # Errors
    /// Returns [`Error::ParseError`] if the field is present but not a string.
    pub fn optional_string(&self, field: &str) -> Result<Option<String>> {
        match self.value.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(Error::ParseError(format!(
                "field `{field}` is present but not a string"
            ))),
        }
    }

    /// Like [`Self::optional_string`], but a wrong-typed field is treated as
    /// absent rather than an error ("soft" mode) — used for fields the
    /// original parser is lenient about.
    #[must_use]
    pub fn optional_string_soft(&self, field: &str) -> Option<String> {
        self.value.get(field).and_then(Value::as_str).map(str::to_string)
    }

    /// Extract a required positive `i64` field.
    ///
    /// # Errors
    /// Returns [`Error::ParseError`] if the field is missing, not an
    /// integer, or not strictly positive.
    pub fn require_positive_i64(&self, field: &str) -> Result<i64> {
        let n = self
            .value
            .get(field)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::ParseError(format!("missing required field `{field}`")))?;
        if n <= 0 {
            return Err(Error::ParseError(format!(
                "field `{field}` must be positive, got {n}"
            )));
        }
        Ok(n)
    }

    /// Extract an optional `i64` field.
    ///
    /// # Errors
    /// Returns [`Error::ParseError`] if the field is present but not an integer.
    pub fn optional_i64(&self, field: &str) -> Result<Option<i64>> {
        match self.value.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::ParseError(format!("field `{field}` is not an integer"))),
        }
    }

    /// Check a required string field matches one expected literal value.
    ///
    /// # Errors
    /// Returns [`Error::ParseError`] if the field is missing or does not
    /// equal `expected`.
    pub fn require_literal(&self, field: &str, expected: &str) -> Result<()> {
        let got = self.require_string(field)?;
        if got != expected {
            return Err(Error::ParseError(format!(
                "field `{field}` expected `{expected}`, got `{got}`"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_missing_errors() {
        let p = ResponseParser::parse("{}").unwrap();
        assert!(p.require_string("access_token").is_err());
    }

    #[test]
    fn optional_absent_is_none() {
        let p = ResponseParser::parse(r#"{"a":"1"}"#).unwrap();
        assert_eq!(p.optional_string("b").unwrap(), None);
    }

    #[test]
    fn optional_wrong_type_errors_strict() {
        let p = ResponseParser::parse(r#"{"a":5}"#).unwrap();
        assert!(p.optional_string("a").is_err());
        assert_eq!(p.optional_string_soft("a"), None);
    }

    #[test]
    fn non_object_root_errors() {
        assert!(ResponseParser::parse("[1,2,3]").is_err());
        assert!(ResponseParser::parse("not json").is_err());
    }

    #[test]
    fn positive_i64_rejects_zero_and_negative() {
        let p = ResponseParser::parse(r#"{"expires_in":0}"#).unwrap();
        assert!(p.require_positive_i64("expires_in").is_err());
        let p = ResponseParser::parse(r#"{"expires_in":-1}"#).unwrap();
        assert!(p.require_positive_i64("expires_in").is_err());
        let p = ResponseParser::parse(r#"{"expires_in":10}"#).unwrap();
        assert_eq!(p.require_positive_i64("expires_in").unwrap(), 10);
    }
}
