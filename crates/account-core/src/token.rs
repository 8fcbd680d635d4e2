//! `AuthToken`: an immutable, short-lived bearer credential.

use chrono::{DateTime, Utc};

use crate::scope::ScopeSet;

/// An immutable access token tuple.
///
/// Two tokens are equal iff all four fields match. `secret` is redacted in
/// `Debug` output so tokens never leak into logs.
#[derive(Clone, PartialEq, Eq, veil::Redact, serde::Serialize, serde::Deserialize)]
pub struct AuthToken {
    client_name: String,
    #[redact]
    secret: String,
    scopes: ScopeSet,
    expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Build a new token. Returns `None` if any field fails its non-empty
    /// invariant.
    #[must_use]
    pub fn new(
        client_name: impl Into<String>,
        secret: impl Into<String>,
        scopes: ScopeSet,
        expires_at: DateTime<Utc>,
    ) -> Option<Self> {
        let client_name = client_name.into();
        let secret = secret.into();
        let token = Self {
            client_name,
            secret,
            scopes,
            expires_at,
        };
        token.is_valid().then_some(token)
    }

    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    #[must_use]
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `Valid` iff client name, secret and scopes are non-empty.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.client_name.is_empty() && !self.secret.is_empty() && !self.scopes.is_empty()
    }

    /// `Expired` iff `expires_at < now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The cache fingerprint for this token: `(client_name, scopes.encoded)`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key(&self.client_name, &self.scopes)
    }
}

/// `(client_name, scopes.encoded)` concatenated into a stable fingerprint
///.
#[must_use]
pub fn cache_key(client_name: &str, scopes: &ScopeSet) -> String {
    format!("{client_name}\u{1f}{}", scopes.encode())
}
