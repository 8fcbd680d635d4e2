use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by this crate.
///
/// Internally-recoverable failures (a throttled retry, a malformed response
/// that is simply retried with backoff) never reach this type — they are
/// logged and retried by [`crate::network::NetworkRequestManager`]. Only
/// terminal conditions are surfaced here.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("token cannot be used as a header value: must be ASCII")]
    InvalidHeaderValue,

    #[error("request to identity provider failed: {0}")]
    RequestFailed(String),

    #[error("failed to parse identity provider response: {0}")]
    ParseError(String),

    #[error("connection to {0} was blocked: insecure scheme not allowed for this endpoint")]
    InsecureConnectionForbidden(String),

    #[error("server credentials were rejected: {0}")]
    InvalidCredentials(AuthErrorCode),

    #[error("identity provider returned an unexpected response: {0}")]
    ServiceError(String),

    #[error("client `{0}` is not registered with the auth service")]
    UnregisteredClient(String),

    #[error("a request with scopes {0:?} is already in flight for this client")]
    RequestAlreadyInFlight(String),

    #[error("scope set for an access token request must contain exactly one scope, found {0}")]
    InvalidScopeCardinality(usize),

    #[error("underlying transport error: {0}")]
    Transport(#[from] Arc<reqwest::Error>),

    #[error("persisted state failed its invariant and was discarded: {0}")]
    InvariantViolation(String),
}

/// The OAuth2 error codes this crate's token endpoint can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidScope,
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthErrorCode::InvalidRequest => "invalid_request",
            AuthErrorCode::InvalidClient => "invalid_client",
            AuthErrorCode::InvalidGrant => "invalid_grant",
            AuthErrorCode::InvalidScope => "invalid_scope",
        };
        f.write_str(s)
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Transport(Arc::new(value))
    }
}
