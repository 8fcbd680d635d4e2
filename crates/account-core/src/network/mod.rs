//! `NetworkRequest` + concrete kinds, and the `NetworkRequestManager` that
//! dispatches, retries, and dedups them.

mod manager;
mod request;

pub use manager::{NetworkRequestManager, RequestConsumer, UrlTypeConfig};
pub use request::{
    AccessTokenError, AccessTokenGrant, AccessTokenOutcome, AccessTokenRequest, AccessTokenSuccess,
    LoadFlags, MigrationTokenRequest, NetworkRequest, NetworkResponseStatus,
    OAuth1RenewOutcome, OAuth1RenewTokenError, OAuth1RenewTokenRequest, OAuth1RenewTokenSuccess,
    RevokeTokenError, RevokeTokenOutcome, RevokeTokenRequest, TokenTypeHint, UrlType,
};
