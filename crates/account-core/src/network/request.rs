//! `NetworkRequest` capability trait and its four concrete kinds.

use std::any::Any;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::AuthErrorCode;
use crate::response_parser::ResponseParser;
use crate::scope::ScopeSet;
use crate::traits::CryptoOps;
use crate::vars_encoder::RequestVarsEncoder;

/// Which base URL + insecure-scheme policy a request resolves against
/// (`NetworkRequestManager`'s `url_type → (base_url, allow_insecure)` map).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlType {
    OAuth2,
    OAuth1,
}

/// Load flags every request variant sets: cache disabled, cookies off.
#[derive(Debug, Clone, Copy)]
pub struct LoadFlags {
    pub disable_cache: bool,
    pub no_cookies: bool,
}

impl LoadFlags {
    #[must_use]
    pub fn standard() -> Self {
        Self {
            disable_cache: true,
            no_cookies: true,
        }
    }
}

/// What `NetworkRequest::try_response` concludes from a completed HTTP
/// exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkResponseStatus {
    Ok,
    HttpProblem,
    ParseProblem,
    Throttled,
    InsecureConnectionForbidden,
}

/// The capability set `NetworkRequestManager` consumes: everything it needs
/// to build a request and interpret its response, without knowing which
/// concrete kind it's holding.
pub trait NetworkRequest: Send + Sync + std::fmt::Debug {
    fn path(&self) -> String;
    fn method(&self) -> http::Method;
    fn content_type(&self) -> Option<&'static str>;
    fn body(&self) -> String;
    fn query_string(&self) -> String;
    fn extra_headers(&self) -> Vec<(http::HeaderName, http::HeaderValue)> {
        Vec::new()
    }
    fn load_flags(&self) -> LoadFlags {
        LoadFlags::standard()
    }
    fn manager_url_type(&self) -> UrlType;

    /// Interpret a completed HTTP response. Parsed results (if any) are
    /// stashed on `self` via interior mutability for the caller to retrieve
    /// afterward through the concrete type's own accessors.
    fn try_response(&self, status: u16, body: &str) -> NetworkResponseStatus;

    /// Downcast hook so a consumer holding `&dyn NetworkRequest` can recover
    /// the concrete type and read its parsed result.
    fn as_any(&self) -> &dyn Any;
}

fn query_with_sid(session_id: Option<&str>) -> RequestVarsEncoder {
    let mut q = RequestVarsEncoder::new();
    if let Some(sid) = session_id {
        if !sid.is_empty() {
            q.set("sid", sid);
        }
    }
    q
}

// ---------------------------------------------------------------------
// AccessTokenRequest
// ---------------------------------------------------------------------

/// The grant used by an [`AccessTokenRequest`].
#[derive(Debug, Clone)]
pub enum AccessTokenGrant {
    AuthToken(String),
    RefreshToken(String),
}

/// A successfully-parsed `/oauth2/v1/token/` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenSuccess {
    pub access_token: String,
    pub granted_scopes: Option<ScopeSet>,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
}

/// A server-rejected `/oauth2/v1/token/` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenError {
    pub code: AuthErrorCode,
    pub description: Option<String>,
}

pub type AccessTokenOutcome = Result<AccessTokenSuccess, AccessTokenError>;

/// `POST /oauth2/v1/token/`. Built via [`Self::with_auth_token_grant`]
/// or [`Self::with_refresh_token_grant`].
#[derive(Debug)]
pub struct AccessTokenRequest {
    client_id: String,
    grant: AccessTokenGrant,
    scopes: ScopeSet,
    session_id: Option<String>,
    device_name_sent: Option<String>,
    result: Mutex<Option<AccessTokenOutcome>>,
}

impl AccessTokenRequest {
    #[must_use]
    pub fn with_auth_token_grant(
        client_id: impl Into<String>,
        auth_token: impl Into<String>,
        scopes: ScopeSet,
        session_id: Option<String>,
        device_name: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            grant: AccessTokenGrant::AuthToken(auth_token.into()),
            scopes,
            session_id,
            device_name_sent: device_name,
            result: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_refresh_token_grant(
        client_id: impl Into<String>,
        refresh_token: impl Into<String>,
        scopes: ScopeSet,
        session_id: Option<String>,
        device_name: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            grant: AccessTokenGrant::RefreshToken(refresh_token.into()),
            scopes,
            session_id,
            device_name_sent: device_name,
            result: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_auth_token_grant(&self) -> bool {
        matches!(self.grant, AccessTokenGrant::AuthToken(_))
    }

    /// The device name that was sent with this request, if any — callers
    /// use this to decide whether to call `DeviceNameService::store` on
    /// success.
    #[must_use]
    pub fn device_name_sent(&self) -> Option<&str> {
        self.device_name_sent.as_deref()
    }

    #[must_use]
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    #[must_use]
    pub fn result(&self) -> Option<AccessTokenOutcome> {
        self.result.lock().expect("request lock poisoned").clone()
    }
}

impl NetworkRequest for AccessTokenRequest {
    fn path(&self) -> String {
        "/oauth2/v1/token/".to_string()
    }

    fn method(&self) -> http::Method {
        http::Method::POST
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("application/x-www-form-urlencoded")
    }

    fn body(&self) -> String {
        let mut vars = RequestVarsEncoder::new();
        vars.set("client_id", &self.client_id);
        vars.set("scope", self.scopes.encode());
        match &self.grant {
            AccessTokenGrant::AuthToken(token) => {
                vars.set("grant_type", "auth_token");
                vars.set("auth_token", token);
            }
            AccessTokenGrant::RefreshToken(token) => {
                vars.set("grant_type", "refresh_token");
                vars.set("refresh_token", token);
            }
        }
        vars.set_opt("device_name", self.device_name_sent.clone());
        vars.encode_form_body()
    }

    fn query_string(&self) -> String {
        query_with_sid(self.session_id.as_deref()).encode_query_string()
    }

    fn manager_url_type(&self) -> UrlType {
        UrlType::OAuth2
    }

    fn try_response(&self, status: u16, body: &str) -> NetworkResponseStatus {
        let outcome = match status {
            200 => match parse_access_token_success(body, self.is_auth_token_grant()) {
                Ok(success) => Ok(success),
                Err(_) => {
                    return NetworkResponseStatus::ParseProblem;
                }
            },
            400 => match parse_access_token_error(body, &[AuthErrorCode::InvalidRequest]) {
                Ok(e) => Err(e),
                Err(_) => return NetworkResponseStatus::ParseProblem,
            },
            401 => match parse_access_token_error(
                body,
                &[
                    AuthErrorCode::InvalidClient,
                    AuthErrorCode::InvalidGrant,
                    AuthErrorCode::InvalidScope,
                ],
            ) {
                Ok(e) => Err(e),
                Err(_) => return NetworkResponseStatus::ParseProblem,
            },
            _ => return NetworkResponseStatus::HttpProblem,
        };
        *self.result.lock().expect("request lock poisoned") = Some(outcome);
        NetworkResponseStatus::Ok
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn parse_access_token_success(body: &str, is_auth_token_grant: bool) -> crate::error::Result<AccessTokenSuccess> {
    let p = ResponseParser::parse(body)?;
    p.require_literal("token_type", "Bearer")?;
    let access_token = p.require_string("access_token")?;
    let expires_in = p.require_positive_i64("expires_in")?;
    let granted_scopes = p
        .optional_string("scope")?
        .map(|s| ScopeSet::from_encoded(&s));
    let (refresh_token, user_id) = if is_auth_token_grant {
        (
            Some(p.require_string("refresh_token")?),
            Some(p.require_string("user_id")?),
        )
    } else {
        (p.optional_string("refresh_token")?, p.optional_string("user_id")?)
    };
    Ok(AccessTokenSuccess {
        access_token,
        granted_scopes,
        expires_in,
        refresh_token,
        user_id,
    })
}

fn parse_access_token_error(
    body: &str,
    accepted: &[AuthErrorCode],
) -> crate::error::Result<AccessTokenError> {
    let p = ResponseParser::parse(body)?;
    let raw = p.require_string("error")?;
    let code: AuthErrorCode = serde_json::from_value(serde_json::Value::String(raw.clone()))
        .map_err(|_| crate::error::Error::ParseError(format!("unrecognized error code `{raw}`")))?;
    if !accepted.contains(&code) {
        return Err(crate::error::Error::ParseError(format!(
            "error code `{raw}` not accepted for this status"
        )));
    }
    let description = p.optional_string_soft("error_description");
    Ok(AccessTokenError { code, description })
}

// ---------------------------------------------------------------------
// MigrationTokenRequest
// ---------------------------------------------------------------------

/// `POST /oauth2/v1/token/` with `grant_type=oauth1_token`, signed with the
/// legacy OAuth1 credentials instead of carrying a token in the body
///.
#[derive(Debug)]
pub struct MigrationTokenRequest {
    client_id: String,
    scopes: ScopeSet,
    session_id: Option<String>,
    oauth1_token: String,
    oauth1_token_secret: String,
    oauth1_host: String,
    time_skew: i64,
    crypto: Arc<dyn CryptoOps>,
    result: Mutex<Option<AccessTokenOutcome>>,
}

impl MigrationTokenRequest {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_id: impl Into<String>,
        scopes: ScopeSet,
        session_id: Option<String>,
        oauth1_token: impl Into<String>,
        oauth1_token_secret: impl Into<String>,
        oauth1_host: impl Into<String>,
        time_skew: i64,
        crypto: Arc<dyn CryptoOps>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            scopes,
            session_id,
            oauth1_token: oauth1_token.into(),
            oauth1_token_secret: oauth1_token_secret.into(),
            oauth1_host: oauth1_host.into(),
            time_skew,
            crypto,
            result: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn result(&self) -> Option<AccessTokenOutcome> {
        self.result.lock().expect("request lock poisoned").clone()
    }

    /// Build a fresh `Authorization: OAuth ...` header. Nonce and timestamp
    /// are regenerated every call, so the manager's retry attempts each get
    /// their own signature.
    fn authorization_header(&self) -> String {
        let timestamp = Utc::now().timestamp();
        let nonce = format!("{:x}{:x}", rand::random::<u64>(), rand::random::<u64>());
        let base = format!(
            "oauth_consumer_key={}&oauth_nonce={}&oauth_timestamp={}&oauth_token={}&opera_time_skew={}",
            self.client_id, nonce, timestamp, self.oauth1_token, self.time_skew
        );
        let signature = self
            .crypto
            .hmac_sha1_hex(self.oauth1_token_secret.as_bytes(), base.as_bytes());
        format!(
            "OAuth realm=\"{realm}\", oauth_consumer_key=\"{cid}\", oauth_token=\"{token}\", \
             oauth_nonce=\"{nonce}\", oauth_timestamp=\"{ts}\", opera_time_skew=\"{skew}\", \
             oauth_signature=\"{sig}\"",
            realm = self.oauth1_host,
            cid = self.client_id,
            token = self.oauth1_token,
            nonce = nonce,
            ts = timestamp,
            skew = self.time_skew,
            sig = signature,
        )
    }
}

impl NetworkRequest for MigrationTokenRequest {
    fn path(&self) -> String {
        "/oauth2/v1/token/".to_string()
    }

    fn method(&self) -> http::Method {
        http::Method::POST
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("application/x-www-form-urlencoded")
    }

    fn body(&self) -> String {
        let mut vars = RequestVarsEncoder::new();
        vars.set("client_id", &self.client_id);
        vars.set("scope", self.scopes.encode());
        vars.set("grant_type", "oauth1_token");
        vars.encode_form_body()
    }

    fn query_string(&self) -> String {
        query_with_sid(self.session_id.as_deref()).encode_query_string()
    }

    fn extra_headers(&self) -> Vec<(http::HeaderName, http::HeaderValue)> {
        match http::HeaderValue::from_str(&self.authorization_header()) {
            Ok(value) => vec![(http::header::AUTHORIZATION, value)],
            Err(_) => Vec::new(),
        }
    }

    fn manager_url_type(&self) -> UrlType {
        UrlType::OAuth2
    }

    fn try_response(&self, status: u16, body: &str) -> NetworkResponseStatus {
        let outcome = match status {
            200 => match parse_access_token_success(body, true) {
                Ok(s) => Ok(s),
                Err(_) => return NetworkResponseStatus::ParseProblem,
            },
            400 => match parse_access_token_error(body, &[AuthErrorCode::InvalidRequest]) {
                Ok(e) => Err(e),
                Err(_) => return NetworkResponseStatus::ParseProblem,
            },
            401 => match parse_access_token_error(
                body,
                &[
                    AuthErrorCode::InvalidClient,
                    AuthErrorCode::InvalidGrant,
                    AuthErrorCode::InvalidScope,
                ],
            ) {
                Ok(e) => Err(e),
                Err(_) => return NetworkResponseStatus::ParseProblem,
            },
            _ => return NetworkResponseStatus::HttpProblem,
        };
        *self.result.lock().expect("request lock poisoned") = Some(outcome);
        NetworkResponseStatus::Ok
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------
// OAuth1RenewTokenRequest
// ---------------------------------------------------------------------

/// A successfully-parsed token-renewal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth1RenewTokenSuccess {
    pub auth_token: String,
    pub auth_token_secret: String,
    pub user_name_or_email: String,
}

/// A server-rejected token-renewal response, carrying the legacy numeric
/// error code verbatim; the migrator derives its `O1_<code>_*` outcome
/// naming from this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth1RenewTokenError {
    pub err_code: i64,
    pub err_msg: String,
}

pub type OAuth1RenewOutcome = Result<OAuth1RenewTokenSuccess, OAuth1RenewTokenError>;

/// `GET /account/access-token/renewal/`.
#[derive(Debug)]
pub struct OAuth1RenewTokenRequest {
    consumer_key: String,
    old_token: String,
    service: String,
    signature: String,
    result: Mutex<Option<OAuth1RenewOutcome>>,
}

impl OAuth1RenewTokenRequest {
    #[must_use]
    pub fn new(
        consumer_key: impl Into<String>,
        old_token: impl Into<String>,
        service: impl Into<String>,
        client_secret: &str,
        crypto: &dyn CryptoOps,
    ) -> Self {
        let consumer_key = consumer_key.into();
        let old_token = old_token.into();
        let service = service.into();
        let base = format!(
            "consumer_key={consumer_key}&old_token={old_token}&service={service}X{client_secret}"
        );
        let signature = crypto.sha1_hex(base.as_bytes());
        Self {
            consumer_key,
            old_token,
            service,
            signature,
            result: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn result(&self) -> Option<OAuth1RenewOutcome> {
        self.result.lock().expect("request lock poisoned").clone()
    }
}

impl NetworkRequest for OAuth1RenewTokenRequest {
    fn path(&self) -> String {
        "/account/access-token/renewal/".to_string()
    }

    fn method(&self) -> http::Method {
        http::Method::GET
    }

    fn content_type(&self) -> Option<&'static str> {
        None
    }

    fn body(&self) -> String {
        String::new()
    }

    fn query_string(&self) -> String {
        let mut vars = RequestVarsEncoder::new();
        vars.set("consumer_key", &self.consumer_key);
        vars.set("old_token", &self.old_token);
        vars.set("service", &self.service);
        vars.set("signature", self.signature.to_lowercase());
        vars.encode_query_string()
    }

    fn manager_url_type(&self) -> UrlType {
        UrlType::OAuth1
    }

    fn try_response(&self, status: u16, body: &str) -> NetworkResponseStatus {
        if status != 200 {
            return NetworkResponseStatus::HttpProblem;
        }
        let Ok(p) = ResponseParser::parse(body) else {
            return NetworkResponseStatus::ParseProblem;
        };
        let err_code = match p.optional_i64("err_code") {
            Ok(v) => v,
            Err(_) => return NetworkResponseStatus::ParseProblem,
        };
        let outcome = if let Some(err_code) = err_code {
            let err_msg = p.optional_string_soft("err_msg").unwrap_or_default();
            Err(OAuth1RenewTokenError { err_code, err_msg })
        } else {
            let auth_token = match p.require_string("auth_token") {
                Ok(v) => v,
                Err(_) => return NetworkResponseStatus::ParseProblem,
            };
            let auth_token_secret = match p.require_string("auth_token_secret") {
                Ok(v) => v,
                Err(_) => return NetworkResponseStatus::ParseProblem,
            };
            let user_name_or_email = p
                .optional_string_soft("userName")
                .or_else(|| p.optional_string_soft("userEmail"))
                .unwrap_or_default();
            Ok(OAuth1RenewTokenSuccess {
                auth_token,
                auth_token_secret,
                user_name_or_email,
            })
        };
        *self.result.lock().expect("request lock poisoned") = Some(outcome);
        NetworkResponseStatus::Ok
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------
// RevokeTokenRequest
// ---------------------------------------------------------------------

/// Which token kind is being revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    RefreshToken,
    AccessToken,
}

impl TokenTypeHint {
    fn as_str(self) -> &'static str {
        match self {
            TokenTypeHint::RefreshToken => "refresh_token",
            TokenTypeHint::AccessToken => "access_token",
        }
    }
}

/// A server-rejected revoke response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeTokenError {
    InvalidRequest,
    InvalidClient,
}

pub type RevokeTokenOutcome = Result<(), RevokeTokenError>;

/// `POST /oauth2/v1/revoketoken/`. Any response outside the
/// 200/400-invalid_request/401-invalid_client enum parses as
/// `PARSE_PROBLEM` and the manager backs off forever — preserved
/// deliberately, not a bug.
#[derive(Debug)]
pub struct RevokeTokenRequest {
    client_id: String,
    token: String,
    token_type_hint: TokenTypeHint,
    session_id: Option<String>,
    result: Mutex<Option<RevokeTokenOutcome>>,
}

impl RevokeTokenRequest {
    #[must_use]
    pub fn new(client_id: impl Into<String>, token: impl Into<String>, token_type_hint: TokenTypeHint) -> Self {
        Self::with_session_id(client_id, token, token_type_hint, None)
    }

    #[must_use]
    pub fn with_session_id(
        client_id: impl Into<String>,
        token: impl Into<String>,
        token_type_hint: TokenTypeHint,
        session_id: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            token: token.into(),
            token_type_hint,
            session_id,
            result: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn result(&self) -> Option<RevokeTokenOutcome> {
        self.result.lock().expect("request lock poisoned").clone()
    }
}

impl NetworkRequest for RevokeTokenRequest {
    fn path(&self) -> String {
        "/oauth2/v1/revoketoken/".to_string()
    }

    fn method(&self) -> http::Method {
        http::Method::POST
    }

    fn query_string(&self) -> String {
        query_with_sid(self.session_id.as_deref()).encode_query_string()
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("application/x-www-form-urlencoded")
    }

    fn body(&self) -> String {
        let mut vars = RequestVarsEncoder::new();
        vars.set("client_id", &self.client_id);
        vars.set("token", &self.token);
        vars.set("token_type_hint", self.token_type_hint.as_str());
        vars.encode_form_body()
    }

    fn manager_url_type(&self) -> UrlType {
        UrlType::OAuth2
    }

    fn try_response(&self, status: u16, body: &str) -> NetworkResponseStatus {
        let outcome = match status {
            200 => Ok(()),
            400 => match ResponseParser::parse(body).and_then(|p| p.require_literal("error", "invalid_request")) {
                Ok(()) => Err(RevokeTokenError::InvalidRequest),
                Err(_) => return NetworkResponseStatus::ParseProblem,
            },
            401 => match ResponseParser::parse(body).and_then(|p| p.require_literal("error", "invalid_client")) {
                Ok(()) => Err(RevokeTokenError::InvalidClient),
                Err(_) => return NetworkResponseStatus::ParseProblem,
            },
            _ => return NetworkResponseStatus::ParseProblem,
        };
        *self.result.lock().expect("request lock poisoned") = Some(outcome);
        NetworkResponseStatus::Ok
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
