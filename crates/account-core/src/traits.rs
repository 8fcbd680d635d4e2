//! External collaborator interfaces.
//!
//! This crate owns the state machines and policies; it never touches a
//! filesystem, a keychain, or a socket directly. Everything that would
//! require a platform integration is expressed as a trait here, with a
//! default `reqwest`-backed [`HttpClient`] impl provided for convenience,
//! wrapping `reqwest::Client` behind the crate's own capability surface.

use async_trait::async_trait;

use crate::error::Result;

/// A monotonic clock, injectable so backoff/throttling logic is
/// deterministic under test and stays cancellation-safe across
/// system-time jumps.
pub trait TickClock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> std::time::Instant;
}

/// The system monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTickClock;

impl TickClock for SystemTickClock {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }
}

/// Cryptographic primitives delegated to the platform: AES at-rest
/// encryption, HMAC-SHA1 request signing, MD5, and Base64. This crate never
/// implements cryptography itself.
pub trait CryptoOps: Send + Sync + std::fmt::Debug {
    /// Encrypt `plaintext` for at-rest storage, returning a Base64-encoded
    /// ciphertext blob.
    fn os_encrypt(&self, plaintext: &str) -> Result<String>;

    /// Inverse of [`Self::os_encrypt`].
    fn os_decrypt(&self, ciphertext_b64: &str) -> Result<String>;

    /// Encrypt an `i64` (used for timestamps) the same way as
    /// [`Self::os_encrypt`], via its decimal string representation.
    fn os_encrypt_i64(&self, value: i64) -> Result<String> {
        self.os_encrypt(&value.to_string())
    }

    /// Inverse of [`Self::os_encrypt_i64`].
    fn os_decrypt_i64(&self, ciphertext_b64: &str) -> Result<i64> {
        self.os_decrypt(ciphertext_b64)?
            .parse()
            .map_err(|_| crate::error::Error::InvariantViolation("non-integer timestamp".into()))
    }

    /// `hex(HMAC-SHA1(key, data))`, used to sign OAuth1 migration requests.
    fn hmac_sha1_hex(&self, key: &[u8], data: &[u8]) -> String;

    /// `hex(SHA1(data))`, used by the OAuth1 token-renewal signature.
    fn sha1_hex(&self, data: &[u8]) -> String;

    /// `base64(MD5(data))`, used to compute the sitecheck `hdn` parameter.
    fn md5_base64(&self, data: &[u8]) -> String;
}

/// A key-value preference store. Implementations are expected to
/// be a thin wrapper around the platform's preference service; all values
/// are opaque strings (this crate is responsible for any
/// serialization/encryption of structured values before calling `set`).
#[async_trait]
pub trait PrefStore: Send + Sync {
    fn get_string(&self, path: &str) -> Option<String>;
    fn set_string(&self, path: &str, value: &str);
    fn clear(&self, path: &str);
    /// Flush any buffered writes. A no-op for stores that write through.
    async fn commit_pending_writes(&self);
}

/// The encrypted on-disk token table.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load all persisted token rows. Rows that fail to decrypt or parse are
    /// dropped by the caller ([`crate::token_cache::TokenCache`]), not here.
    async fn load(&self) -> Result<Vec<StoredTokenRow>>;

    /// Overwrite the entire table with `rows`.
    async fn save(&self, rows: Vec<StoredTokenRow>) -> Result<()>;

    /// Drop every row.
    async fn clear(&self) -> Result<()>;
}

/// One persisted, still-encrypted token row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTokenRow {
    pub client_name: String,
    pub encoded_scopes: String,
    pub secret: String,
    pub expires_at_unix: i64,
}

/// An HTTP response as seen by [`crate::network::NetworkRequestManager`]:
/// status code, response headers, and raw body. Redirects are never
/// followed by implementations.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: http::HeaderMap,
    pub body: String,
}

/// The HTTP transport. `reqwest` is an implementation detail
/// behind this trait, not a hard dependency of the state-machine code.
#[async_trait]
pub trait HttpClient: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns [`crate::error::Error::Transport`] on a network-level failure
    /// (DNS, TLS, connection reset, timeout). HTTP error status codes are
    /// not errors at this layer — they are returned as a normal
    /// [`HttpResponse`] for the caller to interpret.
    async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse>;
}

/// A fully-resolved outbound request, ready for a transport to execute.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: http::Method,
    pub url: url::Url,
    pub headers: http::HeaderMap,
    pub body: String,
}

/// A `reqwest`-backed [`HttpClient`], the crate's default transport.
///
/// Built with redirects disabled and cookies off, matching the load flags
/// every [`crate::network::NetworkRequest`] variant requests — a 3xx
/// response is returned as-is rather than followed, so
/// [`crate::network::NetworkRequestManager`] can treat it as terminal.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// # Panics
    /// Panics if the underlying TLS backend cannot be initialized (mirrors
    /// `reqwest::Client::new()`'s panic contract).
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build reqwest client");
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: PreparedRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// A component that can contribute a named fragment of diagnostic state
/// to a [`crate::diagnostics::DiagnosticService`].
pub trait DiagnosticSupplier: Send + Sync {
    /// Stable name this supplier's fragment is keyed under in a snapshot.
    fn diagnostic_name(&self) -> &'static str;

    /// Current diagnostic state as a JSON object. Returning an empty object
    /// means "nothing to report right now" and the fragment is omitted.
    fn diagnostic_snapshot(&self) -> serde_json::Value;
}
