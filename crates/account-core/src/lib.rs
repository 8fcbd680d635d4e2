#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

//! [![Crates.io](https://img.shields.io/crates/v/account-core)](https://crates.io/crates/account-core)
//! [![License](https://img.shields.io/badge/License-Apache_2.0-blue.svg)](https://opensource.org/licenses/Apache-2.0)
//!
//! # Client-Side Identity and Trust Core
//!
//! This crate owns two pieces of a browser's client-side security surface:
//!
//! * An `OAuth2` session lifecycle engine ([`AuthService`]): legacy OAuth1
//!   credential migration, access-token caching and refresh, revocation,
//!   throttled retry, and auth-error recovery.
//! * A URL fraud-rating engine ([`FraudProtectionService`]): phishing/malware
//!   verdicts from a remote sitecheck service, with per-host caching, request
//!   dedup, and a user bypass.
//!
//! Everything that would require a platform integration — encryption, a
//! preference store, an on-disk token table, an HTTP transport, a monotonic
//! clock — is expressed as a trait in [`traits`], with safe defaults
//! provided where one exists (a `reqwest`-backed [`traits::HttpClient`], a
//! real-time [`traits::TickClock`]).
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use account_core::network::{NetworkRequestManager, UrlType, UrlTypeConfig};
//! use account_core::traits::{ReqwestHttpClient, SystemTickClock};
//! use account_core::{AuthService, Config, DeviceNameService, PersistentSession, RequestThrottler, TokenCache};
//!
//! # #[derive(Debug)] struct MyPrefStore;
//! # #[async_trait::async_trait]
//! # impl account_core::traits::PrefStore for MyPrefStore {
//! #     fn get_string(&self, _path: &str) -> Option<String> { None }
//! #     fn set_string(&self, _path: &str, _value: &str) {}
//! #     fn clear(&self, _path: &str) {}
//! #     async fn commit_pending_writes(&self) {}
//! # }
//! # #[derive(Debug)] struct MyCrypto;
//! # impl account_core::traits::CryptoOps for MyCrypto {
//! #     fn os_encrypt(&self, s: &str) -> account_core::error::Result<String> { Ok(s.to_string()) }
//! #     fn os_decrypt(&self, s: &str) -> account_core::error::Result<String> { Ok(s.to_string()) }
//! #     fn hmac_sha1_hex(&self, _k: &[u8], _d: &[u8]) -> String { String::new() }
//! #     fn sha1_hex(&self, _d: &[u8]) -> String { String::new() }
//! #     fn md5_base64(&self, _d: &[u8]) -> String { String::new() }
//! # }
//! # #[derive(Debug, Default)] struct MyTokenStore;
//! # #[async_trait::async_trait]
//! # impl account_core::traits::TokenStore for MyTokenStore {
//! #     async fn load(&self) -> account_core::error::Result<Vec<account_core::traits::StoredTokenRow>> { Ok(vec![]) }
//! #     async fn save(&self, _rows: Vec<account_core::traits::StoredTokenRow>) -> account_core::error::Result<()> { Ok(()) }
//! #     async fn clear(&self) -> account_core::error::Result<()> { Ok(()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() {
//!     let prefs = Arc::new(MyPrefStore);
//!     let crypto: Arc<dyn account_core::traits::CryptoOps> = Arc::new(MyCrypto);
//!     let session = Arc::new(PersistentSession::new(prefs.clone(), crypto.clone(), false));
//!     let token_cache = Arc::new(TokenCache::new(Arc::new(MyTokenStore::default())));
//!
//!     let config = Config::builder(
//!         "my-client-id",
//!         "https://identity.example.com/oauth2/".parse().unwrap(),
//!         "https://identity.example.com/oauth1/".parse().unwrap(),
//!     )
//!     .build();
//!
//!     let mut url_types = HashMap::new();
//!     url_types.insert(
//!         UrlType::OAuth2,
//!         UrlTypeConfig { base_url: config.oauth2_base_url.clone(), allow_insecure: config.allow_insecure_oauth2 },
//!     );
//!     url_types.insert(
//!         UrlType::OAuth1,
//!         UrlTypeConfig { base_url: config.oauth1_base_url.clone(), allow_insecure: config.allow_insecure_oauth1 },
//!     );
//!     let network = NetworkRequestManager::new(Arc::new(ReqwestHttpClient::new()), Arc::new(SystemTickClock), url_types);
//!     let throttler = Arc::new(RequestThrottler::new(
//!         Arc::new(SystemTickClock),
//!         account_core::BackoffPolicy::production(),
//!     ));
//!     let device_names = Arc::new(DeviceNameService::new(prefs, crypto, "my-device"));
//!
//!     let auth = AuthService::new(
//!         session,
//!         token_cache,
//!         network,
//!         throttler,
//!         device_names,
//!         Arc::new(SystemTickClock),
//!         config.client_id,
//!         None,
//!     );
//!     auth.initialize().await;
//! }
//! ```

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod device_name;
pub mod diagnostics;
pub mod error;
pub mod fraud;
pub mod migrator;
pub mod network;
pub mod response_parser;
pub mod scope;
pub mod session;
#[cfg(test)]
pub(crate) mod test_support;
pub mod throttler;
pub mod token;
pub mod token_cache;
pub mod traits;
pub mod vars_encoder;

mod auth_service;

pub use auth_service::{
    AccessTokenClient, AccessTokenCompletion, AccessTokenRequestOutcome, AuthErrorTrigger, AuthService,
    EndSessionReason,
};
pub use config::{Config, ConfigBuilder};
pub use device_name::DeviceNameService;
pub use diagnostics::{DiagnosticObserver, DiagnosticService, Snapshot};
pub use error::{AuthErrorCode, Error, Result};
pub use fraud::{AdvisoryId, AdvisoryType, Detector, FraudAdvisory, FraudProtectionService, FraudRatedServer};
pub use migrator::{OAuth1Migrator, OAuth1SessionData};
pub use scope::ScopeSet;
pub use session::{PersistentSession, SessionState, StartMethod};
pub use throttler::{BackoffPolicy, RequestThrottler};
pub use token::AuthToken;
pub use token_cache::TokenCache;
