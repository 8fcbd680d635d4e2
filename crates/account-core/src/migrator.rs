//! `OAuth1Migrator`: one-shot migration from legacy OAuth1 credentials to an
//! OAuth2 refresh token, grounded on
//! `examples/original_source/common/oauth2/migration/oauth1_migrator_impl.h`
//! and `oauth1_session_data.{h,cc}`.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::error::AuthErrorCode;
use crate::network::{
    MigrationTokenRequest, NetworkRequest, NetworkRequestManager, NetworkResponseStatus,
    OAuth1RenewTokenRequest, RequestConsumer,
};
use crate::scope::ScopeSet;
use crate::session::{PersistentSession, SessionState, StartMethod};
use crate::traits::{CryptoOps, DiagnosticSupplier, PrefStore};

const LEGACY_PREF_KEY: &str = "opera.oauth1.legacy_session";

/// The legacy OAuth1 credential blob. `user_id` is carried
/// along for diagnostics but, per the original, is not required for
/// [`Self::is_complete`] — only `login`, `token` and `token_secret` gate
/// whether migration can start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuth1SessionData {
    pub login: String,
    pub user_id: String,
    pub time_skew: i64,
    pub token: String,
    pub token_secret: String,
}

impl OAuth1SessionData {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.login.is_empty() && !self.token.is_empty() && !self.token_secret.is_empty()
    }
}

/// The outcome of a migration attempt, with a wire-stable `Display` form
/// matching the original's `MR_*` result naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationResult {
    Success,
    SuccessWithBounce,
    Oauth1Error { code: i64, label: &'static str },
    Oauth2Error(AuthErrorCode),
}

impl fmt::Display for MigrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationResult::Success => write!(f, "MR_SUCCESS"),
            MigrationResult::SuccessWithBounce => write!(f, "MR_SUCCESS_WITH_BOUNCE"),
            MigrationResult::Oauth1Error { code, label } => write!(f, "MR_O1_{code}_{label}"),
            MigrationResult::Oauth2Error(code) => {
                write!(f, "MR_O2_{}", code.to_string().to_uppercase())
            }
        }
    }
}

/// The legacy token-renewal error codes the original documents a label for;
/// anything else renders as `UNKNOWN`.
fn oauth1_error_label(code: i64) -> &'static str {
    match code {
        425 => "INVALID_OPERA_TOKEN",
        428 => "NOT_EXPIRED",
        _ => "UNKNOWN",
    }
}

struct MigratorState {
    legacy: OAuth1SessionData,
    retried: bool,
    last_result: Option<MigrationResult>,
}

/// Drives legacy-credential migration to completion: one `MigrationTokenRequest`,
/// with at most one `OAuth1RenewTokenRequest` bounce-and-retry if the server
/// says the legacy token needs renewing.
pub struct OAuth1Migrator {
    prefs: Arc<dyn PrefStore>,
    crypto: Arc<dyn CryptoOps>,
    network: NetworkRequestManager,
    session: Arc<PersistentSession>,
    client_id: String,
    client_secret: String,
    oauth1_service: String,
    oauth1_host: String,
    state: Mutex<MigratorState>,
    self_weak: Weak<OAuth1Migrator>,
}

impl std::fmt::Debug for OAuth1Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Migrator").finish_non_exhaustive()
    }
}

impl OAuth1Migrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prefs: Arc<dyn PrefStore>,
        crypto: Arc<dyn CryptoOps>,
        network: NetworkRequestManager,
        session: Arc<PersistentSession>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        oauth1_service: impl Into<String>,
        oauth1_host: impl Into<String>,
    ) -> Arc<Self> {
        let legacy = Self::load_legacy(&prefs, &crypto);
        Arc::new_cyclic(|self_weak| Self {
            prefs,
            crypto,
            network,
            session,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            oauth1_service: oauth1_service.into(),
            oauth1_host: oauth1_host.into(),
            state: Mutex::new(MigratorState {
                legacy,
                retried: false,
                last_result: None,
            }),
            self_weak: self_weak.clone(),
        })
    }

    fn load_legacy(prefs: &Arc<dyn PrefStore>, crypto: &Arc<dyn CryptoOps>) -> OAuth1SessionData {
        let decrypt = |suffix: &str| -> String {
            prefs
                .get_string(&format!("{LEGACY_PREF_KEY}.{suffix}"))
                .and_then(|enc| crypto.os_decrypt(&enc).ok())
                .unwrap_or_default()
        };
        let time_skew = prefs
            .get_string(&format!("{LEGACY_PREF_KEY}.time_skew"))
            .and_then(|enc| crypto.os_decrypt_i64(&enc).ok())
            .unwrap_or(0);
        OAuth1SessionData {
            login: decrypt("login"),
            user_id: decrypt("user_id"),
            time_skew,
            token: decrypt("token"),
            token_secret: decrypt("token_secret"),
        }
    }

    /// Migration is possible iff the legacy blob is complete.
    #[must_use]
    pub fn is_migration_possible(&self) -> bool {
        self.state.lock().expect("migrator lock poisoned").legacy.is_complete()
    }

    #[must_use]
    pub fn last_result(&self) -> Option<MigrationResult> {
        self.state.lock().expect("migrator lock poisoned").last_result.clone()
    }

    fn set_result(&self, result: MigrationResult) {
        self.state.lock().expect("migrator lock poisoned").last_result = Some(result);
    }

    /// Step 1: move the session to `Starting` under the legacy identity
    ///.
    pub fn prepare_migration(&self) {
        let login = self.state.lock().expect("migrator lock poisoned").legacy.login.clone();
        self.session.set_username(login);
        self.session.set_start_method(StartMethod::Oauth1Migration);
        self.session.set_state(SessionState::Starting);
    }

    /// Step 2: issue the signed `MigrationTokenRequest`.
    pub fn start_migration(&self) {
        let legacy = self.state.lock().expect("migrator lock poisoned").legacy.clone();
        let sid = self.session.session_id_for_diagnostics();
        let request = Arc::new(MigrationTokenRequest::new(
            self.client_id.clone(),
            ScopeSet::single("ALL"),
            (!sid.is_empty()).then_some(sid),
            legacy.token,
            legacy.token_secret,
            self.oauth1_host.clone(),
            legacy.time_skew,
            self.crypto.clone(),
        ));
        let weak: Weak<dyn RequestConsumer> = self.self_weak.clone();
        self.network.start_request(request, weak);
    }

    fn start_renew(&self) {
        let legacy = self.state.lock().expect("migrator lock poisoned").legacy.clone();
        let request = Arc::new(OAuth1RenewTokenRequest::new(
            self.client_id.clone(),
            legacy.token,
            self.oauth1_service.clone(),
            &self.client_secret,
            self.crypto.as_ref(),
        ));
        let weak: Weak<dyn RequestConsumer> = self.self_weak.clone();
        self.network.start_request(request, weak);
    }

    /// Idempotently erase the legacy blob.
    pub fn ensure_oauth1_session_is_cleared(&self) {
        for suffix in ["login", "user_id", "time_skew", "token", "token_secret"] {
            self.prefs.clear(&format!("{LEGACY_PREF_KEY}.{suffix}"));
        }
        self.state.lock().expect("migrator lock poisoned").legacy = OAuth1SessionData::default();
    }

    fn handle_migration_response(&self, request: &MigrationTokenRequest) {
        let Some(outcome) = request.result() else {
            return;
        };
        match outcome {
            Ok(success) => {
                self.session.set_refresh_token(success.refresh_token.unwrap_or_default());
                self.session.set_user_id(success.user_id.unwrap_or_default());
                self.session.set_state(SessionState::InProgress);
                self.session.store();
                self.ensure_oauth1_session_is_cleared();
                let bounced = self.state.lock().expect("migrator lock poisoned").retried;
                self.set_result(if bounced {
                    MigrationResult::SuccessWithBounce
                } else {
                    MigrationResult::Success
                });
            }
            Err(err) if err.code == AuthErrorCode::InvalidGrant => {
                self.start_renew();
            }
            Err(err) => {
                self.session.set_state(SessionState::AuthError);
                self.session.store();
                self.ensure_oauth1_session_is_cleared();
                self.set_result(MigrationResult::Oauth2Error(err.code));
            }
        }
    }

    fn handle_renew_response(&self, request: &OAuth1RenewTokenRequest) {
        let Some(outcome) = request.result() else {
            return;
        };
        let already_retried = {
            let mut state = self.state.lock().expect("migrator lock poisoned");
            let retried = state.retried;
            state.retried = true;
            retried
        };

        match outcome {
            Ok(success) if !already_retried => {
                {
                    let mut state = self.state.lock().expect("migrator lock poisoned");
                    state.legacy.token = success.auth_token;
                    state.legacy.token_secret = success.auth_token_secret;
                }
                self.start_migration();
            }
            Err(ref e) if e.err_code == 428 && !already_retried => {
                self.start_migration();
            }
            Ok(_) | Err(_) if already_retried => {
                self.session.set_state(SessionState::AuthError);
                self.session.store();
                self.ensure_oauth1_session_is_cleared();
                self.set_result(MigrationResult::Oauth1Error {
                    code: 0,
                    label: "RENEWAL_LOOP",
                });
            }
            Err(e) => {
                self.session.set_state(SessionState::AuthError);
                self.session.store();
                self.ensure_oauth1_session_is_cleared();
                self.set_result(MigrationResult::Oauth1Error {
                    code: e.err_code,
                    label: oauth1_error_label(e.err_code),
                });
            }
            Ok(_) => unreachable!("covered by the !already_retried arm above"),
        }
    }
}

impl RequestConsumer for OAuth1Migrator {
    fn on_network_request_finished(&self, request: &Arc<dyn NetworkRequest>, status: NetworkResponseStatus) {
        if status != NetworkResponseStatus::Ok {
            // The only other terminal status a manager ever delivers to a
            // consumer is INSECURE_CONNECTION_FORBIDDEN; treat it as a
            // config problem rather than an auth failure (mirrors
            // AuthService's handling of the same status for refresh-token
            // requests).
            return;
        }
        if let Some(migration_req) = request.as_any().downcast_ref::<MigrationTokenRequest>() {
            self.handle_migration_response(migration_req);
        } else if let Some(renew_req) = request.as_any().downcast_ref::<OAuth1RenewTokenRequest>() {
            self.handle_renew_response(renew_req);
        }
    }
}

impl DiagnosticSupplier for OAuth1Migrator {
    fn diagnostic_name(&self) -> &'static str {
        "oauth1_migrator"
    }

    fn diagnostic_snapshot(&self) -> serde_json::Value {
        let state = self.state.lock().expect("migrator lock poisoned");
        serde_json::json!({
            "migration_possible": state.legacy.is_complete(),
            "last_result": state.last_result.as_ref().map(ToString::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemPrefStore, PlaintextCrypto};
    use crate::traits::{HttpResponse, PreparedRequest};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct ScriptedHttp {
        responses: StdMutex<Vec<HttpResponse>>,
    }

    #[async_trait]
    impl crate::traits::HttpClient for ScriptedHttp {
        async fn execute(&self, _request: PreparedRequest) -> crate::error::Result<HttpResponse> {
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(HttpResponse {
                    status: 500,
                    headers: http::HeaderMap::new(),
                    body: String::new(),
                }))
        }
    }

    fn migrator_with(
        legacy: OAuth1SessionData,
        responses: Vec<HttpResponse>,
    ) -> (Arc<OAuth1Migrator>, Arc<PersistentSession>) {
        let prefs = Arc::new(MemPrefStore::default());
        let crypto: Arc<dyn CryptoOps> = Arc::new(PlaintextCrypto);
        let session = Arc::new(PersistentSession::new(prefs.clone(), crypto.clone(), false));

        if legacy.is_complete() {
            prefs.set_string(&format!("{LEGACY_PREF_KEY}.login"), &legacy.login);
            prefs.set_string(&format!("{LEGACY_PREF_KEY}.token"), &legacy.token);
            prefs.set_string(&format!("{LEGACY_PREF_KEY}.token_secret"), &legacy.token_secret);
        }

        let mut url_types = HashMap::new();
        url_types.insert(
            crate::network::UrlType::OAuth2,
            crate::network::UrlTypeConfig {
                base_url: url::Url::parse("https://auth.example.com").unwrap(),
                allow_insecure: false,
            },
        );
        url_types.insert(
            crate::network::UrlType::OAuth1,
            crate::network::UrlTypeConfig {
                base_url: url::Url::parse("https://legacy.example.com").unwrap(),
                allow_insecure: false,
            },
        );
        let http = Arc::new(ScriptedHttp {
            responses: StdMutex::new(responses),
        });
        let network = NetworkRequestManager::new(http, crate::test_support::FakeClock::new(), url_types);

        let migrator = OAuth1Migrator::new(
            prefs,
            crypto,
            network,
            session.clone(),
            "cid",
            "secret",
            "svc",
            "legacy.example.com",
        );
        (migrator, session)
    }

    #[test]
    fn migration_impossible_without_complete_legacy_blob() {
        let (migrator, _session) = migrator_with(OAuth1SessionData::default(), vec![]);
        assert!(!migrator.is_migration_possible());
    }

    #[test]
    fn migration_possible_with_complete_blob() {
        let legacy = OAuth1SessionData {
            login: "mock-username".into(),
            token: "legacy-token".into(),
            token_secret: "legacy-secret".into(),
            ..Default::default()
        };
        let (migrator, _session) = migrator_with(legacy, vec![]);
        assert!(migrator.is_migration_possible());
    }

    #[tokio::test]
    async fn successful_migration_transitions_session_to_in_progress() {
        let legacy = OAuth1SessionData {
            login: "mock-username".into(),
            token: "legacy-token".into(),
            token_secret: "legacy-secret".into(),
            ..Default::default()
        };
        let body = r#"{"access_token":"unused","refresh_token":"new-refresh","token_type":"Bearer","expires_in":3600,"user_id":"uid-1"}"#;
        let (migrator, session) = migrator_with(
            legacy,
            vec![HttpResponse {
                status: 200,
                headers: http::HeaderMap::new(),
                body: body.to_string(),
            }],
        );
        migrator.prepare_migration();
        migrator.start_migration();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.refresh_token(), "new-refresh");
        assert_eq!(migrator.last_result(), Some(MigrationResult::Success));
        assert!(!migrator.is_migration_possible());
    }

    #[test]
    fn oauth1_error_display_matches_original_naming() {
        let result = MigrationResult::Oauth1Error {
            code: 425,
            label: oauth1_error_label(425),
        };
        assert_eq!(result.to_string(), "MR_O1_425_INVALID_OPERA_TOKEN");
    }
}
