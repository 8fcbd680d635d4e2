//! `AuthService`: the orchestrator. Clients register, request access
//! tokens, and get callbacks; drives session start/end, revocation, and
//! auth-error recovery.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::device_name::DeviceNameService;
use crate::error::{AuthErrorCode, Result};
use crate::migrator::OAuth1Migrator;
use crate::network::{
    AccessTokenRequest, NetworkRequest, NetworkRequestManager, NetworkResponseStatus,
    RequestConsumer, RevokeTokenRequest, TokenTypeHint,
};
use crate::scope::ScopeSet;
use crate::session::{PersistentSession, SessionState, StartMethod};
use crate::throttler::RequestThrottler;
use crate::token::AuthToken;
use crate::token_cache::TokenCache;
use crate::traits::{DiagnosticSupplier, TickClock};

fn request_key(client_name: &str, scopes: &ScopeSet) -> String {
    format!("{client_name}{}", scopes.encode())
}

/// A registered consumer of access tokens. Multiple independent consumers
/// can share a session, each with its own client name and scope set.
pub trait AccessTokenClient: Send + Sync {
    fn client_name(&self) -> &str;
    fn on_access_token_request_completed(&self, completion: AccessTokenCompletion);
    fn on_access_token_request_denied(&self, scopes: &ScopeSet);
}

/// The result of a resolved access-token request: either a usable token or
/// the auth error that terminated the session.
#[derive(Debug, Clone)]
pub enum AccessTokenRequestOutcome {
    Ok(AuthToken),
    AuthError(AuthErrorCode),
}

#[derive(Debug, Clone)]
pub struct AccessTokenCompletion {
    pub requested_scopes: ScopeSet,
    pub outcome: AccessTokenRequestOutcome,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndSessionReason {
    UserRequested,
    UsernameChangedDuringRelogin,
    AuthError,
}

/// Which request triggered `enter_auth_error` — determines whether a
/// revoke is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorTrigger {
    RefreshToken,
    AccessToken,
}

/// Orchestrates the OAuth2 session lifecycle.
///
/// Exclusively owns [`PersistentSession`], [`OAuth1Migrator`] (until
/// consumed), [`NetworkRequestManager`] and [`RequestThrottler`].
/// [`TokenCache`] is injected and shared with the profile container, never
/// mutated by anyone else.
pub struct AuthService {
    session: Arc<PersistentSession>,
    token_cache: Arc<TokenCache>,
    network: NetworkRequestManager,
    throttler: Arc<RequestThrottler>,
    device_names: Arc<DeviceNameService>,
    clock: Arc<dyn TickClock>,
    client_id: String,
    clients: RwLock<HashMap<String, Weak<dyn AccessTokenClient>>>,
    migrator: Mutex<Option<Arc<OAuth1Migrator>>>,
    pending_keys: Mutex<HashSet<String>>,
    in_flight: Mutex<HashMap<String, (Arc<AccessTokenRequest>, String)>>,
    refresh_token_for_sso: Mutex<Option<Arc<AccessTokenRequest>>>,
    deferred: Mutex<Vec<(String, ScopeSet)>>,
    last_end_reason: Mutex<Option<EndSessionReason>>,
    self_weak: Weak<AuthService>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("session_state", &self.session.state())
            .finish_non_exhaustive()
    }
}

impl AuthService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<PersistentSession>,
        token_cache: Arc<TokenCache>,
        network: NetworkRequestManager,
        throttler: Arc<RequestThrottler>,
        device_names: Arc<DeviceNameService>,
        clock: Arc<dyn TickClock>,
        client_id: impl Into<String>,
        migrator: Option<Arc<OAuth1Migrator>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            session,
            token_cache,
            network,
            throttler,
            device_names,
            clock,
            client_id: client_id.into(),
            clients: RwLock::new(HashMap::new()),
            migrator: Mutex::new(migrator),
            pending_keys: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
            refresh_token_for_sso: Mutex::new(None),
            deferred: Mutex::new(Vec::new()),
            last_end_reason: Mutex::new(None),
            self_weak: self_weak.clone(),
        })
    }

    pub fn register_client(&self, client: &Arc<dyn AccessTokenClient>) {
        self.clients
            .write()
            .expect("auth service lock poisoned")
            .insert(client.client_name().to_string(), Arc::downgrade(client));
    }

    pub fn unregister_client(&self, client_name: &str) {
        self.clients.write().expect("auth service lock poisoned").remove(client_name);
    }

    fn get_client(&self, client_name: &str) -> Option<Arc<dyn AccessTokenClient>> {
        self.clients
            .read()
            .expect("auth service lock poisoned")
            .get(client_name)
            .and_then(Weak::upgrade)
    }

    fn drop_migrator(&self) {
        *self.migrator.lock().expect("auth service lock poisoned") = None;
    }

    #[must_use]
    pub fn last_end_reason(&self) -> Option<EndSessionReason> {
        *self.last_end_reason.lock().expect("auth service lock poisoned")
    }

    /// Run the init sequence: load the session, kick off migration if
    /// eligible, then load the token cache and react to its completion
    ///.
    pub async fn initialize(&self) {
        self.session.load();

        if self.session.state() == SessionState::Inactive {
            let migrator = self.migrator.lock().expect("auth service lock poisoned").clone();
            if let Some(migrator) = migrator {
                if migrator.is_migration_possible() {
                    migrator.prepare_migration();
                    migrator.start_migration();
                }
            }
        }

        if let Err(e) = self.token_cache.load().await {
            warn!(error = %e, "token cache failed to load");
        }
        self.on_token_cache_loaded();
    }

    fn on_token_cache_loaded(&self) {
        match self.session.state() {
            SessionState::Starting => {}
            SessionState::InProgress => {
                self.drain_deferred();
                self.drop_migrator();
            }
            SessionState::AuthError => {
                self.drop_migrator();
            }
            SessionState::Unset | SessionState::Inactive | SessionState::Finishing => {}
        }
    }

    fn drain_deferred(&self) {
        let deferred = std::mem::take(&mut *self.deferred.lock().expect("auth service lock poisoned"));
        for (client_name, scopes) in deferred {
            self.do_request_access_token(&client_name, scopes);
        }
    }

    /// Begin a fresh session from an opaque auth token.
    ///
    /// # Errors
    /// Never returns an error today; reserved so callers can propagate a
    /// future precondition failure without an API break.
    pub fn start_session_with_auth_token(&self, username: impl Into<String>, auth_token: impl Into<String>) -> Result<()> {
        let username = username.into();
        let state = self.session.state();
        if !matches!(state, SessionState::Inactive | SessionState::AuthError) {
            warn!(?state, "start_session_with_auth_token called outside INACTIVE/AUTH_ERROR");
            return Ok(());
        }
        if state == SessionState::AuthError && self.session.username() != username {
            self.end_session(EndSessionReason::UsernameChangedDuringRelogin);
            return Ok(());
        }

        self.session.set_state(SessionState::Inactive);
        self.session.set_start_method(StartMethod::AuthToken);
        self.session.set_username(username);
        self.session.set_state(SessionState::Starting);

        let sid = self.session.session_id_for_diagnostics();
        let device_name = self.device_names.has_changed().then(|| self.device_names.current_name());
        let request = Arc::new(AccessTokenRequest::with_auth_token_grant(
            self.client_id.clone(),
            auth_token.into(),
            ScopeSet::single("ALL"),
            (!sid.is_empty()).then_some(sid),
            device_name,
        ));
        *self.refresh_token_for_sso.lock().expect("auth service lock poisoned") = Some(request.clone());
        let weak: Weak<dyn RequestConsumer> = self.self_weak.clone();
        self.network.start_request(request, weak);
        Ok(())
    }

    /// Request a short-lived access token for `scopes` (cardinality 1) on
    /// behalf of `client_name`.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::InvalidScopeCardinality`] if `scopes`
    /// does not contain exactly one scope, or
    /// [`crate::error::Error::UnregisteredClient`] if `client_name` has no
    /// live registration.
    pub fn request_access_token(&self, client_name: &str, scopes: ScopeSet) -> Result<()> {
        if scopes.len() != 1 {
            return Err(crate::error::Error::InvalidScopeCardinality(scopes.len()));
        }
        let Some(client) = self.get_client(client_name) else {
            return Err(crate::error::Error::UnregisteredClient(client_name.to_string()));
        };

        if self.session.state() != SessionState::InProgress {
            client.on_access_token_request_denied(&scopes);
            return Ok(());
        }

        let key = request_key(client_name, &scopes);
        {
            let mut pending = self.pending_keys.lock().expect("auth service lock poisoned");
            if pending.contains(&key) {
                return Ok(());
            }
            pending.insert(key.clone());
        }

        if !self.token_cache.is_loaded() {
            self.deferred
                .lock()
                .expect("auth service lock poisoned")
                .push((client_name.to_string(), scopes));
            return Ok(());
        }

        let delay = self.throttler.get_and_update(&key);
        if delay.is_zero() {
            self.do_request_access_token(client_name, scopes);
        } else {
            let this = self.self_weak.clone();
            let clock = self.clock.clone();
            let client_name = client_name.to_string();
            tokio::spawn(async move {
                let deadline = clock.now() + delay;
                while clock.now() < deadline {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                if let Some(this) = this.upgrade() {
                    this.do_request_access_token(&client_name, scopes);
                }
            });
        }
        Ok(())
    }

    /// The scheduled body of [`Self::request_access_token`]: re-checks
    /// preconditions, serves from cache synchronously on a hit, or issues a
    /// refresh-token-grant request on a miss.
    fn do_request_access_token(&self, client_name: &str, scopes: ScopeSet) {
        let key = request_key(client_name, &scopes);
        self.pending_keys.lock().expect("auth service lock poisoned").remove(&key);

        let Some(client) = self.get_client(client_name) else {
            return;
        };
        if self.session.state() != SessionState::InProgress {
            return;
        }

        if let Some(token) = self.token_cache.get(client_name, &scopes) {
            client.on_access_token_request_completed(AccessTokenCompletion {
                requested_scopes: scopes,
                outcome: AccessTokenRequestOutcome::Ok(token),
            });
            return;
        }

        if self.in_flight.lock().expect("auth service lock poisoned").contains_key(&key) {
            return;
        }

        let refresh_token = self.session.refresh_token();
        let sid = self.session.session_id_for_diagnostics();
        let device_name = self.device_names.has_changed().then(|| self.device_names.current_name());
        let request = Arc::new(AccessTokenRequest::with_refresh_token_grant(
            self.client_id.clone(),
            refresh_token,
            scopes,
            (!sid.is_empty()).then_some(sid),
            device_name,
        ));
        self.in_flight
            .lock()
            .expect("auth service lock poisoned")
            .insert(key, (request.clone(), client_name.to_string()));
        let weak: Weak<dyn RequestConsumer> = self.self_weak.clone();
        self.network.start_request(request, weak);
    }

    /// End the current session. Precondition: state ∈
    /// {STARTING, IN_PROGRESS, AUTH_ERROR}; otherwise a no-op.
    pub fn end_session(&self, reason: EndSessionReason) {
        let state = self.session.state();
        if !matches!(state, SessionState::Starting | SessionState::InProgress | SessionState::AuthError) {
            return;
        }

        self.drop_migrator();
        *self.last_end_reason.lock().expect("auth service lock poisoned") = Some(reason);
        self.device_names.clear_last_sent();
        self.in_flight.lock().expect("auth service lock poisoned").clear();
        self.pending_keys.lock().expect("auth service lock poisoned").clear();
        *self.refresh_token_for_sso.lock().expect("auth service lock poisoned") = None;

        self.token_cache.clear_memory_only();
        self.spawn_disk_token_cache_clear();

        // cancel_all_requests runs before the revoke is issued, so the
        // revoke itself survives.
        self.network.cancel_all_requests();
        self.throttler.reset_all();

        if state == SessionState::InProgress {
            let sid = self.session.session_id_for_diagnostics();
            let request = Arc::new(RevokeTokenRequest::with_session_id(
                self.client_id.clone(),
                self.session.refresh_token(),
                TokenTypeHint::RefreshToken,
                (!sid.is_empty()).then_some(sid),
            ));
            let weak: Weak<dyn RequestConsumer> = self.self_weak.clone();
            self.network.start_request(request, weak);
            self.session.set_state(SessionState::Finishing);
        }

        self.session.clear();
        self.session.store();
    }

    fn enter_auth_error(&self, trigger: AuthErrorTrigger, _auth_error: AuthErrorCode) {
        let refresh_token = self.session.refresh_token();
        self.session.set_state(SessionState::AuthError);
        self.session.store();

        self.in_flight.lock().expect("auth service lock poisoned").clear();
        self.pending_keys.lock().expect("auth service lock poisoned").clear();
        self.token_cache.clear_memory_only();
        self.spawn_disk_token_cache_clear();

        self.network.cancel_all_requests();

        if trigger == AuthErrorTrigger::AccessToken {
            let sid = self.session.session_id_for_diagnostics();
            let request = Arc::new(RevokeTokenRequest::with_session_id(
                self.client_id.clone(),
                refresh_token,
                TokenTypeHint::RefreshToken,
                (!sid.is_empty()).then_some(sid),
            ));
            let weak: Weak<dyn RequestConsumer> = self.self_weak.clone();
            self.network.start_request(request, weak);
        }
    }

    fn spawn_disk_token_cache_clear(&self) {
        let token_cache = self.token_cache.clone();
        tokio::spawn(async move {
            if let Err(e) = token_cache.clear().await {
                warn!(error = %e, "failed to clear on-disk token cache");
            }
        });
    }

    fn handle_access_token_response(&self, request: &AccessTokenRequest) {
        let Some(outcome) = request.result() else {
            return;
        };

        let is_sso = {
            let sso = self.refresh_token_for_sso.lock().expect("auth service lock poisoned");
            sso.as_ref().is_some_and(|r| std::ptr::eq(r.as_ref(), request))
        };

        if is_sso {
            *self.refresh_token_for_sso.lock().expect("auth service lock poisoned") = None;
            match outcome {
                Ok(success) => {
                    self.session.set_refresh_token(success.refresh_token.unwrap_or_default());
                    self.session.set_user_id(success.user_id.unwrap_or_default());
                    self.session.set_state(SessionState::InProgress);
                    self.session.store();
                    if let Some(name) = request.device_name_sent() {
                        self.device_names.store(name);
                    }
                }
                Err(err) => {
                    self.enter_auth_error(AuthErrorTrigger::RefreshToken, err.code);
                }
            }
            return;
        }

        let entry = {
            let mut in_flight = self.in_flight.lock().expect("auth service lock poisoned");
            let key = in_flight
                .iter()
                .find(|(_, (r, _))| std::ptr::eq(r.as_ref(), request))
                .map(|(k, _)| k.clone());
            key.and_then(|k| in_flight.remove(&k))
        };
        let Some((_, client_name)) = entry else {
            return;
        };
        let Some(client) = self.get_client(&client_name) else {
            return;
        };

        match outcome {
            Ok(success) => {
                let granted_scopes = success.granted_scopes.unwrap_or_else(|| request.scopes().clone());
                let Some(token) = AuthToken::new(
                    client_name,
                    success.access_token,
                    granted_scopes,
                    Utc::now() + chrono::Duration::seconds(success.expires_in),
                ) else {
                    debug!("server-granted access token failed its own validity invariant, dropping");
                    return;
                };
                self.token_cache.put(token.clone());
                if let Some(name) = request.device_name_sent() {
                    self.device_names.store(name);
                }
                client.on_access_token_request_completed(AccessTokenCompletion {
                    requested_scopes: request.scopes().clone(),
                    outcome: AccessTokenRequestOutcome::Ok(token),
                });
            }
            Err(err) => {
                self.enter_auth_error(AuthErrorTrigger::AccessToken, err.code);
                client.on_access_token_request_completed(AccessTokenCompletion {
                    requested_scopes: request.scopes().clone(),
                    outcome: AccessTokenRequestOutcome::AuthError(err.code),
                });
            }
        }
    }
}

impl RequestConsumer for AuthService {
    fn on_network_request_finished(&self, request: &Arc<dyn NetworkRequest>, status: NetworkResponseStatus) {
        if status != NetworkResponseStatus::Ok {
            // INSECURE_CONNECTION_FORBIDDEN is the only other terminal
            // status a manager delivers; treated as a transient config
            // problem rather than breaking the session.
            return;
        }
        if let Some(access_req) = request.as_any().downcast_ref::<AccessTokenRequest>() {
            self.handle_access_token_response(access_req);
        }
        // RevokeTokenRequest responses carry nothing actionable either way.
    }
}

impl DiagnosticSupplier for AuthService {
    fn diagnostic_name(&self) -> &'static str {
        "auth_service"
    }

    fn diagnostic_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "session_state": format!("{:?}", self.session.state()),
            "registered_clients": self.clients.read().expect("auth service lock poisoned").len(),
            "in_flight_requests": self.in_flight.lock().expect("auth service lock poisoned").len(),
            "pending_keys": self.pending_keys.lock().expect("auth service lock poisoned").len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::UrlTypeConfig;
    use crate::scope::ScopeSet;
    use crate::test_support::{FakeClock, FakeTokenStore, MemPrefStore, PlaintextCrypto};
    use crate::traits::{CryptoOps, HttpResponse, PreparedRequest, StoredTokenRow};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default)]
    struct ScriptedHttp {
        responses: StdMutex<Vec<HttpResponse>>,
        requests: StdMutex<Vec<PreparedRequest>>,
    }

    #[async_trait]
    impl crate::traits::HttpClient for ScriptedHttp {
        async fn execute(&self, request: PreparedRequest) -> crate::error::Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(self.responses.lock().unwrap().pop().unwrap_or(HttpResponse {
                status: 500,
                headers: http::HeaderMap::new(),
                body: String::new(),
            }))
        }
    }

    #[derive(Debug, Default)]
    struct TestClient {
        name: String,
        completions: StdMutex<Vec<AccessTokenCompletion>>,
        denials: StdMutex<Vec<ScopeSet>>,
    }

    impl AccessTokenClient for TestClient {
        fn client_name(&self) -> &str {
            &self.name
        }
        fn on_access_token_request_completed(&self, completion: AccessTokenCompletion) {
            self.completions.lock().unwrap().push(completion);
        }
        fn on_access_token_request_denied(&self, scopes: &ScopeSet) {
            self.denials.lock().unwrap().push(scopes.clone());
        }
    }

    fn url_types() -> HashMap<crate::network::UrlType, UrlTypeConfig> {
        let mut m = HashMap::new();
        m.insert(
            crate::network::UrlType::OAuth2,
            UrlTypeConfig {
                base_url: url::Url::parse("https://auth.example.com").unwrap(),
                allow_insecure: false,
            },
        );
        m
    }

    fn service_with(responses: Vec<HttpResponse>) -> (Arc<AuthService>, Arc<PersistentSession>, Arc<ScriptedHttp>) {
        let prefs = Arc::new(MemPrefStore::default());
        let crypto: Arc<dyn CryptoOps> = Arc::new(PlaintextCrypto);
        let session = Arc::new(PersistentSession::new(prefs.clone(), crypto.clone(), false));
        let token_cache = Arc::new(TokenCache::new(Arc::new(FakeTokenStore::default())));
        let clock = FakeClock::new();
        let http = Arc::new(ScriptedHttp {
            responses: StdMutex::new(responses),
            requests: StdMutex::new(Vec::new()),
        });
        let network = NetworkRequestManager::new(http.clone(), clock.clone(), url_types());
        let throttler = Arc::new(RequestThrottler::new(clock.clone(), crate::throttler::BackoffPolicy::deterministic_for_tests()));
        let device_names = Arc::new(DeviceNameService::new(prefs, crypto, "test-device"));

        let service = AuthService::new(session.clone(), token_cache, network, throttler, device_names, clock, "cid", None);
        (service, session, http)
    }

    #[tokio::test]
    async fn auth_token_grant_success() {
        let body = r#"{"access_token":"mock-access-token","refresh_token":"mock-refresh-token","token_type":"Bearer","expires_in":3601,"scope":"mock-granted-scopes","user_id":"12348"}"#;
        let (service, session, http) = service_with(vec![HttpResponse {
            status: 200,
            headers: http::HeaderMap::new(),
            body: body.to_string(),
        }]);

        service.start_session_with_auth_token("mock-username", "mock-auth-token").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.refresh_token(), "mock-refresh-token");
        assert_eq!(session.user_id(), "12348");

        let requests = http.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body, "auth_token=mock-auth-token&client_id=cid&grant_type=auth_token&scope=ALL");
    }

    #[tokio::test]
    async fn access_token_auth_error_triggers_revoke_after_cancel() {
        let (service, session, http) = service_with(vec![HttpResponse {
            status: 401,
            headers: http::HeaderMap::new(),
            body: r#"{"error":"invalid_grant"}"#.to_string(),
        }]);
        session.set_state(SessionState::Starting);
        session.set_refresh_token("mock-refresh-token");
        session.set_user_id("uid");
        session.set_username("mock-username");
        session.set_start_method(StartMethod::AuthToken);
        session.set_state(SessionState::InProgress);

        let client: Arc<dyn AccessTokenClient> = Arc::new(TestClient {
            name: "sync".into(),
            ..Default::default()
        });
        service.register_client(&client);
        service.request_access_token("sync", ScopeSet::single("mock-scope-4")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.state(), SessionState::AuthError);
        assert!(session.refresh_token().is_empty());

        // the auth-error response issued a RevokeTokenRequest after
        // cancel_all_requests, so exactly the access-token POST plus the
        // revoke POST were ever sent.
        let requests = http.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].url.path().contains("revoketoken"));
    }

    #[tokio::test]
    async fn request_deferred_until_cache_loads() {
        let prefs = Arc::new(MemPrefStore::default());
        let crypto: Arc<dyn CryptoOps> = Arc::new(PlaintextCrypto);
        let session = Arc::new(PersistentSession::new(prefs.clone(), crypto.clone(), false));
        session.set_state(SessionState::Starting);
        session.set_refresh_token("rt");
        session.set_user_id("uid");
        session.set_username("mock-username");
        session.set_start_method(StartMethod::AuthToken);
        session.set_state(SessionState::InProgress);
        session.store();

        let scopes = ScopeSet::single("mock-scope-4");
        let store = Arc::new(FakeTokenStore::default());
        store.rows.lock().unwrap().push(StoredTokenRow {
            client_name: "sync".into(),
            encoded_scopes: scopes.encode(),
            secret: "secret".into(),
            expires_at_unix: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
        });
        let token_cache = Arc::new(TokenCache::new(store));

        let clock = FakeClock::new();
        let http = Arc::new(ScriptedHttp::default());
        let network = NetworkRequestManager::new(http.clone(), clock.clone(), url_types());
        let throttler = Arc::new(RequestThrottler::new(
            clock.clone(),
            crate::throttler::BackoffPolicy::deterministic_for_tests(),
        ));
        let device_names = Arc::new(DeviceNameService::new(prefs, crypto, "test-device"));
        let service = AuthService::new(session, token_cache, network, throttler, device_names, clock, "cid", None);

        let client = Arc::new(TestClient {
            name: "sync".into(),
            ..Default::default()
        });
        let client_dyn: Arc<dyn AccessTokenClient> = client.clone();
        service.register_client(&client_dyn);

        service.request_access_token("sync", scopes).unwrap();
        assert!(http.requests.lock().unwrap().is_empty());
        assert!(client.completions.lock().unwrap().is_empty());

        service.initialize().await;
        assert_eq!(client.completions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn username_change_during_relogin_ends_session() {
        let (service, session, http) = service_with(vec![]);
        session.set_state(SessionState::Starting);
        session.set_refresh_token("rt");
        session.set_user_id("uid");
        session.set_username("mock-username");
        session.set_start_method(StartMethod::AuthToken);
        session.set_state(SessionState::InProgress);
        session.set_state(SessionState::AuthError);

        service.start_session_with_auth_token("mock-other-username", "mock-auth-token").unwrap();

        assert_eq!(session.state(), SessionState::Inactive);
        assert_eq!(service.last_end_reason(), Some(EndSessionReason::UsernameChangedDuringRelogin));
        assert!(http.requests.lock().unwrap().is_empty());
    }
}
