//! `PersistentSession`: the OAuth2 session state machine and its encrypted
//! at-rest profile.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::traits::{CryptoOps, DiagnosticSupplier, PrefStore};

const PREF_KEY: &str = "opera.oauth2.session";

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    Unset,
    Inactive,
    Starting,
    InProgress,
    Finishing,
    AuthError,
}

impl SessionState {
    fn as_i32(self) -> i32 {
        match self {
            SessionState::Unset => 0,
            SessionState::Inactive => 1,
            SessionState::Starting => 2,
            SessionState::InProgress => 3,
            SessionState::Finishing => 4,
            SessionState::AuthError => 5,
        }
    }

    fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => SessionState::Unset,
            1 => SessionState::Inactive,
            2 => SessionState::Starting,
            3 => SessionState::InProgress,
            4 => SessionState::Finishing,
            5 => SessionState::AuthError,
            _ => return None,
        })
    }

    /// Only these three states are ever written to disk.
    fn is_storable(self) -> bool {
        matches!(
            self,
            SessionState::Inactive | SessionState::InProgress | SessionState::AuthError
        )
    }
}

/// How the current session was started (legacy migration vs. fresh login).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StartMethod {
    Unset,
    Oauth1Migration,
    AuthToken,
}

impl StartMethod {
    fn as_i32(self) -> i32 {
        match self {
            StartMethod::Unset => 0,
            StartMethod::Oauth1Migration => 1,
            StartMethod::AuthToken => 2,
        }
    }

    fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => StartMethod::Unset,
            1 => StartMethod::Oauth1Migration,
            2 => StartMethod::AuthToken,
            _ => return None,
        })
    }
}

/// The mutable fields of a session, mirrored 1:1 with the persisted blob.
#[derive(Debug, Clone, Default)]
struct Fields {
    state: Option<SessionState>,
    refresh_token: String,
    user_id: String,
    username: String,
    session_id: String,
    start_method: Option<StartMethod>,
    start_time: DateTime<Utc>,
}

impl Fields {
    fn invariant_holds(&self, state: SessionState) -> bool {
        match state {
            SessionState::Inactive => {
                self.username.is_empty()
                    && self.refresh_token.is_empty()
                    && self.session_id.is_empty()
                    && self.user_id.is_empty()
                    && self.start_method.unwrap_or(StartMethod::Unset) == StartMethod::Unset
                    && self.start_time == DateTime::<Utc>::UNIX_EPOCH
            }
            SessionState::InProgress => {
                !self.username.is_empty()
                    && !self.refresh_token.is_empty()
                    && !self.session_id.is_empty()
                    && !self.user_id.is_empty()
                    && self.start_method.unwrap_or(StartMethod::Unset) != StartMethod::Unset
            }
            SessionState::AuthError => {
                !self.username.is_empty()
                    && !self.session_id.is_empty()
                    && !self.user_id.is_empty()
                    && self.start_method.unwrap_or(StartMethod::Unset) != StartMethod::Unset
                    && self.refresh_token.is_empty()
            }
            // Starting/Finishing/Unset are transient and never persisted,
            // so there's no stored invariant to check for them.
            SessionState::Starting | SessionState::Finishing | SessionState::Unset => true,
        }
    }
}

/// Snapshot of the session state, delivered to observers instead of a
/// back-pointer into `PersistentSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStateChange {
    pub state: SessionState,
    pub at: DateTime<Utc>,
}

/// A boxed observer callback, fired only after the new state is already
/// fully updated and persisted.
pub type StateObserver = Box<dyn Fn(SessionStateChange) + Send + Sync>;

/// The session state machine plus its encrypted at-rest profile.
pub struct PersistentSession {
    prefs: Arc<dyn PrefStore>,
    crypto: Arc<dyn CryptoOps>,
    full_metrics_enabled: bool,
    fields: RwLock<Fields>,
    observers: RwLock<Vec<StateObserver>>,
}

impl std::fmt::Debug for PersistentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PersistentSession {
    #[must_use]
    pub fn new(prefs: Arc<dyn PrefStore>, crypto: Arc<dyn CryptoOps>, full_metrics_enabled: bool) -> Self {
        Self {
            prefs,
            crypto,
            full_metrics_enabled,
            fields: RwLock::new(Fields {
                state: Some(SessionState::Inactive),
                ..Fields::default()
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: StateObserver) {
        self.observers.write().expect("session lock poisoned").push(observer);
    }

    /// Load the session synchronously from the pref store. A stored blob
    /// failing its invariant is discarded and replaced with `Inactive`,
    /// and the clean `Inactive` blob is written back so a subsequent load
    /// doesn't see the same corrupt state again.
    pub fn load(&self) {
        let loaded = self.try_load();
        let was_corrupt = matches!(loaded, LoadOutcome::Corrupt);
        {
            let mut fields = self.fields.write().expect("session lock poisoned");
            *fields = loaded.unwrap_or_default_inactive();
        }
        if was_corrupt {
            self.store();
        }
    }

    fn try_load(&self) -> LoadOutcome {
        let Some(raw_state) = self.prefs.get_string(&format!("{PREF_KEY}.session_state")) else {
            return LoadOutcome::Absent;
        };
        let Ok(state_int) = raw_state.parse::<i32>() else {
            return LoadOutcome::Corrupt;
        };
        let Some(state) = SessionState::from_i32(state_int) else {
            return LoadOutcome::Corrupt;
        };

        let decrypt = |suffix: &str| -> String {
            self.prefs
                .get_string(&format!("{PREF_KEY}.{suffix}"))
                .and_then(|enc| self.crypto.os_decrypt(&enc).ok())
                .unwrap_or_default()
        };
        let decrypt_i64 = |suffix: &str| -> i64 {
            self.prefs
                .get_string(&format!("{PREF_KEY}.{suffix}"))
                .and_then(|enc| self.crypto.os_decrypt_i64(&enc).ok())
                .unwrap_or_default()
        };

        let start_method = self
            .prefs
            .get_string(&format!("{PREF_KEY}.start_method"))
            .and_then(|s| s.parse::<i32>().ok())
            .and_then(StartMethod::from_i32);

        let fields = Fields {
            state: Some(state),
            refresh_token: decrypt("refresh_token"),
            user_id: decrypt("user_id"),
            username: decrypt("user_name"),
            session_id: decrypt("session_id"),
            start_method,
            start_time: DateTime::from_timestamp(decrypt_i64("start_time"), 0)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        };

        if fields.invariant_holds(state) {
            LoadOutcome::Valid(fields)
        } else {
            LoadOutcome::Corrupt
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.fields
            .read()
            .expect("session lock poisoned")
            .state
            .unwrap_or(SessionState::Unset)
    }

    #[must_use]
    pub fn refresh_token(&self) -> String {
        self.fields.read().expect("session lock poisoned").refresh_token.clone()
    }

    #[must_use]
    pub fn user_id(&self) -> String {
        self.fields.read().expect("session lock poisoned").user_id.clone()
    }

    #[must_use]
    pub fn username(&self) -> String {
        self.fields.read().expect("session lock poisoned").username.clone()
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        self.fields.read().expect("session lock poisoned").session_id.clone()
    }

    /// Returns the session id iff the user opted into full metrics,
    /// otherwise an empty string.
    #[must_use]
    pub fn session_id_for_diagnostics(&self) -> String {
        if self.full_metrics_enabled {
            self.session_id()
        } else {
            String::new()
        }
    }

    pub fn set_username(&self, username: impl Into<String>) {
        self.fields.write().expect("session lock poisoned").username = username.into();
    }

    pub fn set_start_method(&self, method: StartMethod) {
        self.fields.write().expect("session lock poisoned").start_method = Some(method);
    }

    pub fn set_refresh_token(&self, token: impl Into<String>) {
        self.fields.write().expect("session lock poisoned").refresh_token = token.into();
    }

    pub fn set_user_id(&self, user_id: impl Into<String>) {
        self.fields.write().expect("session lock poisoned").user_id = user_id.into();
    }

    /// The single mutation point for session state.
    ///
    /// Entering `Starting` regenerates `session_id` and sets `start_time`.
    /// Entering `AuthError` clears `refresh_token` and `user_id`. Entering
    /// `Inactive` clears everything. Fires the state-change callback after
    /// the new state is set.
    pub fn set_state(&self, new_state: SessionState) {
        {
            let mut fields = self.fields.write().expect("session lock poisoned");
            match new_state {
                SessionState::Starting => {
                    if fields.session_id.is_empty() {
                        fields.session_id = Uuid::new_v4().to_string();
                    }
                    fields.start_time = Utc::now();
                }
                SessionState::AuthError => {
                    fields.refresh_token.clear();
                    fields.user_id.clear();
                }
                SessionState::Inactive => {
                    fields.refresh_token.clear();
                    fields.user_id.clear();
                    fields.username.clear();
                    fields.session_id.clear();
                    fields.start_method = Some(StartMethod::Unset);
                    fields.start_time = DateTime::<Utc>::UNIX_EPOCH;
                }
                SessionState::InProgress | SessionState::Finishing | SessionState::Unset => {}
            }
            fields.state = Some(new_state);
        }
        let change = SessionStateChange {
            state: new_state,
            at: Utc::now(),
        };
        for observer in self.observers.read().expect("session lock poisoned").iter() {
            observer(change);
        }
    }

    /// Clear all session data and transition to `Inactive`. Distinct from
    /// `set_state(Inactive)` only in name — kept as a separate method to
    /// mirror the original's `Clear()` call site in `end_session`.
    pub fn clear(&self) {
        self.set_state(SessionState::Inactive);
    }

    /// Persist the current state if it is one of the storable states
    ///.
    pub fn store(&self) {
        let fields = self.fields.read().expect("session lock poisoned");
        let Some(state) = fields.state else { return };
        if !state.is_storable() {
            return;
        }

        self.prefs
            .set_string(&format!("{PREF_KEY}.session_state"), &state.as_i32().to_string());
        self.prefs.set_string(
            &format!("{PREF_KEY}.start_method"),
            &fields.start_method.unwrap_or(StartMethod::Unset).as_i32().to_string(),
        );

        let mut encrypt = |suffix: &str, plaintext: &str| {
            if let Ok(enc) = self.crypto.os_encrypt(plaintext) {
                self.prefs.set_string(&format!("{PREF_KEY}.{suffix}"), &enc);
            }
        };
        encrypt("refresh_token", &fields.refresh_token);
        encrypt("user_id", &fields.user_id);
        encrypt("user_name", &fields.username);
        encrypt("session_id", &fields.session_id);
        if let Ok(enc) = self.crypto.os_encrypt_i64(fields.start_time.timestamp()) {
            self.prefs.set_string(&format!("{PREF_KEY}.start_time"), &enc);
        }
    }
}

enum LoadOutcome {
    Absent,
    Corrupt,
    Valid(Fields),
}

impl LoadOutcome {
    fn unwrap_or_default_inactive(self) -> Fields {
        match self {
            LoadOutcome::Valid(fields) => fields,
            LoadOutcome::Absent | LoadOutcome::Corrupt => Fields {
                state: Some(SessionState::Inactive),
                ..Fields::default()
            },
        }
    }
}

impl DiagnosticSupplier for PersistentSession {
    fn diagnostic_name(&self) -> &'static str {
        "session"
    }

    fn diagnostic_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "state": format!("{:?}", self.state()),
            "has_refresh_token": !self.refresh_token().is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemPrefStore, PlaintextCrypto};

    fn session() -> PersistentSession {
        PersistentSession::new(Arc::new(MemPrefStore::default()), Arc::new(PlaintextCrypto), false)
    }

    #[test]
    fn starts_inactive() {
        assert_eq!(session().state(), SessionState::Inactive);
    }

    #[test]
    fn starting_generates_session_id() {
        let s = session();
        s.set_state(SessionState::Starting);
        assert!(!s.session_id().is_empty());
    }

    #[test]
    fn session_id_survives_auth_error_oscillation() {
        let s = session();
        s.set_state(SessionState::Starting);
        let id = s.session_id();
        s.set_refresh_token("rt");
        s.set_user_id("uid");
        s.set_username("user");
        s.set_state(SessionState::InProgress);
        s.set_state(SessionState::AuthError);
        assert_eq!(s.session_id(), id);
        s.set_state(SessionState::Starting);
        assert_eq!(s.session_id(), id, "re-login while AUTH_ERROR keeps the same id");
    }

    #[test]
    fn new_login_from_inactive_regenerates_session_id() {
        let s = session();
        s.set_state(SessionState::Starting);
        let id1 = s.session_id();
        s.set_state(SessionState::Inactive);
        s.set_state(SessionState::Starting);
        assert_ne!(s.session_id(), id1);
    }

    #[test]
    fn auth_error_clears_refresh_token_and_user_id() {
        let s = session();
        s.set_state(SessionState::Starting);
        s.set_refresh_token("rt");
        s.set_user_id("uid");
        s.set_username("user");
        s.set_state(SessionState::InProgress);
        s.set_state(SessionState::AuthError);
        assert!(s.refresh_token().is_empty());
        assert!(s.user_id().is_empty());
        assert!(!s.username().is_empty());
    }

    #[test]
    fn store_then_load_roundtrips_in_progress() {
        let prefs = Arc::new(MemPrefStore::default());
        let crypto: Arc<dyn CryptoOps> = Arc::new(PlaintextCrypto);
        let s = PersistentSession::new(prefs.clone(), crypto.clone(), false);
        s.set_state(SessionState::Starting);
        s.set_refresh_token("rt");
        s.set_user_id("uid");
        s.set_username("user");
        s.set_start_method(StartMethod::AuthToken);
        s.set_state(SessionState::InProgress);
        s.store();

        let s2 = PersistentSession::new(prefs, crypto, false);
        s2.load();
        assert_eq!(s2.state(), SessionState::InProgress);
        assert_eq!(s2.refresh_token(), "rt");
    }

    #[test]
    fn invariant_violation_normalizes_to_inactive() {
        let prefs = Arc::new(MemPrefStore::default());
        // IN_PROGRESS with an empty refresh_token violates the invariant.
        prefs.set_string(
            &format!("{PREF_KEY}.session_state"),
            &SessionState::InProgress.as_i32().to_string(),
        );
        let crypto: Arc<dyn CryptoOps> = Arc::new(PlaintextCrypto);
        let s = PersistentSession::new(prefs.clone(), crypto, false);
        s.load();
        assert_eq!(s.state(), SessionState::Inactive);

        // The corrupt blob is overwritten in the store too, not just in memory.
        assert_eq!(
            prefs.get_string(&format!("{PREF_KEY}.session_state")),
            Some(SessionState::Inactive.as_i32().to_string())
        );
    }

    #[test]
    fn diagnostics_enabled_returns_session_id() {
        let prefs = Arc::new(MemPrefStore::default());
        let crypto: Arc<dyn CryptoOps> = Arc::new(PlaintextCrypto);
        let s = PersistentSession::new(prefs, crypto, true);
        s.set_state(SessionState::Starting);
        assert!(!s.session_id_for_diagnostics().is_empty());
    }

    #[test]
    fn diagnostics_disabled_returns_empty() {
        let s = session();
        s.set_state(SessionState::Starting);
        assert!(s.session_id_for_diagnostics().is_empty());
    }
}
