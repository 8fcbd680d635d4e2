//! `DeviceNameService`: tracks whether the current device name has changed
//! since it was last reported to the identity provider.

use std::sync::{Arc, RwLock};

use crate::traits::{CryptoOps, PrefStore};

const PREF_KEY: &str = "opera.oauth2.last_device_name";

/// Compares the current device name against the last one successfully
/// reported, so `AccessTokenRequest` only sends `device_name` when it
/// changed.
pub struct DeviceNameService {
    prefs: Arc<dyn PrefStore>,
    crypto: Arc<dyn CryptoOps>,
    current_name: RwLock<String>,
}

impl std::fmt::Debug for DeviceNameService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceNameService").finish_non_exhaustive()
    }
}

impl DeviceNameService {
    #[must_use]
    pub fn new(prefs: Arc<dyn PrefStore>, crypto: Arc<dyn CryptoOps>, current_name: impl Into<String>) -> Self {
        Self {
            prefs,
            crypto,
            current_name: RwLock::new(current_name.into()),
        }
    }

    #[must_use]
    pub fn current_name(&self) -> String {
        self.current_name.read().expect("device name lock poisoned").clone()
    }

    fn last_reported_name(&self) -> Option<String> {
        let encrypted = self.prefs.get_string(PREF_KEY)?;
        self.crypto.os_decrypt(&encrypted).ok()
    }

    /// Whether the current device name differs from the last one reported.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.last_reported_name().as_deref() != Some(self.current_name().as_str())
    }

    /// Record that `name` was just reported to the server.
    pub fn store(&self, name: &str) {
        if let Ok(encrypted) = self.crypto.os_encrypt(name) {
            self.prefs.set_string(PREF_KEY, &encrypted);
        }
    }

    /// Forget the last reported name, so the next request reports again
    ///.
    pub fn clear_last_sent(&self) {
        self.prefs.clear(PREF_KEY);
    }
}
