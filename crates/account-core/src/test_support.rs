//! Shared test fakes, grounded on `examples/original_source/common/oauth2/
//! **/*_mock.h`: hand-written mock structs behind the crate's own traits,
//! used across this crate's unit tests instead of a real platform.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::{CryptoOps, PrefStore, TickClock, TokenStore};

#[derive(Debug, Default)]
pub struct MemPrefStore(Mutex<HashMap<String, String>>);

#[async_trait]
impl PrefStore for MemPrefStore {
    fn get_string(&self, path: &str) -> Option<String> {
        self.0.lock().unwrap().get(path).cloned()
    }
    fn set_string(&self, path: &str, value: &str) {
        self.0.lock().unwrap().insert(path.to_string(), value.to_string());
    }
    fn clear(&self, path: &str) {
        self.0.lock().unwrap().remove(path);
    }
    async fn commit_pending_writes(&self) {}
}

/// A no-op "crypto" that round-trips plaintext, for tests that only care
/// about the state machine, not confidentiality.
#[derive(Debug, Default)]
pub struct PlaintextCrypto;

impl CryptoOps for PlaintextCrypto {
    fn os_encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }
    fn os_decrypt(&self, ciphertext_b64: &str) -> Result<String> {
        Ok(ciphertext_b64.to_string())
    }
    fn hmac_sha1_hex(&self, _key: &[u8], _data: &[u8]) -> String {
        "deadbeef".to_string()
    }
    fn sha1_hex(&self, _data: &[u8]) -> String {
        "deadbeef".to_string()
    }
    fn md5_base64(&self, _data: &[u8]) -> String {
        "ZmFrZQ==".to_string()
    }
}

#[derive(Debug, Default)]
pub struct FakeTokenStore {
    pub rows: Mutex<Vec<crate::traits::StoredTokenRow>>,
}

#[async_trait]
impl TokenStore for FakeTokenStore {
    async fn load(&self) -> Result<Vec<crate::traits::StoredTokenRow>> {
        Ok(self.rows.lock().unwrap().clone())
    }
    async fn save(&self, rows: Vec<crate::traits::StoredTokenRow>) -> Result<()> {
        *self.rows.lock().unwrap() = rows;
        Ok(())
    }
    async fn clear(&self) -> Result<()> {
        self.rows.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeClock(RwLock<Instant>);

impl FakeClock {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self(RwLock::new(Instant::now())))
    }

    pub fn advance(&self, d: std::time::Duration) {
        *self.0.write().unwrap() += d;
    }
}

impl TickClock for FakeClock {
    fn now(&self) -> Instant {
        *self.0.read().unwrap()
    }
}
