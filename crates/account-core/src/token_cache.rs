//! `TokenCache`: the in-memory map of cached access tokens, backed by an
//! encrypted [`crate::traits::TokenStore`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::scope::ScopeSet;
use crate::token::{cache_key, AuthToken};
use crate::traits::{DiagnosticSupplier, StoredTokenRow, TokenStore};

/// In-memory map keyed by `(client_name, scopes)`.
///
/// Loading is asynchronous: until [`Self::load`] completes, [`Self::get`]
/// simply misses (callers needing to defer on the load, as `AuthService`
/// does, must track that themselves — the cache has no notion of "pending
/// request").
#[derive(Debug)]
pub struct TokenCache {
    store: Arc<dyn TokenStore>,
    tokens: RwLock<HashMap<String, AuthToken>>,
    loaded: RwLock<bool>,
}

impl TokenCache {
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            tokens: RwLock::new(HashMap::new()),
            loaded: RwLock::new(false),
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        *self.loaded.read().expect("token cache lock poisoned")
    }

    /// Load the token table from disk. Rows that fail validity or expiry on
    /// load are silently dropped.
    ///
    /// # Errors
    /// Returns an error if the underlying [`TokenStore`] fails to read.
    pub async fn load(&self) -> Result<()> {
        self.load_at(Utc::now()).await
    }

    async fn load_at(&self, now: DateTime<Utc>) -> Result<()> {
        let rows = self.store.load().await?;
        let mut tokens = self.tokens.write().expect("token cache lock poisoned");
        for row in rows {
            let scopes = ScopeSet::from_encoded(&row.encoded_scopes);
            let Some(expires_at) = DateTime::from_timestamp(row.expires_at_unix, 0) else {
                continue;
            };
            let Some(token) = AuthToken::new(row.client_name, row.secret, scopes, expires_at)
            else {
                continue;
            };
            if token.is_expired_at(now) {
                continue;
            }
            // Duplicate (client_name, scopes) rows are tolerated on disk;
            // the last one read wins in memory rather than rejecting the
            // table outright.
            tokens.insert(token.cache_key(), token);
        }
        drop(tokens);
        *self.loaded.write().expect("token cache lock poisoned") = true;
        Ok(())
    }

    /// Look up a token. A hit that has since expired is evicted and treated
    /// as a miss.
    #[must_use]
    pub fn get(&self, client_name: &str, scopes: &ScopeSet) -> Option<AuthToken> {
        self.get_at(client_name, scopes, Utc::now())
    }

    fn get_at(&self, client_name: &str, scopes: &ScopeSet, now: DateTime<Utc>) -> Option<AuthToken> {
        let key = cache_key(client_name, scopes);
        let mut tokens = self.tokens.write().expect("token cache lock poisoned");
        match tokens.get(&key) {
            Some(token) if token.is_expired_at(now) => {
                tokens.remove(&key);
                None
            }
            Some(token) => Some(token.clone()),
            None => None,
        }
    }

    /// Insert a token. Rejects invalid or expired tokens, and rejects a
    /// duplicate key.
    pub fn put(&self, token: AuthToken) -> bool {
        if !token.is_valid() || token.is_expired() {
            return false;
        }
        let key = token.cache_key();
        let mut tokens = self.tokens.write().expect("token cache lock poisoned");
        if tokens.contains_key(&key) {
            return false;
        }
        tokens.insert(key, token);
        true
    }

    /// Remove a token matching `token` by equality.
    pub fn evict(&self, token: &AuthToken) {
        let mut tokens = self.tokens.write().expect("token cache lock poisoned");
        tokens.retain(|_, t| t != token);
    }

    /// Drop every in-memory token and clear the on-disk table.
    ///
    /// # Errors
    /// Returns an error if [`TokenStore::clear`] fails.
    pub async fn clear(&self) -> Result<()> {
        self.clear_memory_only();
        self.store.clear().await
    }

    /// Drop every in-memory token without touching disk. Callers that need
    /// a synchronous cut (e.g. ending a session) use this and fire the
    /// on-disk clear separately as a best-effort background task.
    pub fn clear_memory_only(&self) {
        self.tokens.write().expect("token cache lock poisoned").clear();
    }

    /// Write every non-expired, valid token back to disk, after first
    /// clearing the table.
    ///
    /// # Errors
    /// Returns an error if the underlying store fails to clear or save.
    pub async fn store(&self) -> Result<()> {
        let rows: Vec<StoredTokenRow> = {
            let tokens = self.tokens.read().expect("token cache lock poisoned");
            tokens
                .values()
                .filter(|t| t.is_valid() && !t.is_expired())
                .map(|t| StoredTokenRow {
                    client_name: t.client_name().to_string(),
                    encoded_scopes: t.scopes().encode(),
                    secret: t.secret().to_string(),
                    expires_at_unix: t.expires_at().timestamp(),
                })
                .collect()
        };
        self.store.clear().await?;
        self.store.save(rows).await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.read().expect("token cache lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSupplier for TokenCache {
    fn diagnostic_name(&self) -> &'static str {
        "token_cache"
    }

    fn diagnostic_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "loaded": self.is_loaded(),
            "cached_token_count": self.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTokenStore;
    use chrono::Duration;

    fn token(client: &str, scope: &str, expires_in: Duration) -> AuthToken {
        AuthToken::new(
            client,
            "secret",
            ScopeSet::single(scope),
            Utc::now() + expires_in,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let cache = TokenCache::new(Arc::new(FakeTokenStore::default()));
        let t = token("c", "s", Duration::hours(1));
        assert!(cache.put(t.clone()));
        assert_eq!(cache.get("c", &ScopeSet::single("s")), Some(t));
    }

    #[tokio::test]
    async fn expired_hit_is_evicted() {
        let cache = TokenCache::new(Arc::new(FakeTokenStore::default()));
        let t = token("c", "s", Duration::hours(1));
        let _ = cache.put(t);
        // Force expiry via get_at with a future "now".
        let future = Utc::now() + Duration::hours(2);
        assert_eq!(cache.get_at("c", &ScopeSet::single("s"), future), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn rejects_duplicate_key() {
        let cache = TokenCache::new(Arc::new(FakeTokenStore::default()));
        let t1 = token("c", "s", Duration::hours(1));
        let t2 = token("c", "s", Duration::hours(2));
        assert!(cache.put(t1));
        assert!(!cache.put(t2));
    }

    #[tokio::test]
    async fn store_then_load_roundtrips() {
        let store = Arc::new(FakeTokenStore::default());
        let cache = TokenCache::new(store.clone());
        cache.put(token("c", "s", Duration::hours(1)));
        cache.store().await.unwrap();

        let cache2 = TokenCache::new(store);
        cache2.load().await.unwrap();
        assert_eq!(cache2.len(), 1);
    }

    #[tokio::test]
    async fn load_drops_expired_rows() {
        let store = Arc::new(FakeTokenStore::default());
        store.rows.lock().unwrap().push(StoredTokenRow {
            client_name: "c".into(),
            encoded_scopes: "s".into(),
            secret: "secret".into(),
            expires_at_unix: 1, // 1970, long expired
        });
        let cache = TokenCache::new(store);
        cache.load().await.unwrap();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn clear_empties_memory_and_store() {
        let store = Arc::new(FakeTokenStore::default());
        let cache = TokenCache::new(store.clone());
        cache.put(token("c", "s", Duration::hours(1)));
        cache.store().await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.len(), 0);
        assert!(store.rows.lock().unwrap().is_empty());
    }
}
