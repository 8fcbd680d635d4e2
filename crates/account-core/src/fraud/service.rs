//! `FraudProtectionService`: per-host rating cache, request dedup, and
//! sitecheck dispatch.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::fraud::rated_server::{FraudRatedServer, FraudUrlRating, FraudVerdict};
use crate::traits::{CryptoOps, DiagnosticSupplier, HttpClient, PreparedRequest, TickClock};

/// Invoked once per rated URL, either synchronously (cache hit, or a
/// rejected URL/host) or from the sitecheck response handler.
pub type RatingCallback = Box<dyn FnOnce(FraudUrlRating) + Send>;

const MAX_SERVER_LIST_SIZE: usize = 512;
const CLEANUP_MIN_INTERVAL: Duration = Duration::from_secs(60 * 60);
const GRACE_PERIOD_INITIAL: Duration = Duration::from_secs(4 * 60);
const GRACE_PERIOD_MAX: Duration = Duration::from_secs(64 * 60);

struct GraceState {
    last_failure: Option<Instant>,
    grace_period: Duration,
}

impl Default for GraceState {
    fn default() -> Self {
        Self {
            last_failure: None,
            grace_period: Duration::ZERO,
        }
    }
}

impl GraceState {
    /// The failure clock starts zero-epoch and the grace period starts
    /// zero, so the very first call is always allowed through.
    fn may_start(&self, now: Instant) -> bool {
        match self.last_failure {
            None => true,
            Some(last) => now.duration_since(last) >= self.grace_period,
        }
    }

    fn record_failure(&mut self, now: Instant) {
        self.grace_period = if self.grace_period.is_zero() {
            GRACE_PERIOD_INITIAL
        } else {
            (self.grace_period * 2).min(GRACE_PERIOD_MAX)
        };
        self.last_failure = Some(now);
    }
}

struct Inner {
    http: Arc<dyn HttpClient>,
    crypto: Arc<dyn CryptoOps>,
    clock: Arc<dyn TickClock>,
    sitecheck_host: Mutex<String>,
    is_secure: bool,
    servers: Mutex<HashMap<String, FraudRatedServer>>,
    pending: Mutex<HashMap<String, Vec<(String, RatingCallback)>>>,
    grace: Mutex<HashMap<String, GraceState>>,
    last_cleanup: Mutex<Option<Instant>>,
}

/// Rates URLs for phishing/malware against a remote sitecheck service,
/// caching verdicts per host and deduplicating in-flight lookups (spec
/// §4.8, §4.9). Cheaply `Clone`.
#[derive(Clone)]
pub struct FraudProtectionService {
    inner: Arc<Inner>,
    self_weak: Weak<Inner>,
}

impl std::fmt::Debug for FraudProtectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FraudProtectionService").finish_non_exhaustive()
    }
}

impl FraudProtectionService {
    #[must_use]
    pub fn new(
        http: Arc<dyn HttpClient>,
        crypto: Arc<dyn CryptoOps>,
        clock: Arc<dyn TickClock>,
        sitecheck_host: impl Into<String>,
        is_secure: bool,
    ) -> Self {
        let inner = Arc::new(Inner {
            http,
            crypto,
            clock,
            sitecheck_host: Mutex::new(sitecheck_host.into()),
            is_secure,
            servers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            grace: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(None),
        });
        let self_weak = Arc::downgrade(&inner);
        Self { inner, self_weak }
    }

    /// CLI override for the sitecheck host.
    pub fn set_sitecheck_host(&self, host: impl Into<String>) {
        *self.inner.sitecheck_host.lock().expect("fraud service lock poisoned") = host.into();
    }

    /// Rate `url`, optionally supplying its already-resolved `ip` so a
    /// private address can be rejected without a sitecheck round-trip.
    pub fn get_url_rating(&self, url: &str, ip: Option<&str>, callback: RatingCallback) {
        let Ok(parsed) = url::Url::parse(url) else {
            callback(FraudUrlRating::not_rated(false));
            return;
        };
        if !matches!(parsed.scheme(), "http" | "https" | "ftp") {
            callback(FraudUrlRating::not_rated(false));
            return;
        }
        let Some(host) = parsed.host_str() else {
            callback(FraudUrlRating::not_rated(false));
            return;
        };
        let host = host.to_ascii_lowercase();
        if is_nonunique_host(&host) {
            callback(FraudUrlRating::not_rated(false));
            return;
        }
        if let Some(ip) = ip {
            if is_private_ip(ip) {
                callback(FraudUrlRating::not_rated(false));
                return;
            }
        }

        let rating_if_ready = {
            let mut servers = self.inner.servers.lock().expect("fraud service lock poisoned");
            let server = servers.entry(host.clone()).or_insert_with(|| FraudRatedServer::new(host.clone()));
            if server.is_rated() {
                Some(server.get_rating_for_url(url))
            } else {
                None
            }
        };
        if let Some(rating) = rating_if_ready {
            callback(rating);
            return;
        }

        self.inner
            .pending
            .lock()
            .expect("fraud service lock poisoned")
            .entry(host.clone())
            .or_default()
            .push((url.to_string(), callback));

        self.start_rating(&host);
    }

    /// Kick off (or skip, if already in flight or within the failure grace
    /// period) a sitecheck request for `host`.
    fn start_rating(&self, host: &str) {
        let now = self.inner.clock.now();
        let allowed = {
            let grace = self.inner.grace.lock().expect("fraud service lock poisoned");
            grace.get(host).map_or(true, |g| g.may_start(now))
        };
        if !allowed {
            debug!(host, "fraud rating skipped, still within failure grace period");
            return;
        }

        let began = {
            let mut servers = self.inner.servers.lock().expect("fraud service lock poisoned");
            servers.get_mut(host).is_some_and(FraudRatedServer::begin_rating)
        };
        if !began {
            // Either already RATING_IN_PROGRESS (dedup: the response
            // already in flight will drain this host's pending list too),
            // or the server doesn't exist, which should not happen since
            // `get_url_rating` always inserts one first.
            return;
        }

        let request_url = {
            let servers = self.inner.servers.lock().expect("fraud service lock poisoned");
            let sitecheck_host = self.inner.sitecheck_host.lock().expect("fraud service lock poisoned").clone();
            servers
                .get(host)
                .map(|s| s.request_url(&sitecheck_host, self.inner.is_secure, self.inner.crypto.as_ref()))
        };
        let Some(request_url) = request_url else { return };

        let weak = self.self_weak.clone();
        let host = host.to_string();
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else { return };
            let prepared = PreparedRequest {
                method: http::Method::GET,
                url: request_url,
                headers: http::HeaderMap::new(),
                body: String::new(),
            };
            let result = inner.http.execute(prepared).await;
            let success = match result {
                Ok(response) if response.status == 200 => {
                    let mut servers = inner.servers.lock().expect("fraud service lock poisoned");
                    servers.get_mut(&host).is_some_and(|s| s.apply_response(&response.body))
                }
                Ok(_) | Err(_) => {
                    let mut servers = inner.servers.lock().expect("fraud service lock poisoned");
                    if let Some(server) = servers.get_mut(&host) {
                        server.mark_rating_failed();
                    }
                    false
                }
            };
            if !success {
                let now = inner.clock.now();
                inner
                    .grace
                    .lock()
                    .expect("fraud service lock poisoned")
                    .entry(host.clone())
                    .or_default()
                    .record_failure(now);
                warn!(host, "sitecheck rating request failed");
            }
            FraudProtectionService::finish_rating(&inner, &host);
        });

        self.maybe_prune_server_list();
    }

    fn finish_rating(inner: &Arc<Inner>, host: &str) {
        let pending = inner.pending.lock().expect("fraud service lock poisoned").remove(host);
        let Some(pending) = pending else { return };
        let servers = inner.servers.lock().expect("fraud service lock poisoned");
        let Some(server) = servers.get(host) else { return };
        for (url, callback) in pending {
            callback(server.get_rating_for_url(&url));
        }
    }

    /// User override: never re-rate this host for the rest of the session
    ///.
    pub fn bypass_url_rating(&self, hostname: &str) {
        let mut servers = self.inner.servers.lock().expect("fraud service lock poisoned");
        if let Some(server) = servers.get_mut(&hostname.to_ascii_lowercase()) {
            server.mark_bypassed();
        }
    }

    /// Drop expired servers if the table has grown past the cap, at most
    /// once per hour. Deliberately does not re-schedule if still over the
    /// cap after one pass.
    fn maybe_prune_server_list(&self) {
        let mut servers = self.inner.servers.lock().expect("fraud service lock poisoned");
        if servers.len() <= MAX_SERVER_LIST_SIZE {
            return;
        }
        let now = self.inner.clock.now();
        let mut last_cleanup = self.inner.last_cleanup.lock().expect("fraud service lock poisoned");
        if last_cleanup.is_some_and(|last| now.duration_since(last) < CLEANUP_MIN_INTERVAL) {
            return;
        }
        *last_cleanup = Some(now);
        let before = servers.len();
        servers.retain(|_, s| !s.is_expired());
        debug!(before, after = servers.len(), "pruned expired fraud-rated servers");
    }
}

impl DiagnosticSupplier for FraudProtectionService {
    fn diagnostic_name(&self) -> &'static str {
        "fraud_protection_service"
    }

    fn diagnostic_snapshot(&self) -> serde_json::Value {
        let servers = self.inner.servers.lock().expect("fraud service lock poisoned");
        let pending = self.inner.pending.lock().expect("fraud service lock poisoned");
        serde_json::json!({
            "rated_server_count": servers.len(),
            "pending_host_count": pending.len(),
        })
    }
}

/// Chromium-style "non-unique hostname": single-label names (`localhost`,
/// an internal hostname with no dot), `.local` mDNS names, and literal
/// private/loopback IP addresses never get sitecheck-rated.
fn is_nonunique_host(host: &str) -> bool {
    if host.ends_with(".local") {
        return true;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_private_ip_addr(ip);
    }
    !host.contains('.')
}

fn is_private_ip(ip: &str) -> bool {
    ip.parse::<IpAddr>().is_ok_and(is_private_ip_addr)
}

/// Private-network CIDR prefixes: IPv4 10/8, 127/8, 172.16/12, 192.168/16;
/// IPv6 fc00::/7, fec0::/10, ::1/128.
fn is_private_ip_addr(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 10 || o[0] == 127 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            let seg0 = v6.segments()[0];
            (seg0 & 0xfe00) == 0xfc00 || (seg0 & 0xffc0) == 0xfec0
        }
    }
}
