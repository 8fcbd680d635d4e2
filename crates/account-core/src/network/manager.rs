//! `NetworkRequestManager`: schedules `NetworkRequest`s, applies per-request
//! backoff, honors `Retry-After`, blocks insecure schemes, treats redirects
//! as terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, trace, warn};
use url::Url;

use crate::network::request::{NetworkRequest, NetworkResponseStatus, UrlType};
use crate::traits::{HttpClient, PreparedRequest, TickClock};

/// Receives the outcome of a request this manager ran.
///
/// Held by weak reference: a gone consumer causes the response to be
/// logged and discarded rather than delivered.
pub trait RequestConsumer: Send + Sync {
    fn on_network_request_finished(&self, request: &Arc<dyn NetworkRequest>, status: NetworkResponseStatus);
}

/// `(base_url, allow_insecure)` per [`UrlType`].
#[derive(Debug, Clone)]
pub struct UrlTypeConfig {
    pub base_url: Url,
    pub allow_insecure: bool,
}

struct PendingRequest {
    request: Arc<dyn NetworkRequest>,
    consumer: Weak<dyn RequestConsumer>,
    failure_count: u32,
}

struct Inner {
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn TickClock>,
    url_types: HashMap<UrlType, UrlTypeConfig>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    next_id: Mutex<u64>,
}

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MULTIPLIER: f64 = 2.0;
const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

fn backoff_delay(failure_count: u32) -> Duration {
    let secs = (BACKOFF_INITIAL.as_secs_f64() * BACKOFF_MULTIPLIER.powi(failure_count as i32))
        .min(BACKOFF_MAX.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Schedules [`NetworkRequest`]s against their resolved base URL, retrying
/// on failure with exponential backoff and honoring server-supplied
/// `Retry-After` delays. Cheaply `Clone`: every clone shares the same state
/// via an internal `Arc`.
#[derive(Clone)]
pub struct NetworkRequestManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NetworkRequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRequestManager").finish_non_exhaustive()
    }
}

impl NetworkRequestManager {
    #[must_use]
    pub fn new(
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn TickClock>,
        url_types: HashMap<UrlType, UrlTypeConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                clock,
                url_types,
                pending: Mutex::new(HashMap::new()),
                next_id: Mutex::new(0),
            }),
        }
    }

    /// Begin running `request`, delivering its outcome to `consumer`.
    /// Scheduling is immediate (delay zero); retries back off from there.
    pub fn start_request(&self, request: Arc<dyn NetworkRequest>, consumer: Weak<dyn RequestConsumer>) {
        let id = {
            let mut next_id = self.inner.next_id.lock().expect("manager lock poisoned");
            let id = *next_id;
            *next_id += 1;
            id
        };
        self.inner.pending.lock().expect("manager lock poisoned").insert(
            id,
            PendingRequest {
                request,
                consumer,
                failure_count: 0,
            },
        );
        self.run_attempt(id);
    }

    /// Drop every in-flight and pending record immediately and
    /// synchronously; any scheduled retry for a purged record becomes a
    /// no-op once it observes the record is gone.
    pub fn cancel_all_requests(&self) {
        self.inner.pending.lock().expect("manager lock poisoned").clear();
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().expect("manager lock poisoned").len()
    }

    fn resolve_url(&self, request: &dyn NetworkRequest) -> Option<(Url, bool)> {
        let config = self.inner.url_types.get(&request.manager_url_type())?;
        let mut url = config.base_url.join(&request.path()).ok()?;
        let query = request.query_string();
        if !query.is_empty() {
            url.set_query(Some(&query));
        }
        Some((url, config.allow_insecure))
    }

    fn build_prepared_request(request: &dyn NetworkRequest, url: Url) -> PreparedRequest {
        let mut headers = http::HeaderMap::new();
        if let Some(ct) = request.content_type() {
            if let Ok(value) = http::HeaderValue::from_str(ct) {
                headers.insert(http::header::CONTENT_TYPE, value);
            }
        }
        for (name, value) in request.extra_headers() {
            headers.insert(name, value);
        }
        PreparedRequest {
            method: request.method(),
            url,
            headers,
            body: request.body(),
        }
    }

    fn deliver(request: &Arc<dyn NetworkRequest>, consumer: &Weak<dyn RequestConsumer>, status: NetworkResponseStatus) {
        match consumer.upgrade() {
            Some(consumer) => consumer.on_network_request_finished(request, status),
            None => warn!("consumer for finished network request is gone, discarding response"),
        }
    }

    /// Run (or re-run) the attempt for `id`, if it's still pending.
    fn run_attempt(&self, id: u64) {
        let (request, consumer) = {
            let pending = self.inner.pending.lock().expect("manager lock poisoned");
            let Some(entry) = pending.get(&id) else {
                return;
            };
            (entry.request.clone(), entry.consumer.clone())
        };

        let Some((url, allow_insecure)) = self.resolve_url(request.as_ref()) else {
            warn!("dropping request with unresolvable url type");
            self.inner.pending.lock().expect("manager lock poisoned").remove(&id);
            return;
        };

        if url.scheme() != "https" && !allow_insecure {
            debug!(%url, "blocking insecure connection");
            self.inner.pending.lock().expect("manager lock poisoned").remove(&id);
            Self::deliver(&request, &consumer, NetworkResponseStatus::InsecureConnectionForbidden);
            return;
        }

        let prepared = Self::build_prepared_request(request.as_ref(), url);
        let manager = self.clone();

        tokio::spawn(async move {
            let http = manager.inner.http.clone();
            let result = http.execute(prepared).await;

            let (status, retry_after) = match result {
                Ok(response) => {
                    let retry_after = response
                        .headers
                        .get(http::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    if response.status == 429 {
                        if retry_after.is_some() {
                            (NetworkResponseStatus::Throttled, retry_after)
                        } else {
                            (NetworkResponseStatus::HttpProblem, None)
                        }
                    } else if (300..400).contains(&response.status) {
                        // Redirects are never followed; a 3xx is fed to
                        // try_response as an ordinary non-2xx status, same
                        // as any other unexpected code.
                        (request.try_response(response.status, &response.body), None)
                    } else {
                        (request.try_response(response.status, &response.body), None)
                    }
                }
                Err(e) => {
                    trace!(error = %e, "transport error, will back off");
                    (NetworkResponseStatus::HttpProblem, None)
                }
            };

            match status {
                NetworkResponseStatus::Ok | NetworkResponseStatus::InsecureConnectionForbidden => {
                    manager.inner.pending.lock().expect("manager lock poisoned").remove(&id);
                    Self::deliver(&request, &consumer, status);
                }
                NetworkResponseStatus::HttpProblem | NetworkResponseStatus::ParseProblem => {
                    let delay = {
                        let mut guard = manager.inner.pending.lock().expect("manager lock poisoned");
                        let Some(entry) = guard.get_mut(&id) else {
                            return;
                        };
                        entry.failure_count += 1;
                        backoff_delay(entry.failure_count)
                    };
                    manager.sleep_then_retry(id, delay).await;
                }
                NetworkResponseStatus::Throttled => {
                    manager
                        .sleep_then_retry(id, retry_after.unwrap_or(Duration::ZERO))
                        .await;
                }
            }
        });
    }

    /// Sleep `delay` (driven by the injected monotonic clock, so tests can
    /// fast-forward it) then re-attempt, unless the record was cancelled
    /// meanwhile.
    async fn sleep_then_retry(&self, id: u64, delay: Duration) {
        let clock = self.inner.clock.clone();
        let deadline = clock.now() + delay;
        loop {
            if !self.inner.pending.lock().expect("manager lock poisoned").contains_key(&id) {
                return;
            }
            if clock.now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.run_attempt(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::request::RevokeTokenRequest;
    use crate::network::TokenTypeHint;
    use crate::test_support::FakeClock;
    use crate::traits::HttpResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StubHttp {
        responses: Mutex<Vec<Result<HttpResponse, ()>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for StubHttp {
        async fn execute(&self, _request: PreparedRequest) -> crate::error::Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            match responses.pop() {
                Some(Ok(r)) => Ok(r),
                _ => Ok(HttpResponse {
                    status: 200,
                    headers: http::HeaderMap::new(),
                    body: String::new(),
                }),
            }
        }
    }

    struct RecordingConsumer {
        statuses: Mutex<Vec<NetworkResponseStatus>>,
    }

    impl RequestConsumer for RecordingConsumer {
        fn on_network_request_finished(&self, _request: &Arc<dyn NetworkRequest>, status: NetworkResponseStatus) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    fn url_types() -> HashMap<UrlType, UrlTypeConfig> {
        let mut m = HashMap::new();
        m.insert(
            UrlType::OAuth2,
            UrlTypeConfig {
                base_url: Url::parse("https://auth.example.com").unwrap(),
                allow_insecure: false,
            },
        );
        m
    }

    #[tokio::test]
    async fn insecure_scheme_is_blocked_without_a_network_call() {
        let mut types = HashMap::new();
        types.insert(
            UrlType::OAuth2,
            UrlTypeConfig {
                base_url: Url::parse("http://auth.example.com").unwrap(),
                allow_insecure: false,
            },
        );
        let http = Arc::new(StubHttp {
            responses: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let manager = NetworkRequestManager::new(http.clone(), FakeClock::new(), types);
        let consumer = Arc::new(RecordingConsumer {
            statuses: Mutex::new(Vec::new()),
        });
        let request: Arc<dyn NetworkRequest> =
            Arc::new(RevokeTokenRequest::new("cid", "rt", TokenTypeHint::RefreshToken));
        manager.start_request(request, Arc::downgrade(&(consumer.clone() as Arc<dyn RequestConsumer>)));

        assert_eq!(http.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            consumer.statuses.lock().unwrap().as_slice(),
            &[NetworkResponseStatus::InsecureConnectionForbidden]
        );
    }

    #[tokio::test]
    async fn successful_response_delivers_ok_and_clears_pending() {
        let http = Arc::new(StubHttp {
            responses: Mutex::new(vec![Ok(HttpResponse {
                status: 200,
                headers: http::HeaderMap::new(),
                body: String::new(),
            })]),
            calls: AtomicUsize::new(0),
        });
        let manager = NetworkRequestManager::new(http.clone(), FakeClock::new(), url_types());
        let consumer = Arc::new(RecordingConsumer {
            statuses: Mutex::new(Vec::new()),
        });
        let request: Arc<dyn NetworkRequest> =
            Arc::new(RevokeTokenRequest::new("cid", "rt", TokenTypeHint::RefreshToken));
        manager.start_request(request, Arc::downgrade(&(consumer.clone() as Arc<dyn RequestConsumer>)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            consumer.statuses.lock().unwrap().as_slice(),
            &[NetworkResponseStatus::Ok]
        );
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_requests_drops_pending_before_retry_fires() {
        let http = Arc::new(StubHttp {
            responses: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        // Default stub response is an empty 200, which RevokeTokenRequest
        // accepts as NetworkResponseStatus::Ok - deliver should run, but
        // cancel_all_requests beats it to the punch.
        let manager = NetworkRequestManager::new(http, FakeClock::new(), url_types());
        let consumer = Arc::new(RecordingConsumer {
            statuses: Mutex::new(Vec::new()),
        });
        let request: Arc<dyn NetworkRequest> =
            Arc::new(RevokeTokenRequest::new("cid", "rt", TokenTypeHint::RefreshToken));
        manager.start_request(request, Arc::downgrade(&(consumer.clone() as Arc<dyn RequestConsumer>)));
        manager.cancel_all_requests();
        assert_eq!(manager.pending_count(), 0);
    }
}
