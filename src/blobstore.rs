//! Resilient blob store client.
//!
//! Opaque ciphertext blobs are written to and read from an ordered list of endpoints
//! (primary first, then fallbacks). Each attempt goes through three layers:
//! identical in-flight calls are merged, the leader waits for its backend class's
//! rate-limit slot, then the transport sends the request under a per-attempt timeout.
//! Responses are classified into success, not-found, transient, auth and permanent
//! outcomes, which drive failover and backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::FutureExt;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult, EndpointFailure};

mod http;
mod inflight;
mod limiter;
mod transport;

pub use http::HttpBlobTransport;
pub use inflight::{CallKey, CallResult, InFlight, Joined};
pub use limiter::RateLimiter;
pub use transport::{BlobOp, BlobRequest, BlobResponse, BlobTransport, Endpoint, TransportError};

/// Cooperative cancellation shared between a caller and the calls it started.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool { self.inner.flag.load(Ordering::SeqCst) }

    pub async fn cancelled(&self) {
        // Register before checking the flag so a concurrent cancel() is not missed
        let notified = self.inner.notify.notified();
        if self.is_cancelled() { return; }
        notified.await;
    }
}

/// Deadline for a whole store call plus an optional cancellation token.
#[derive(Clone)]
pub struct CallBudget {
    deadline: Instant,
    cancel: Option<CancelToken>,
}

impl CallBudget {
    pub fn with_timeout(total: Duration) -> Self { Self { deadline: Instant::now() + total, cancel: None } }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn remaining(&self) -> Duration { self.deadline.saturating_duration_since(Instant::now()) }

    pub fn is_cancelled(&self) -> bool { self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) }

    pub fn is_exhausted(&self) -> bool { self.is_cancelled() || self.remaining().is_zero() }

    async fn cancelled(&self) {
        match &self.cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStoreSettings {
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub rate_limit_interval: Duration,
    pub retry_not_found_on_fallbacks: bool,
    pub default_budget: Duration,
}

impl Default for BlobStoreSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(2),
            rate_limit_interval: Duration::from_millis(100),
            retry_not_found_on_fallbacks: true,
            default_budget: Duration::from_secs(30),
        }
    }
}

enum Verdict {
    Success(BlobResponse),
    NotFound,
    Transient(String),
    Auth(String),
    Permanent(String),
}

fn classify(op: BlobOp, result: CallResult) -> Verdict {
    match result {
        Err(e) => Verdict::Transient(e.to_string()),
        Ok(resp) if resp.is_success() => Verdict::Success(resp),
        Ok(resp) => match resp.status {
            // A put that 404s means the backend lost its namespace; try elsewhere
            404 if op == BlobOp::Put => Verdict::Transient("http 404 on put".to_string()),
            404 => Verdict::NotFound,
            401 | 403 => Verdict::Auth(format!("http {} (auth)", resp.status)),
            408 | 429 => Verdict::Transient(format!("http {}", resp.status)),
            s if (400..500).contains(&s) => Verdict::Permanent(format!("http {}", s)),
            s => Verdict::Transient(format!("http {}", s)),
        },
    }
}

enum Outcome {
    Done { endpoint: String, resp: BlobResponse },
    NotFound,
}

pub struct ResilientBlobStore {
    endpoints: Vec<Endpoint>,
    transport: Arc<dyn BlobTransport>,
    limiter: Arc<RateLimiter>,
    inflight: InFlight,
    settings: BlobStoreSettings,
}

impl ResilientBlobStore {
    pub fn new(endpoints: Vec<Endpoint>, transport: Arc<dyn BlobTransport>, settings: BlobStoreSettings) -> CoreResult<Self> {
        if endpoints.is_empty() {
            return Err(CoreError::config("blob store needs at least one endpoint"));
        }
        info!(
            target: "carecore::blobstore",
            "blob store ready endpoints=[{}] timeout={:?} rate_interval={:?}",
            endpoints.iter().map(|e| format!("{}({})", e.name, e.backend)).collect::<Vec<_>>().join(", "),
            settings.request_timeout,
            settings.rate_limit_interval
        );
        Ok(Self {
            endpoints,
            transport,
            limiter: Arc::new(RateLimiter::new(settings.rate_limit_interval)),
            inflight: InFlight::new(),
            settings,
        })
    }

    pub fn endpoints(&self) -> &[Endpoint] { &self.endpoints }

    /// Budget of the configured default length, without cancellation.
    pub fn default_budget(&self) -> CallBudget { CallBudget::with_timeout(self.settings.default_budget) }

    /// Outbound calls started so far (merged duplicates are not counted).
    pub fn calls_started(&self) -> u64 { self.inflight.started() }

    /// Calls currently in flight with at least one waiter.
    pub fn calls_pending(&self) -> usize { self.inflight.pending() }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.settings.backoff_base.saturating_mul(factor).min(self.settings.backoff_max)
    }

    /// One attempt against one endpoint. `None` when the budget's token fired first.
    async fn attempt(&self, op: BlobOp, ep: &Endpoint, id: &str, body: Option<Arc<Vec<u8>>>, budget: &CallBudget) -> Option<CallResult> {
        let timeout = self.settings.request_timeout.min(budget.remaining());
        let key = CallKey {
            op,
            endpoint: ep.name.clone(),
            id: id.to_string(),
            content: body.as_ref().map(|b| xxhash_rust::xxh3::xxh3_64(b)),
        };
        let (call, leader) = self.inflight.join_or_start(key, || {
            let transport = self.transport.clone();
            let limiter = self.limiter.clone();
            let req = BlobRequest { op, endpoint: ep.clone(), id: id.to_string(), body, timeout };
            async move {
                limiter.acquire(&req.endpoint.backend).await;
                match tokio::time::timeout(timeout, transport.send(req)).await {
                    Ok(r) => r,
                    Err(_) => Err(TransportError::Timeout(timeout)),
                }
            }
            .boxed()
        });
        if !leader {
            debug!(target: "carecore::blobstore", "joined in-flight {} id={} endpoint={}", op.as_str(), id, ep.name);
        }
        tokio::select! {
            r = tokio::time::timeout(timeout, call) => Some(r.unwrap_or(Err(TransportError::Timeout(timeout)))),
            _ = budget.cancelled() => None,
        }
    }

    async fn run(&self, op: BlobOp, id: &str, body: Option<Arc<Vec<u8>>>, budget: &CallBudget) -> CoreResult<Outcome> {
        let mut failures: Vec<EndpointFailure> = Vec::new();
        let mut not_found = 0usize;
        let mut transient = 0u32;
        let last = self.endpoints.len() - 1;
        for (i, ep) in self.endpoints.iter().enumerate() {
            if budget.is_exhausted() {
                let why = if budget.is_cancelled() { "cancelled" } else { "deadline exceeded" };
                failures.push(EndpointFailure { endpoint: ep.name.clone(), reason: format!("not attempted: {}", why) });
                warn!(target: "carecore::blobstore", "{} id={} stopped: {}", op.as_str(), id, why);
                return Err(CoreError::storage_unavailable(op.as_str(), id, failures));
            }
            let Some(result) = self.attempt(op, ep, id, body.clone(), budget).await else {
                failures.push(EndpointFailure { endpoint: ep.name.clone(), reason: "cancelled".to_string() });
                return Err(CoreError::storage_unavailable(op.as_str(), id, failures));
            };
            match classify(op, result) {
                Verdict::Success(resp) => {
                    if !failures.is_empty() {
                        info!(target: "carecore::blobstore", "{} id={} succeeded on {} after {} failures", op.as_str(), id, ep.name, failures.len());
                    }
                    return Ok(Outcome::Done { endpoint: ep.name.clone(), resp });
                }
                Verdict::NotFound => {
                    not_found += 1;
                    failures.push(EndpointFailure { endpoint: ep.name.clone(), reason: "not found".to_string() });
                    if !self.settings.retry_not_found_on_fallbacks {
                        return Ok(Outcome::NotFound);
                    }
                }
                Verdict::Auth(reason) => {
                    warn!(target: "carecore::blobstore", "{} id={} auth failure on {}: {}", op.as_str(), id, ep.name, reason);
                    failures.push(EndpointFailure { endpoint: ep.name.clone(), reason });
                }
                Verdict::Permanent(reason) => {
                    warn!(target: "carecore::blobstore", "{} id={} rejected by {}: {}", op.as_str(), id, ep.name, reason);
                    failures.push(EndpointFailure { endpoint: ep.name.clone(), reason: reason.clone() });
                    return Err(CoreError::invalid(
                        "blob_rejected".to_string(),
                        format!("{} {} rejected by {}: {}", op.as_str(), id, ep.name, reason),
                    ));
                }
                Verdict::Transient(reason) => {
                    warn!(target: "carecore::blobstore", "{} id={} transient failure on {}: {}", op.as_str(), id, ep.name, reason);
                    failures.push(EndpointFailure { endpoint: ep.name.clone(), reason });
                    if i < last {
                        let wait = self.backoff(transient).min(budget.remaining());
                        transient += 1;
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = budget.cancelled() => {}
                        }
                    }
                }
            }
        }
        if not_found == self.endpoints.len() {
            return Ok(Outcome::NotFound);
        }
        warn!(target: "carecore::blobstore", "{} id={} failed on every endpoint", op.as_str(), id);
        Err(CoreError::storage_unavailable(op.as_str(), id, failures))
    }

    /// Store `ciphertext` under `id` on the first endpoint that accepts it. Returns `id`.
    pub async fn put(&self, id: &str, ciphertext: Vec<u8>, budget: &CallBudget) -> CoreResult<String> {
        if id.is_empty() {
            return Err(CoreError::invalid("bad_blob_id", "blob id must not be empty"));
        }
        let len = ciphertext.len();
        match self.run(BlobOp::Put, id, Some(Arc::new(ciphertext)), budget).await? {
            Outcome::Done { endpoint, .. } => {
                debug!(target: "carecore::blobstore", "put id={} bytes={} endpoint={}", id, len, endpoint);
                Ok(id.to_string())
            }
            // Puts classify 404 as transient, so the loop never reports not-found for them
            Outcome::NotFound => Err(CoreError::internal(format!("put {} reported not-found", id))),
        }
    }

    pub async fn get(&self, id: &str, budget: &CallBudget) -> CoreResult<Option<Vec<u8>>> {
        match self.run(BlobOp::Get, id, None, budget).await? {
            Outcome::Done { resp, .. } => Ok(Some(Arc::try_unwrap(resp.body).unwrap_or_else(|shared| shared.as_ref().clone()))),
            Outcome::NotFound => Ok(None),
        }
    }

    /// False when the blob is absent or no endpoint could answer.
    pub async fn exists(&self, id: &str, budget: &CallBudget) -> bool {
        match self.run(BlobOp::Head, id, None, budget).await {
            Ok(Outcome::Done { .. }) => true,
            Ok(Outcome::NotFound) => false,
            Err(e) => {
                warn!(target: "carecore::blobstore", "exists id={} unanswered: {}", id, e);
                false
            }
        }
    }

    /// True when an endpoint deleted the blob, false when every endpoint reported it absent.
    pub async fn delete(&self, id: &str, budget: &CallBudget) -> CoreResult<bool> {
        match self.run(BlobOp::Delete, id, None, budget).await? {
            Outcome::Done { .. } => Ok(true),
            Outcome::NotFound => Ok(false),
        }
    }
}
