#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use carecore::audit::{EventCriteria, EventLog, MemoryEventLog, NewEvent, RawEvent};
use carecore::blobstore::{BlobOp, BlobRequest, BlobResponse, BlobTransport, TransportError};
use carecore::clock::{Clock, ManualClock};
use carecore::config::{CoreConfig, EndpointConfig};
use carecore::crypto::{AuthContext, EncryptionProvider};
use carecore::identity::{Verification, Verifier};
use carecore::model::{HealthPayload, LabResultData, LabTestResult};
use carecore::{CareCore, Collaborators, CoreError, CoreResult};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

pub const T0: i64 = 1_700_000_000_000;

/// How a stub endpoint answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Normal,
    Status(u16),
    Down,
    Slow(Duration),
}

#[derive(Default)]
struct StubInner {
    modes: Mutex<HashMap<String, Mode>>,
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
    calls: Mutex<Vec<(String, BlobOp, String)>>,
}

/// In-memory transport. Each endpoint keeps its own blob map; behaviour is scripted per endpoint.
#[derive(Clone, Default)]
pub struct StubTransport {
    inner: Arc<StubInner>,
}

impl StubTransport {
    pub fn new() -> Self { Self::default() }

    pub fn set_mode(&self, endpoint: &str, mode: Mode) { self.inner.modes.lock().insert(endpoint.to_string(), mode); }

    pub fn seed(&self, endpoint: &str, id: &str, bytes: &[u8]) {
        self.inner.blobs.lock().insert((endpoint.to_string(), id.to_string()), bytes.to_vec());
    }

    pub fn stored(&self, endpoint: &str, id: &str) -> Option<Vec<u8>> {
        self.inner.blobs.lock().get(&(endpoint.to_string(), id.to_string())).cloned()
    }

    pub fn calls(&self) -> Vec<(String, BlobOp, String)> { self.inner.calls.lock().clone() }

    pub fn call_count(&self) -> usize { self.inner.calls.lock().len() }

    pub fn corrupt_all(&self) {
        for v in self.inner.blobs.lock().values_mut() {
            *v = b"garbage".to_vec();
        }
    }
}

impl BlobTransport for StubTransport {
    fn send(&self, req: BlobRequest) -> BoxFuture<'static, Result<BlobResponse, TransportError>> {
        let inner = self.inner.clone();
        async move {
            let ep = req.endpoint.name.clone();
            inner.calls.lock().push((ep.clone(), req.op, req.id.clone()));
            let mode = inner.modes.lock().get(&ep).cloned().unwrap_or(Mode::Normal);
            match mode {
                Mode::Status(s) => return Ok(BlobResponse::empty(s)),
                Mode::Down => return Err(TransportError::Connect(format!("{} refused connection", ep))),
                Mode::Slow(d) => tokio::time::sleep(d).await,
                Mode::Normal => {}
            }
            let key = (ep, req.id.clone());
            let mut blobs = inner.blobs.lock();
            Ok(match req.op {
                BlobOp::Put => {
                    let body = req.body.as_ref().map(|b| b.as_ref().clone()).unwrap_or_default();
                    blobs.insert(key, body);
                    BlobResponse::empty(201)
                }
                BlobOp::Get => match blobs.get(&key) {
                    Some(b) => BlobResponse::new(200, b.clone()),
                    None => BlobResponse::empty(404),
                },
                BlobOp::Head => BlobResponse::empty(if blobs.contains_key(&key) { 200 } else { 404 }),
                BlobOp::Delete => BlobResponse::empty(if blobs.remove(&key).is_some() { 204 } else { 404 }),
            })
        }
        .boxed()
    }
}

/// Reversible envelope `enc|<identity>|<plaintext>`; only the same identity can open it.
pub struct StubCrypto;

impl EncryptionProvider for StubCrypto {
    fn encrypt(&self, plaintext: &[u8], identity: &str, _auth: &AuthContext) -> CoreResult<Vec<u8>> {
        let mut out = format!("enc|{}|", identity).into_bytes();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], identity: &str) -> Option<Vec<u8>> {
        let prefix = format!("enc|{}|", identity).into_bytes();
        ciphertext.strip_prefix(prefix.as_slice()).map(|p| p.to_vec())
    }
}

#[derive(Default)]
pub struct StubVerifier {
    pub reject: HashSet<String>,
}

impl Verifier for StubVerifier {
    fn verify(&self, address: &str) -> Verification {
        if self.reject.contains(address) {
            Verification::Failed { reason: "proof rejected".to_string() }
        } else {
            Verification::Verified { proof_ref: format!("proof-{}", address), verified_at: T0, expires_at: T0 + 86_400_000 }
        }
    }
}

/// Event log that can be switched to fail every append.
#[derive(Default)]
pub struct FlakyEventLog {
    pub inner: MemoryEventLog,
    pub failing: AtomicBool,
    pub appends: AtomicUsize,
}

impl FlakyEventLog {
    pub fn fail(&self, on: bool) { self.failing.store(on, Ordering::SeqCst); }
}

impl EventLog for FlakyEventLog {
    fn append(&self, event: NewEvent) -> CoreResult<RawEvent> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::event_log("ledger unavailable"));
        }
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.inner.append(event)
    }

    fn query(&self, type_name: &str, criteria: &EventCriteria, limit: usize) -> CoreResult<Vec<RawEvent>> {
        self.inner.query(type_name, criteria, limit)
    }
}

pub fn endpoint(name: &str) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        url: format!("http://{}.invalid", name),
        backend: "stub".to_string(),
        token_env: None,
        requires_auth: false,
    }
}

/// Fast config: three endpoints, no rate spacing, millisecond backoff.
pub fn test_config() -> CoreConfig {
    let mut cfg = CoreConfig::default();
    cfg.blob_store.endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
    cfg.blob_store.rate_limit_interval_ms = 0;
    cfg.blob_store.backoff_base_ms = 1;
    cfg.blob_store.backoff_max_ms = 5;
    cfg.blob_store.request_timeout_ms = 1_000;
    cfg.blob_store.default_budget_ms = 5_000;
    cfg
}

pub struct Harness {
    pub core: CareCore,
    pub clock: Arc<ManualClock>,
    pub transport: StubTransport,
    pub events: Arc<FlakyEventLog>,
}

impl Harness {
    pub fn now(&self) -> i64 { self.clock.now_ms() }
}

pub fn harness_with(cfg: CoreConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(T0));
    let transport = StubTransport::new();
    let events = Arc::new(FlakyEventLog::default());
    let collab = Collaborators::new(Arc::new(transport.clone()), Arc::new(StubCrypto), Arc::new(StubVerifier::default()), clock.clone())
        .with_event_log(events.clone());
    let core = CareCore::new(cfg, collab).expect("core");
    Harness { core, clock, transport, events }
}

pub fn harness() -> Harness { harness_with(test_config()) }

pub fn lab(test_name: &str, value: f64) -> HealthPayload {
    HealthPayload::LabResult(LabResultData {
        test_name: test_name.to_string(),
        test_code: "718-7".to_string(),
        results: vec![LabTestResult {
            parameter: "hemoglobin".to_string(),
            value,
            unit: "g/dL".to_string(),
            status: "normal".to_string(),
            reference_range: "12-16".to_string(),
        }],
        status: "final".to_string(),
        notes: None,
    })
}
