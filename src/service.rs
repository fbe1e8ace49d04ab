//! Process-wide wiring. Every component is built once here and shared by `Arc`.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::audit::{AuditAggregator, EventLog, MemoryEventLog};
use crate::blobstore::{BlobTransport, ResilientBlobStore};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::crypto::EncryptionProvider;
use crate::error::CoreResult;
use crate::identity::{RoleRegistry, Verifier};
use crate::integrity::DataIntegrityGuard;
use crate::kv::{KeyValueStore, MemoryKvStore};
use crate::policy::PolicyEngine;
use crate::workflow::AccessRequestWorkflow;

/// External capabilities the core depends on. Key-value store and event log fall
/// back to the in-memory implementations (with the configured snapshot / mirror).
pub struct Collaborators {
    pub transport: Arc<dyn BlobTransport>,
    pub crypto: Arc<dyn EncryptionProvider>,
    pub verifier: Arc<dyn Verifier>,
    pub clock: Arc<dyn Clock>,
    pub kv: Option<Arc<dyn KeyValueStore>>,
    pub events: Option<Arc<dyn EventLog>>,
}

impl Collaborators {
    pub fn new(
        transport: Arc<dyn BlobTransport>,
        crypto: Arc<dyn EncryptionProvider>,
        verifier: Arc<dyn Verifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { transport, crypto, verifier, clock, kv: None, events: None }
    }

    pub fn with_kv(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn with_event_log(mut self, events: Arc<dyn EventLog>) -> Self {
        self.events = Some(events);
        self
    }
}

pub struct CareCore {
    pub config: CoreConfig,
    pub policy: Arc<PolicyEngine>,
    pub roles: Arc<RoleRegistry>,
    pub workflow: Arc<AccessRequestWorkflow>,
    pub integrity: Arc<DataIntegrityGuard>,
    pub audit: Arc<AuditAggregator>,
    pub blobs: Arc<ResilientBlobStore>,
    pub events: Arc<dyn EventLog>,
    pub kv: Arc<dyn KeyValueStore>,
}

impl CareCore {
    pub fn new(config: CoreConfig, collab: Collaborators) -> CoreResult<Self> {
        let Collaborators { transport, crypto, verifier, clock, kv, events } = collab;

        let kv: Arc<dyn KeyValueStore> = match kv {
            Some(kv) => kv,
            None => match &config.kv.snapshot_path {
                Some(path) => {
                    let store = MemoryKvStore::with_snapshot(path)?;
                    store.start_snapshot_loop(Duration::from_millis(config.kv.snapshot_interval_ms.max(1)));
                    Arc::new(store)
                }
                None => Arc::new(MemoryKvStore::new()),
            },
        };
        let events: Arc<dyn EventLog> = match events {
            Some(ev) => ev,
            None => match &config.audit.mirror_path {
                Some(path) => Arc::new(MemoryEventLog::with_mirror(path)?),
                None => Arc::new(MemoryEventLog::new()),
            },
        };

        let policy = Arc::new(PolicyEngine::new(config.policy.resolve()?)?);
        let roles = Arc::new(RoleRegistry::new(kv.clone(), verifier, clock.clone()));
        let blobs = Arc::new(ResilientBlobStore::new(config.blob_store.endpoints(), transport, config.blob_store.settings())?);
        let workflow = Arc::new(AccessRequestWorkflow::new(policy.clone(), events.clone(), clock.clone(), config.workflow.settings()));
        let integrity = Arc::new(DataIntegrityGuard::new(
            policy.clone(),
            workflow.clone(),
            blobs.clone(),
            crypto,
            kv.clone(),
            events.clone(),
            clock,
            config.integrity.settings(),
        ));
        let audit = Arc::new(AuditAggregator::new(events.clone(), config.audit.fetch_cap));

        info!(
            target: "startup",
            "care core ready: policy v{}, {} blob endpoints, audit fetch cap {}",
            policy.version(),
            blobs.endpoints().len(),
            config.audit.fetch_cap
        );
        Ok(Self { config, policy, roles, workflow, integrity, audit, blobs, events, kv })
    }
}
