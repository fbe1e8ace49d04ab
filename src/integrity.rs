//! Append-only health records.
//!
//! A record is created once and then only looked up. Creation runs the policy
//! checks, the duplicate heuristic under a per-owner lock, encryption bound to the
//! owner identity, blob persistence, and the `DataAdded` audit event, in that order.
//! Modification and deletion are refused for every caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditEventType, EventLog};
use crate::blobstore::{CallBudget, ResilientBlobStore};
use crate::clock::Clock;
use crate::crypto::{AuthContext, EncryptionProvider};
use crate::error::{CoreError, CoreResult};
use crate::kv::{self, KeyValueStore};
use crate::model::{Actor, DataCategory, HealthPayload, Permission, Role};
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::workflow::{AccessRequestWorkflow, RequestId};

mod duplicates;

pub use duplicates::{content_fingerprint, match_fingerprint};

const RECORD_PREFIX: &str = "record/";
const OWNER_PREFIX: &str = "owner_records/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableRecord {
    pub id: String,
    pub owner_address: String,
    pub author_address: String,
    pub author_role: Role,
    pub category: DataCategory,
    pub blob_ref: String,
    pub content_fingerprint: String,
    pub match_fingerprint: String,
    pub created_at: i64,
    pub access_request: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddRecord {
    pub category: DataCategory,
    pub owner_address: String,
    pub author: Actor,
    pub payload: HealthPayload,
    pub access_request: Option<RequestId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOperation {
    Add,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegritySettings {
    pub duplicate_window: Duration,
}

impl Default for IntegritySettings {
    fn default() -> Self { Self { duplicate_window: Duration::from_secs(24 * 60 * 60) } }
}

type OwnerLocks = parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one owner's add lock; the map entry goes away with the last holder.
struct OwnerLease<'a> {
    locks: &'a OwnerLocks,
    owner: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for OwnerLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        if locks.get(&self.owner).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.owner);
        }
    }
}

pub struct DataIntegrityGuard {
    policy: Arc<PolicyEngine>,
    workflow: Arc<AccessRequestWorkflow>,
    blobs: Arc<ResilientBlobStore>,
    crypto: Arc<dyn EncryptionProvider>,
    kv: Arc<dyn KeyValueStore>,
    events: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
    settings: IntegritySettings,
    owner_locks: OwnerLocks,
}

impl DataIntegrityGuard {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: Arc<PolicyEngine>,
        workflow: Arc<AccessRequestWorkflow>,
        blobs: Arc<ResilientBlobStore>,
        crypto: Arc<dyn EncryptionProvider>,
        kv: Arc<dyn KeyValueStore>,
        events: Arc<dyn EventLog>,
        clock: Arc<dyn Clock>,
        settings: IntegritySettings,
    ) -> Self {
        Self { policy, workflow, blobs, crypto, kv, events, clock, settings, owner_locks: parking_lot::Mutex::new(HashMap::new()) }
    }

    async fn lock_owner(&self, owner: &str) -> OwnerLease<'_> {
        let lock = self.owner_locks.lock().entry(owner.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        OwnerLease { locks: &self.owner_locks, owner: owner.to_string(), guard: Some(guard) }
    }

    /// Owners with an add in progress or queued.
    pub fn locked_owners(&self) -> usize { self.owner_locks.lock().len() }

    fn window_ms(&self) -> i64 { i64::try_from(self.settings.duplicate_window.as_millis()).unwrap_or(i64::MAX) }

    pub async fn add_record(&self, req: AddRecord, budget: &CallBudget) -> CoreResult<ImmutableRecord> {
        let AddRecord { category, owner_address, author, payload, access_request } = req;
        if payload.category() != category {
            return Err(CoreError::invalid(
                "category_mismatch".to_string(),
                format!("payload is {} but record category is {}", payload.category(), category),
            ));
        }
        if owner_address.trim().is_empty() {
            return Err(CoreError::invalid("bad_owner", "owner address is required"));
        }
        // Self-modification is reported ahead of the category rule
        self.policy.can_modify(&author.address, &owner_address, author.role, category, Permission::WRITE).into_result()?;
        self.policy.check_permission(author.role, category, Permission::WRITE).into_result()?;
        if let Some(rid) = access_request {
            if !self.workflow.has_approved_grant(rid, &author.address, &owner_address) {
                return Err(CoreError::denied(
                    "grant_not_approved".to_string(),
                    format!("request {} is not an approved grant from {} to {}", rid, owner_address, author.address),
                ));
            }
        }

        let _lease = self.lock_owner(&owner_address).await;

        let plaintext = serde_json::to_vec(&payload)?;
        let content_fp = content_fingerprint(&plaintext);
        let match_fp = match_fingerprint(&payload);
        let now = self.clock.now_ms();
        let existing = self.records_for_owner(&owner_address)?;
        if let Some(dup) = duplicates::find_duplicate(&existing, category, &match_fp, now, self.window_ms()) {
            warn!(target: "carecore::integrity", "duplicate {} entry for owner={} matches {}", category, owner_address, dup.id);
            return Err(CoreError::integrity(
                "duplicate_record".to_string(),
                format!("an equivalent {} entry ({}) was added within the duplicate window", category, dup.id),
            ));
        }

        let uid = uuid::Uuid::new_v4().simple().to_string();
        let record = ImmutableRecord {
            id: format!("rec_{}", uid),
            owner_address: owner_address.clone(),
            author_address: author.address.clone(),
            author_role: author.role,
            category,
            blob_ref: format!("blob_{}_{}", category.as_str(), uid),
            content_fingerprint: content_fp,
            match_fingerprint: match_fp,
            created_at: now,
            access_request,
        };
        let auth = AuthContext {
            owner: owner_address.clone(),
            author: author.address.clone(),
            author_role: author.role,
            category,
            created_at: now,
        };
        let ciphertext = self.crypto.encrypt(&plaintext, &owner_address, &auth)?;
        self.blobs.put(&record.blob_ref, ciphertext, budget).await?;

        let added = AuditEventType::DataAdded.new_event(
            now,
            json!({
                "author": record.author_address,
                "patient": record.owner_address,
                "record_id": record.id,
                "category": category.as_str(),
                "request_id": record.access_request,
            }),
        );
        if let Err(e) = self.events.append(added) {
            // Without its audit event the record does not exist; drop the orphan blob
            if let Err(de) = self.blobs.delete(&record.blob_ref, budget).await {
                warn!(target: "carecore::integrity", "orphan blob {} left behind: {}", record.blob_ref, de);
            }
            return Err(e);
        }

        kv::put_json(self.kv.as_ref(), &format!("{}{}", RECORD_PREFIX, record.id), &record)?;
        kv::put_json(self.kv.as_ref(), &format!("{}{}/{}", OWNER_PREFIX, record.owner_address, record.id), &record)?;
        info!(target: "carecore::integrity", "record {} added owner={} category={} blob={}", record.id, record.owner_address, category, record.blob_ref);
        Ok(record)
    }

    fn refuse(&self, record_id: &str, actor: &Actor, op: RecordOperation) -> CoreError {
        let (code, reason, attempted) = match op {
            RecordOperation::Delete => ("immutable_delete", "immutable: deletion not permitted", "delete"),
            _ => ("immutable_modify", "immutable: modification not permitted", "modify"),
        };
        let owner = self.get_record(record_id).map(|r| r.owner_address).unwrap_or_default();
        warn!(target: "carecore::integrity", "{} attempt on record {} by {} ({}) refused", attempted, record_id, actor.address, actor.role);
        let ev = AuditEventType::IntegrityViolation.new_event(
            self.clock.now_ms(),
            json!({ "actor": actor.address, "patient": owner, "record_id": record_id, "attempted": attempted }),
        );
        if let Err(e) = self.events.append(ev) {
            warn!(target: "carecore::integrity", "integrity violation event not recorded: {}", e);
        }
        CoreError::integrity(code, reason)
    }

    /// Always refused; records have no update path.
    pub fn attempt_modify(&self, record_id: &str, actor: &Actor) -> CoreResult<()> {
        Err(self.refuse(record_id, actor, RecordOperation::Modify))
    }

    /// Always refused; records have no delete path.
    pub fn attempt_delete(&self, record_id: &str, actor: &Actor) -> CoreResult<()> {
        Err(self.refuse(record_id, actor, RecordOperation::Delete))
    }

    pub fn get_record(&self, record_id: &str) -> CoreResult<ImmutableRecord> {
        kv::get_json(self.kv.as_ref(), &format!("{}{}", RECORD_PREFIX, record_id))?
            .ok_or_else(|| CoreError::not_found("record_not_found".to_string(), format!("record {} not found", record_id)))
    }

    /// Newest first.
    pub fn records_for_owner(&self, owner_address: &str) -> CoreResult<Vec<ImmutableRecord>> {
        let mut out: Vec<ImmutableRecord> = kv::scan_json(self.kv.as_ref(), &format!("{}{}/", OWNER_PREFIX, owner_address))?;
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }

    fn may_read(&self, record: &ImmutableRecord, reader: &Actor, access_request: Option<RequestId>) -> bool {
        if reader.address == record.owner_address || reader.address == record.author_address {
            return true;
        }
        let Some(rid) = access_request else { return false; };
        match self.workflow.get(rid) {
            Ok(req) => {
                self.workflow.has_approved_grant(rid, &reader.address, &record.owner_address) && req.data_ref == record.id
            }
            Err(_) => false,
        }
    }

    /// Fetch and decrypt a record's payload.
    pub async fn read_record(
        &self,
        record_id: &str,
        reader: &Actor,
        access_request: Option<RequestId>,
        budget: &CallBudget,
    ) -> CoreResult<HealthPayload> {
        let record = self.get_record(record_id)?;
        let allowed = self.policy.check_permission(reader.role, record.category, Permission::READ).allowed
            && self.may_read(&record, reader, access_request);
        if !allowed {
            // Same answer as an unknown id, so ids cannot be enumerated
            warn!(target: "carecore::integrity", "read of record {} by {} refused", record.id, reader.address);
            return Err(CoreError::not_found("record_not_found".to_string(), format!("record {} not found", record_id)));
        }
        // Absent blob and undecryptable blob look the same to the caller
        let unavailable = || CoreError::not_found("record_unavailable".to_string(), format!("record {} is unavailable", record.id));
        let ciphertext = self.blobs.get(&record.blob_ref, budget).await?.ok_or_else(unavailable)?;
        let plaintext = self.crypto.decrypt(&ciphertext, &record.owner_address).ok_or_else(unavailable)?;
        let payload: HealthPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| CoreError::internal(format!("record {} payload undecodable: {}", record.id, e)))?;

        self.events.append(AuditEventType::DataAccessed.new_event(
            self.clock.now_ms(),
            json!({
                "accessor": reader.address,
                "patient": record.owner_address,
                "data_ref": record.id,
                "kind": "read",
                "request_id": access_request,
            }),
        ))?;
        debug!(target: "carecore::integrity", "record {} read by {}", record.id, reader.address);
        Ok(payload)
    }

    /// Pre-flight check for a UI: would `operation` by `actor` on `owner`'s data be allowed?
    pub fn validate(&self, operation: RecordOperation, owner_address: &str, actor: &Actor, category: DataCategory) -> PolicyDecision {
        match operation {
            // can_modify falls through to the category rule when the self-modification gate passes
            RecordOperation::Add => self.policy.can_modify(&actor.address, owner_address, actor.role, category, Permission::WRITE),
            RecordOperation::Modify => PolicyDecision::deny("immutable_modify", "immutable: modification not permitted"),
            RecordOperation::Delete => PolicyDecision::deny("immutable_delete", "immutable: deletion not permitted"),
        }
    }
}
