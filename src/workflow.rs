//! Doctor-to-patient access requests.
//!
//! Pending -> Approved | Rejected | Expired, with no transition out of a terminal
//! state. Every request owns its own mutex, so concurrent approve/reject calls on the
//! same request serialize and exactly one wins. Each transition appends its audit
//! event before the new state is written back; a failed append leaves the request
//! untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditEventType, EventLog};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::model::{Actor, Role, TransactionKind};
use crate::policy::PolicyEngine;

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool { !matches!(self, RequestStatus::Pending) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: RequestId,
    pub requestor_address: String,
    pub subject_address: String,
    pub data_ref: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub status: RequestStatus,
    pub approved_at: Option<i64>,
    pub finalized_at: Option<i64>,
}

impl AccessRequest {
    fn event_payload(&self) -> serde_json::Value {
        json!({
            "request_id": self.id,
            "requestor": self.requestor_address,
            "patient": self.subject_address,
            "data_ref": self.data_ref,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub default_lifetime: Duration,
    pub sweep_on_read: bool,
    /// Lifetime of an approval, counted from `approved_at`. `None`: approvals do not lapse.
    pub grant_ttl: Option<Duration>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self { default_lifetime: Duration::from_secs(7 * 24 * 60 * 60), sweep_on_read: true, grant_ttl: None }
    }
}

pub struct AccessRequestWorkflow {
    policy: Arc<PolicyEngine>,
    events: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
    settings: WorkflowSettings,
    next_id: AtomicU64,
    requests: RwLock<HashMap<RequestId, Arc<Mutex<AccessRequest>>>>,
}

impl AccessRequestWorkflow {
    pub fn new(policy: Arc<PolicyEngine>, events: Arc<dyn EventLog>, clock: Arc<dyn Clock>, settings: WorkflowSettings) -> Self {
        Self {
            policy,
            events,
            clock,
            settings,
            next_id: AtomicU64::new(1),
            requests: RwLock::new(HashMap::new()),
        }
    }

    fn cell(&self, id: RequestId) -> CoreResult<Arc<Mutex<AccessRequest>>> {
        self.requests
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("request_not_found".to_string(), format!("access request {} not found", id)))
    }

    fn cells(&self) -> Vec<Arc<Mutex<AccessRequest>>> { self.requests.read().values().cloned().collect() }

    /// Open a request from a doctor to a patient. `lifetime` falls back to the configured default.
    pub fn create(&self, requestor: &Actor, subject_address: &str, data_ref: &str, lifetime: Option<Duration>) -> CoreResult<AccessRequest> {
        if requestor.role != Role::Doctor {
            return Err(CoreError::denied("requestor_not_doctor".to_string(), format!("{} cannot open access requests", requestor.role)));
        }
        if requestor.address == subject_address {
            return Err(CoreError::denied("self_request", "cannot request access to your own data"));
        }
        if subject_address.trim().is_empty() || data_ref.trim().is_empty() {
            return Err(CoreError::invalid("bad_request", "subject and data reference are required"));
        }
        let lifetime = lifetime.unwrap_or(self.settings.default_lifetime);
        if lifetime.is_zero() {
            return Err(CoreError::invalid("bad_lifetime", "request lifetime must be positive"));
        }
        let lifetime_ms = i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX);
        let now = self.clock.now_ms();
        let req = AccessRequest {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            requestor_address: requestor.address.clone(),
            subject_address: subject_address.to_string(),
            data_ref: data_ref.to_string(),
            created_at: now,
            expires_at: now.saturating_add(lifetime_ms),
            status: RequestStatus::Pending,
            approved_at: None,
            finalized_at: None,
        };
        self.events.append(AuditEventType::AccessRequestCreated.new_event(now, req.event_payload()))?;
        self.requests.write().insert(req.id, Arc::new(Mutex::new(req.clone())));
        info!(target: "carecore::workflow", "access request {} created requestor={} subject={} expires_at={}", req.id, req.requestor_address, req.subject_address, req.expires_at);
        Ok(req)
    }

    pub fn approve(&self, id: RequestId, actor: &Actor) -> CoreResult<AccessRequest> {
        self.finalize(id, actor, RequestStatus::Approved)
    }

    pub fn reject(&self, id: RequestId, actor: &Actor) -> CoreResult<AccessRequest> {
        self.finalize(id, actor, RequestStatus::Rejected)
    }

    fn finalize(&self, id: RequestId, actor: &Actor, target: RequestStatus) -> CoreResult<AccessRequest> {
        let cell = self.cell(id)?;
        let mut req = cell.lock();
        if actor.address != req.subject_address {
            return Err(CoreError::denied("not_subject".to_string(), format!("only {} may decide request {}", req.subject_address, id)));
        }
        self.policy.can_authorize_access(&actor.address, &req.requestor_address, actor.role).into_result()?;

        let now = self.clock.now_ms();
        if req.status == RequestStatus::Pending && req.expires_at <= now {
            self.expire_locked(&mut req, now)?;
            return Err(CoreError::conflict("expired".to_string(), format!("request {} expired", id)));
        }
        match req.status {
            RequestStatus::Pending => {}
            RequestStatus::Expired => return Err(CoreError::conflict("expired".to_string(), format!("request {} expired", id))),
            RequestStatus::Approved | RequestStatus::Rejected => {
                return Err(CoreError::conflict("already_finalized", "request already finalized"));
            }
        }

        let mut next = req.clone();
        next.status = target;
        next.finalized_at = Some(now);
        let event_type = if target == RequestStatus::Approved {
            next.approved_at = Some(now);
            AuditEventType::AccessRequestApproved
        } else {
            AuditEventType::AccessRequestRejected
        };
        self.events.append(event_type.new_event(now, next.event_payload()))?;
        *req = next;
        info!(target: "carecore::workflow", "access request {} {:?} by {}", id, target, actor.address);
        Ok(req.clone())
    }

    /// Caller holds the request lock and has checked the request is Pending and due.
    fn expire_locked(&self, req: &mut AccessRequest, now: i64) -> CoreResult<()> {
        self.events.append(AuditEventType::AccessRequestExpired.new_event(now, req.event_payload()))?;
        req.status = RequestStatus::Expired;
        req.finalized_at = Some(now);
        debug!(target: "carecore::workflow", "access request {} expired at {}", req.id, now);
        Ok(())
    }

    /// Expire every Pending request due at `now`. Requests whose expiry event cannot be
    /// written stay Pending and are retried by the next sweep.
    pub fn sweep_expired(&self, now: i64) -> Vec<RequestId> {
        let mut expired = Vec::new();
        for cell in self.cells() {
            let mut req = cell.lock();
            if req.status != RequestStatus::Pending || req.expires_at > now { continue; }
            match self.expire_locked(&mut req, now) {
                Ok(()) => expired.push(req.id),
                Err(e) => warn!(target: "carecore::workflow", "expiry of request {} not recorded: {}", req.id, e),
            }
        }
        expired.sort_unstable();
        if !expired.is_empty() {
            info!(target: "carecore::workflow", "sweep expired {} requests", expired.len());
        }
        expired
    }

    pub fn get(&self, id: RequestId) -> CoreResult<AccessRequest> {
        let cell = self.cell(id)?;
        let mut req = cell.lock();
        if self.settings.sweep_on_read && req.status == RequestStatus::Pending {
            let now = self.clock.now_ms();
            if req.expires_at <= now {
                self.expire_locked(&mut req, now)?;
            }
        }
        Ok(req.clone())
    }

    fn grant_live(&self, req: &AccessRequest, now: i64) -> bool {
        if req.status != RequestStatus::Approved {
            return false;
        }
        match (self.settings.grant_ttl, req.approved_at) {
            (Some(ttl), Some(at)) => now < at.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
            _ => true,
        }
    }

    /// Approved and, when a grant lifetime is configured, not yet lapsed at `now`.
    /// `expires_at` bounds the Pending window only; it never revokes an approval.
    pub fn is_approved(&self, id: RequestId, now: i64) -> bool {
        match self.cell(id) {
            Ok(c) => {
                let r = c.lock();
                self.grant_live(&r, now)
            }
            Err(_) => false,
        }
    }

    /// Whether `id` is a live approved grant from `subject` to `requestor`.
    pub fn has_approved_grant(&self, id: RequestId, requestor: &str, subject: &str) -> bool {
        let now = self.clock.now_ms();
        match self.cell(id) {
            Ok(c) => {
                let r = c.lock();
                self.grant_live(&r, now) && r.requestor_address == requestor && r.subject_address == subject
            }
            Err(_) => false,
        }
    }

    fn list_where(&self, pred: impl Fn(&AccessRequest) -> bool) -> Vec<AccessRequest> {
        let mut out: Vec<AccessRequest> = self
            .cells()
            .iter()
            .map(|c| c.lock().clone())
            .filter(|r| pred(r))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    pub fn list_for_subject(&self, subject_address: &str) -> Vec<AccessRequest> {
        self.list_where(|r| r.subject_address == subject_address)
    }

    pub fn list_for_requestor(&self, requestor_address: &str) -> Vec<AccessRequest> {
        self.list_where(|r| r.requestor_address == requestor_address)
    }

    /// Record that the requestor of an approved request used the grant.
    pub fn record_data_access(&self, id: RequestId, actor: &Actor, kind: TransactionKind) -> CoreResult<()> {
        if !matches!(kind, TransactionKind::Read | TransactionKind::Write) {
            return Err(CoreError::invalid("bad_access_kind".to_string(), format!("'{}' is not a data access", kind.as_str())));
        }
        let cell = self.cell(id)?;
        let req = cell.lock();
        if req.requestor_address != actor.address {
            return Err(CoreError::denied("not_requestor".to_string(), format!("{} is not the requestor of request {}", actor.address, id)));
        }
        let now = self.clock.now_ms();
        if !self.grant_live(&req, now) {
            return Err(CoreError::denied("grant_not_approved".to_string(), format!("request {} is not a live grant ({:?})", id, req.status)));
        }
        self.events.append(AuditEventType::DataAccessed.new_event(
            now,
            json!({
                "accessor": actor.address,
                "patient": req.subject_address,
                "data_ref": req.data_ref,
                "kind": kind.as_str(),
                "request_id": req.id,
            }),
        ))?;
        debug!(target: "carecore::workflow", "data access kind={} request={} accessor={}", kind.as_str(), id, actor.address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryEventLog;
    use crate::clock::ManualClock;
    use crate::policy::PolicyTable;

    fn workflow() -> (Arc<ManualClock>, Arc<MemoryEventLog>, AccessRequestWorkflow) {
        let clock = Arc::new(ManualClock::new(1_000));
        let log = Arc::new(MemoryEventLog::new());
        let policy = Arc::new(PolicyEngine::new(PolicyTable::default()).unwrap());
        let wf = AccessRequestWorkflow::new(policy, log.clone(), clock.clone(), WorkflowSettings::default());
        (clock, log, wf)
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let (_c, _l, wf) = workflow();
        let d = Actor::doctor("0xd");
        let a = wf.create(&d, "0xp", "labs", None).unwrap();
        let b = wf.create(&d, "0xp", "labs", None).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn wrong_actor_is_denied_before_expiry_is_applied() {
        let (clock, log, wf) = workflow();
        let req = wf.create(&Actor::doctor("0xd"), "0xp", "labs", Some(Duration::from_secs(1))).unwrap();
        clock.advance_ms(5_000);
        let err = wf.approve(req.id, &Actor::patient("0xother")).unwrap_err();
        assert!(matches!(err, CoreError::PolicyDenied { .. }));
        assert_eq!(log.len(), 1);
        assert_eq!(wf.cell(req.id).unwrap().lock().status, RequestStatus::Pending);
    }

    #[test]
    fn grant_ttl_lapses_approvals() {
        let clock = Arc::new(ManualClock::new(1_000));
        let policy = Arc::new(PolicyEngine::new(PolicyTable::default()).unwrap());
        let settings = WorkflowSettings { grant_ttl: Some(Duration::from_secs(60)), ..WorkflowSettings::default() };
        let wf = AccessRequestWorkflow::new(policy, Arc::new(MemoryEventLog::new()), clock.clone(), settings);
        let req = wf.create(&Actor::doctor("0xd"), "0xp", "labs", None).unwrap();
        wf.approve(req.id, &Actor::patient("0xp")).unwrap();
        assert!(wf.is_approved(req.id, 30_000));
        assert!(!wf.is_approved(req.id, 61_000));
        clock.advance_ms(60_000);
        assert!(!wf.has_approved_grant(req.id, "0xd", "0xp"));
        assert!(wf.record_data_access(req.id, &Actor::doctor("0xd"), TransactionKind::Read).is_err());
        // Status itself is unchanged
        assert_eq!(wf.get(req.id).unwrap().status, RequestStatus::Approved);
    }
}
