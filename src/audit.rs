//! Audit trail: event types written by the workflow and integrity guard, and the
//! aggregator that merges every type's stream into one filtered, ordered view.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::CoreResult;
use crate::model::TransactionKind;

mod event_log;
mod normalize;

pub use event_log::{EventCriteria, EventLog, MemoryEventLog, NewEvent, RawEvent};
pub use normalize::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    AccessRequestCreated,
    AccessRequestApproved,
    AccessRequestRejected,
    AccessRequestExpired,
    DataAccessed,
    DataAdded,
    IntegrityViolation,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 7] = [
        AuditEventType::AccessRequestCreated,
        AuditEventType::AccessRequestApproved,
        AuditEventType::AccessRequestRejected,
        AuditEventType::AccessRequestExpired,
        AuditEventType::DataAccessed,
        AuditEventType::DataAdded,
        AuditEventType::IntegrityViolation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::AccessRequestCreated => "AccessRequestCreated",
            AuditEventType::AccessRequestApproved => "AccessRequestApproved",
            AuditEventType::AccessRequestRejected => "AccessRequestRejected",
            AuditEventType::AccessRequestExpired => "AccessRequestExpired",
            AuditEventType::DataAccessed => "DataAccessed",
            AuditEventType::DataAdded => "DataAdded",
            AuditEventType::IntegrityViolation => "IntegrityViolation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Payload field naming the patient the event is about.
    pub fn subject_field(self) -> &'static str { "patient" }

    /// Payload field naming who acted. Expiry is performed by the system and has none.
    pub fn actor_field(self) -> Option<&'static str> {
        match self {
            AuditEventType::AccessRequestCreated => Some("requestor"),
            AuditEventType::AccessRequestApproved | AuditEventType::AccessRequestRejected => Some("patient"),
            AuditEventType::AccessRequestExpired => None,
            AuditEventType::DataAccessed => Some("accessor"),
            AuditEventType::DataAdded => Some("author"),
            AuditEventType::IntegrityViolation => Some("actor"),
        }
    }

    pub fn data_ref_field(self) -> &'static str {
        match self {
            AuditEventType::DataAdded | AuditEventType::IntegrityViolation => "record_id",
            _ => "data_ref",
        }
    }

    pub fn is_request_event(self) -> bool {
        matches!(
            self,
            AuditEventType::AccessRequestCreated
                | AuditEventType::AccessRequestApproved
                | AuditEventType::AccessRequestRejected
                | AuditEventType::AccessRequestExpired
        )
    }

    pub fn new_event(self, timestamp_ms: i64, payload: Value) -> NewEvent {
        NewEvent { type_name: self.as_str().to_string(), timestamp_ms, payload }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub event_type: AuditEventType,
    pub actor_address: String,
    pub subject_address: String,
    pub data_ref: String,
    pub transaction_kind: TransactionKind,
    pub timestamp: i64,
    pub sequence: u64,
    pub request_id: Option<u64>,
    pub source_ref: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub subject: Option<String>,
    pub actor: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub from_time: Option<i64>,
    pub to_time: Option<i64>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self { subject: Some(subject.into()), ..Self::default() }
    }

    fn accepts(&self, ev: &AuditEvent) -> bool {
        if let Some(s) = &self.subject { if &ev.subject_address != s { return false; } }
        if let Some(a) = &self.actor { if &ev.actor_address != a { return false; } }
        if let Some(t) = self.event_type { if ev.event_type != t { return false; } }
        if let Some(from) = self.from_time { if ev.timestamp < from { return false; } }
        if let Some(to) = self.to_time { if ev.timestamp > to { return false; } }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_requests: u64,
    pub approved: u64,
    pub rejected: u64,
    pub expired: u64,
    pub total_accesses: u64,
    pub unique_accessors: u64,
    pub last_access_time: Option<i64>,
}

pub struct AuditAggregator {
    log: Arc<dyn EventLog>,
    fetch_cap: usize,
}

impl AuditAggregator {
    pub fn new(log: Arc<dyn EventLog>, fetch_cap: usize) -> Self {
        Self { log, fetch_cap: fetch_cap.max(1) }
    }

    fn criteria_for(&self, ty: AuditEventType, filter: &AuditFilter) -> Option<EventCriteria> {
        let mut c = EventCriteria { equals: Vec::new(), from_ms: filter.from_time, to_ms: filter.to_time };
        if let Some(s) = &filter.subject {
            c.equals.push((ty.subject_field().to_string(), s.clone()));
        }
        if let Some(a) = &filter.actor {
            // A type without an actor can never match an actor filter
            c.equals.push((ty.actor_field()?.to_string(), a.clone()));
        }
        Some(c)
    }

    pub fn query(&self, filter: &AuditFilter) -> CoreResult<Vec<AuditEvent>> {
        let mut merged: Vec<AuditEvent> = Vec::new();
        for ty in AuditEventType::ALL {
            if filter.event_type.is_some_and(|t| t != ty) { continue; }
            let Some(criteria) = self.criteria_for(ty, filter) else { continue; };
            let raw = self.log.query(ty.as_str(), &criteria, self.fetch_cap)?;
            if raw.len() >= self.fetch_cap {
                debug!(target: "carecore::audit", "fetch cap {} reached for {}", self.fetch_cap, ty);
            }
            merged.extend(raw.iter().filter_map(normalize));
        }
        merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.sequence.cmp(&a.sequence)));
        merged.retain(|e| filter.accepts(e));
        if let Some(limit) = filter.limit {
            merged.truncate(limit);
        }
        crate::tprintln!("audit.query filter={:?} -> {} events", filter, merged.len());
        Ok(merged)
    }

    pub fn statistics(&self, subject: &str) -> CoreResult<AuditStatistics> {
        let events = self.query(&AuditFilter::for_subject(subject))?;
        let mut stats = AuditStatistics::default();
        let mut accessors: HashSet<&str> = HashSet::new();
        for ev in &events {
            match ev.event_type {
                AuditEventType::AccessRequestCreated => stats.total_requests += 1,
                AuditEventType::AccessRequestApproved => stats.approved += 1,
                AuditEventType::AccessRequestRejected => stats.rejected += 1,
                AuditEventType::AccessRequestExpired => stats.expired += 1,
                AuditEventType::DataAccessed => stats.total_accesses += 1,
                AuditEventType::DataAdded | AuditEventType::IntegrityViolation => {}
            }
            if !ev.actor_address.is_empty() && ev.actor_address != subject {
                accessors.insert(ev.actor_address.as_str());
            }
        }
        stats.unique_accessors = accessors.len() as u64;
        stats.last_access_time = events.first().map(|e| e.timestamp);
        Ok(stats)
    }
}
