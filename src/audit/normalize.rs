//! Raw event -> `AuditEvent`. Each event type names its actor, subject and data
//! fields differently; normalization maps them onto one shape.

use serde_json::Value;
use tracing::warn;

use super::event_log::RawEvent;
use super::{AuditEvent, AuditEventType};
use crate::model::TransactionKind;

fn str_field<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(|v| v.as_str())
}

fn kind_of(ty: AuditEventType, payload: &Value) -> Option<TransactionKind> {
    match ty {
        AuditEventType::AccessRequestCreated => Some(TransactionKind::Request),
        AuditEventType::AccessRequestApproved => Some(TransactionKind::Approval),
        AuditEventType::AccessRequestRejected => Some(TransactionKind::Rejection),
        AuditEventType::AccessRequestExpired => Some(TransactionKind::Expiry),
        AuditEventType::DataAdded => Some(TransactionKind::Write),
        AuditEventType::DataAccessed => TransactionKind::parse(str_field(payload, "kind")?),
        AuditEventType::IntegrityViolation => match str_field(payload, "attempted")? {
            "delete" => Some(TransactionKind::Delete),
            _ => Some(TransactionKind::Write),
        },
    }
}

fn try_normalize(raw: &RawEvent) -> Result<AuditEvent, String> {
    let ty = AuditEventType::parse(&raw.type_name).ok_or_else(|| format!("unknown event type '{}'", raw.type_name))?;
    let p = &raw.payload;
    let subject = str_field(p, ty.subject_field()).ok_or_else(|| format!("missing '{}'", ty.subject_field()))?;
    let actor = match ty.actor_field() {
        Some(f) => str_field(p, f).ok_or_else(|| format!("missing '{}'", f))?,
        None => "",
    };
    let data_ref = str_field(p, ty.data_ref_field()).ok_or_else(|| format!("missing '{}'", ty.data_ref_field()))?;
    let transaction_kind = kind_of(ty, p).ok_or("missing or unknown transaction kind")?;
    let request_id = p.get("request_id").and_then(|v| v.as_u64());
    if ty.is_request_event() && request_id.is_none() {
        return Err("missing 'request_id'".to_string());
    }
    Ok(AuditEvent {
        id: format!("{}-{}", raw.tx_digest, raw.seq),
        event_type: ty,
        actor_address: actor.to_string(),
        subject_address: subject.to_string(),
        data_ref: data_ref.to_string(),
        transaction_kind,
        timestamp: raw.timestamp_ms,
        sequence: raw.seq,
        request_id,
        source_ref: raw.tx_digest.clone(),
    })
}

/// `None` (with a warning) for events that lack a required field.
pub fn normalize(raw: &RawEvent) -> Option<AuditEvent> {
    match try_normalize(raw) {
        Ok(ev) => Some(ev),
        Err(reason) => {
            warn!(target: "carecore::audit", "skipping event seq={} type={}: {}", raw.seq, raw.type_name, reason);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(type_name: &str, payload: Value) -> RawEvent {
        RawEvent { seq: 7, type_name: type_name.into(), timestamp_ms: 100, tx_digest: "0xabc".into(), payload }
    }

    #[test]
    fn maps_per_type_fields() {
        let ev = normalize(&raw(
            "DataAccessed",
            json!({"accessor": "0xd", "patient": "0xp", "data_ref": "rec_1", "kind": "read", "request_id": 4}),
        ))
        .unwrap();
        assert_eq!(ev.actor_address, "0xd");
        assert_eq!(ev.subject_address, "0xp");
        assert_eq!(ev.transaction_kind, TransactionKind::Read);
        assert_eq!(ev.request_id, Some(4));
        assert_eq!(ev.source_ref, "0xabc");
    }

    #[test]
    fn expiry_has_no_actor() {
        let ev = normalize(&raw(
            "AccessRequestExpired",
            json!({"request_id": 1, "patient": "0xp", "requestor": "0xd", "data_ref": "labs"}),
        ))
        .unwrap();
        assert_eq!(ev.actor_address, "");
        assert_eq!(ev.transaction_kind, TransactionKind::Expiry);
    }

    #[test]
    fn missing_fields_are_skipped() {
        assert!(normalize(&raw("AccessRequestApproved", json!({"patient": "0xp", "data_ref": "x"}))).is_none());
        assert!(normalize(&raw("DataAdded", json!({"author": "0xd", "record_id": "rec_1"}))).is_none());
        assert!(normalize(&raw("SomethingElse", json!({}))).is_none());
    }
}
