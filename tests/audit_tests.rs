mod common;

use std::sync::Arc;

use carecore::audit::{AuditAggregator, AuditEventType, AuditFilter, EventLog, MemoryEventLog, NewEvent};
use carecore::model::{Actor, TransactionKind};
use common::{harness, T0};
use serde_json::json;

#[test]
fn statistics_summarize_one_patient() {
    let h = harness();
    let wf = &h.core.workflow;
    let patient = Actor::patient("0xpat");
    let d1 = Actor::doctor("0xd1");
    let d2 = Actor::doctor("0xd2");

    let r1 = wf.create(&d1, "0xpat", "labs", None).unwrap();
    h.clock.advance_ms(100);
    let r2 = wf.create(&d2, "0xpat", "imaging", None).unwrap();
    h.clock.advance_ms(100);
    let r3 = wf.create(&d1, "0xpat", "vitals", None).unwrap();
    wf.create(&d1, "0xsomeone", "labs", None).unwrap();

    wf.approve(r1.id, &patient).unwrap();
    wf.reject(r2.id, &patient).unwrap();
    h.clock.advance_ms(100);
    wf.approve(r3.id, &patient).unwrap();
    h.clock.advance_ms(100);
    wf.record_data_access(r1.id, &d1, TransactionKind::Read).unwrap();
    h.clock.advance_ms(100);
    wf.record_data_access(r3.id, &d1, TransactionKind::Write).unwrap();
    let last = h.now();

    let stats = h.core.audit.statistics("0xpat").unwrap();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.approved, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.expired, 0);
    assert_eq!(stats.total_accesses, 2);
    assert_eq!(stats.unique_accessors, 2);
    assert_eq!(stats.last_access_time, Some(last));

    let empty = h.core.audit.statistics("0xnobody").unwrap();
    assert_eq!(empty.total_requests, 0);
    assert_eq!(empty.last_access_time, None);
}

#[test]
fn filters_combine_and_order_is_newest_first() {
    let h = harness();
    let wf = &h.core.workflow;
    let patient = Actor::patient("0xpat");
    let r1 = wf.create(&Actor::doctor("0xd1"), "0xpat", "labs", None).unwrap();
    h.clock.advance_ms(1_000);
    let r2 = wf.create(&Actor::doctor("0xd2"), "0xpat", "labs", None).unwrap();
    h.clock.advance_ms(1_000);
    wf.approve(r1.id, &patient).unwrap();
    wf.approve(r2.id, &patient).unwrap();
    h.clock.advance_ms(1_000);
    wf.record_data_access(r2.id, &Actor::doctor("0xd2"), TransactionKind::Read).unwrap();

    let all = h.core.audit.query(&AuditFilter::for_subject("0xpat")).unwrap();
    assert_eq!(all.len(), 5);
    for pair in all.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp);
        if pair[0].timestamp == pair[1].timestamp {
            assert!(pair[0].sequence > pair[1].sequence);
        }
    }
    assert_eq!(all[0].event_type, AuditEventType::DataAccessed);

    let by_d2 = h.core.audit.query(&AuditFilter { actor: Some("0xd2".into()), ..Default::default() }).unwrap();
    assert_eq!(by_d2.len(), 2);
    assert!(by_d2.iter().all(|e| e.actor_address == "0xd2"));

    let approvals = h
        .core
        .audit
        .query(&AuditFilter { event_type: Some(AuditEventType::AccessRequestApproved), ..Default::default() })
        .unwrap();
    assert_eq!(approvals.len(), 2);
    assert!(approvals.iter().all(|e| e.transaction_kind == TransactionKind::Approval && e.actor_address == "0xpat"));

    let window = AuditFilter { from_time: Some(T0 + 1_000), to_time: Some(T0 + 2_000), ..Default::default() };
    let in_window = h.core.audit.query(&window).unwrap();
    assert_eq!(in_window.len(), 3);
    assert!(in_window.iter().all(|e| e.timestamp >= T0 + 1_000 && e.timestamp <= T0 + 2_000));

    let limited = h.core.audit.query(&AuditFilter { limit: Some(2), ..AuditFilter::for_subject("0xpat") }).unwrap();
    assert_eq!(limited, all[..2].to_vec());
}

#[test]
fn expiry_events_have_no_actor() {
    let h = harness();
    let wf = &h.core.workflow;
    wf.create(&Actor::doctor("0xd1"), "0xpat", "labs", Some(std::time::Duration::from_secs(1))).unwrap();
    h.clock.advance_ms(2_000);
    assert_eq!(wf.sweep_expired(h.now()).len(), 1);

    let expired = h
        .core
        .audit
        .query(&AuditFilter { event_type: Some(AuditEventType::AccessRequestExpired), ..Default::default() })
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].actor_address, "");
    assert_eq!(expired[0].transaction_kind, TransactionKind::Expiry);
    // An actor filter never matches an actor-less type
    let by_d1 = h.core.audit.query(&AuditFilter { actor: Some("0xd1".into()), ..Default::default() }).unwrap();
    assert!(by_d1.iter().all(|e| e.event_type != AuditEventType::AccessRequestExpired));
    assert_eq!(h.core.audit.statistics("0xpat").unwrap().expired, 1);
}

#[test]
fn malformed_events_are_skipped() {
    let log = Arc::new(MemoryEventLog::new());
    let agg = AuditAggregator::new(log.clone(), 100);
    let ok = json!({"request_id": 1, "requestor": "0xd", "patient": "0xp", "data_ref": "labs"});
    log.append(AuditEventType::AccessRequestCreated.new_event(10, ok)).unwrap();
    // No request id
    log.append(AuditEventType::AccessRequestCreated.new_event(11, json!({"requestor": "0xd", "patient": "0xp", "data_ref": "x"})))
        .unwrap();
    // No accessor
    log.append(AuditEventType::DataAccessed.new_event(12, json!({"patient": "0xp", "data_ref": "x", "kind": "read"}))).unwrap();
    // Unknown type name is never queried
    log.append(NewEvent { type_name: "Mystery".into(), timestamp_ms: 13, payload: json!({"patient": "0xp"}) }).unwrap();

    let out = agg.query(&AuditFilter::for_subject("0xp")).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].request_id, Some(1));
    assert_eq!(out[0].id, format!("{}-{}", out[0].source_ref, out[0].sequence));
}

#[test]
fn fetch_cap_bounds_each_type() {
    let log = Arc::new(MemoryEventLog::new());
    let agg = AuditAggregator::new(log.clone(), 3);
    for i in 0..10 {
        let p = json!({"accessor": "0xd", "patient": "0xp", "data_ref": format!("r{}", i), "kind": "read"});
        log.append(AuditEventType::DataAccessed.new_event(i, p)).unwrap();
    }
    let out = agg.query(&AuditFilter::default()).unwrap();
    assert_eq!(out.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![9, 8, 7]);
}

#[test]
fn newest_events_survive_the_fetch_cap_regardless_of_append_order() {
    let log = Arc::new(MemoryEventLog::new());
    let agg = AuditAggregator::new(log.clone(), 2);
    for ts in [30, 10, 20] {
        let p = json!({"accessor": "0xd", "patient": "0xp", "data_ref": format!("r{}", ts), "kind": "read"});
        log.append(AuditEventType::DataAccessed.new_event(ts, p)).unwrap();
    }
    let created = json!({"request_id": 7, "requestor": "0xd", "patient": "0xp", "data_ref": "labs"});
    log.append(AuditEventType::AccessRequestCreated.new_event(25, created)).unwrap();

    let newest = agg.query(&AuditFilter { limit: Some(1), ..Default::default() }).unwrap();
    assert_eq!(newest.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![30]);

    let all = agg.query(&AuditFilter::for_subject("0xp")).unwrap();
    assert_eq!(all.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![30, 25, 20]);
}

#[test]
fn mirrored_log_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("events.jsonl");
    {
        let log = Arc::new(MemoryEventLog::with_mirror(&path).unwrap());
        let p = json!({"request_id": 4, "requestor": "0xd", "patient": "0xp", "data_ref": "labs"});
        log.append(AuditEventType::AccessRequestCreated.new_event(T0, p)).unwrap();
    }
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 1);

    let log = Arc::new(MemoryEventLog::with_mirror(&path).unwrap());
    let agg = AuditAggregator::new(log, 10);
    let stats = agg.statistics("0xp").unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.unique_accessors, 1);
}
