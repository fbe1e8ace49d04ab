mod common;

use std::sync::Arc;

use carecore::clock::ManualClock;
use carecore::identity::RoleRegistry;
use carecore::kv::MemoryKvStore;
use carecore::model::Role;
use carecore::CoreError;
use common::{harness, StubVerifier, T0};

#[test]
fn roles_are_assigned_once() {
    let h = harness();
    let roles = &h.core.roles;
    let a = roles.assign_role("0xdoc", Role::Doctor).unwrap();
    assert_eq!(a.assigned_at, T0);
    assert_eq!(a.proof_ref, "proof-0xdoc");
    assert!(a.proof_valid_at(T0 + 1));

    for role in [Role::Doctor, Role::Patient] {
        let err = roles.assign_role("0xdoc", role).unwrap_err();
        assert!(matches!(err, CoreError::WorkflowConflict { ref code, .. } if code == "role_already_assigned"));
    }
    assert_eq!(roles.actor("0xdoc").unwrap().role, Role::Doctor);
    assert!(matches!(roles.actor("0xghost"), Err(CoreError::NotFound { .. })));
    assert!(roles.assign_role("  ", Role::Patient).is_err());
}

#[test]
fn failed_verification_assigns_nothing() {
    let kv = Arc::new(MemoryKvStore::new());
    let verifier = StubVerifier { reject: ["0xfake".to_string()].into_iter().collect() };
    let roles = RoleRegistry::new(kv.clone(), Arc::new(verifier), Arc::new(ManualClock::new(T0)));

    let err = roles.assign_role("0xfake", Role::Doctor).unwrap_err();
    assert!(err.message().contains("proof rejected"), "{}", err);
    assert!(roles.role_of("0xfake").unwrap().is_none());
    assert!(kv.is_empty());

    roles.assign_role("0xreal", Role::Pharmacist).unwrap();
    assert_eq!(kv.len(), 1);
}
