//! Policy & access-control engine.
//!
//! Evaluation is pure: a decision depends only on the active rule table and the
//! arguments. The table is held as an immutable snapshot behind an `Arc`; `reload`
//! swaps in a new snapshot with a strictly greater version, so an evaluation that
//! already grabbed a snapshot finishes against a consistent table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::model::{DataCategory, Permission, Role};

mod table;

pub use table::{PolicyRule, PolicyTable};

/// Allow/deny with a human-readable reason. Denials are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub code: String,
    pub reason: String,
}

impl PolicyDecision {
    pub fn allow(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { allowed: true, code: code.into(), reason: reason.into() }
    }
    pub fn deny(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { allowed: false, code: code.into(), reason: reason.into() }
    }

    /// `Ok(())` when allowed, `PolicyDenied` carrying the reason otherwise.
    pub fn into_result(self) -> CoreResult<()> {
        if self.allowed { Ok(()) } else { Err(CoreError::PolicyDenied { code: self.code, reason: self.reason }) }
    }
}

struct CompiledTable {
    source: PolicyTable,
    masks: HashMap<(Role, DataCategory), Permission>,
}

impl CompiledTable {
    fn compile(source: PolicyTable) -> Self {
        let masks = source.index();
        Self { source, masks }
    }

    fn mask(&self, role: Role, category: DataCategory) -> Permission {
        self.masks.get(&(role, category)).copied().unwrap_or(Permission::NONE)
    }
}

pub struct PolicyEngine {
    active: RwLock<Arc<CompiledTable>>,
}

impl PolicyEngine {
    pub fn new(table: PolicyTable) -> CoreResult<Self> {
        table.validate()?;
        info!(target: "carecore::policy", "policy table loaded version={} rules={}", table.version, table.rules.len());
        Ok(Self { active: RwLock::new(Arc::new(CompiledTable::compile(table))) })
    }

    fn current(&self) -> Arc<CompiledTable> { self.active.read().clone() }

    pub fn version(&self) -> u64 { self.current().source.version }

    pub fn snapshot(&self) -> PolicyTable { self.current().source.clone() }

    /// Replace the rule table. The new version must be greater than the active one.
    pub fn reload(&self, table: PolicyTable) -> CoreResult<u64> {
        table.validate()?;
        let mut w = self.active.write();
        let old = w.source.version;
        if table.version <= old {
            return Err(CoreError::config(format!(
                "policy reload rejected: version {} is not newer than active version {}",
                table.version, old
            )));
        }
        let version = table.version;
        *w = Arc::new(CompiledTable::compile(table));
        info!(target: "carecore::policy", "policy table reloaded version {} -> {}", old, version);
        Ok(version)
    }

    /// Permission bits the table grants `role` on `category`.
    pub fn permissions_for(&self, role: Role, category: DataCategory) -> Permission {
        self.current().mask(role, category)
    }

    pub fn check_permission(&self, role: Role, category: DataCategory, action: Permission) -> PolicyDecision {
        let mask = self.current().mask(role, category);
        let out = if mask.contains(action) {
            PolicyDecision::allow("permission_granted", format!("{} holds {} on {}", role, action, category))
        } else {
            PolicyDecision::deny("permission_denied", format!("{} lacks {} on {} (granted: {})", role, action, category, mask))
        };
        crate::tprintln!("policy.check role={} category={} action={} allowed={}", role, category, action, out.allowed);
        out
    }

    /// Self-modification gate, then the category rule. A patient acting on their own
    /// data may read it but never write, delete or share it.
    pub fn can_modify(
        &self,
        actor_address: &str,
        owner_address: &str,
        actor_role: Role,
        category: DataCategory,
        action: Permission,
    ) -> PolicyDecision {
        if actor_role == Role::Patient && actor_address == owner_address && action.is_mutation() {
            debug!(target: "carecore::policy", "self-modification denied actor={} category={} action={}", actor_address, category, action);
            return PolicyDecision::deny(
                "self_modification",
                format!("self-modification denied: patients cannot {} their own {} data", action, category),
            );
        }
        self.check_permission(actor_role, category, action)
    }

    /// Only a patient may grant access to their data, and never to themselves.
    pub fn can_authorize_access(&self, authorizer_address: &str, target_address: &str, authorizer_role: Role) -> PolicyDecision {
        if authorizer_role != Role::Patient {
            return PolicyDecision::deny("authorization_denied", format!("{} cannot authorize access to patient data", authorizer_role));
        }
        if authorizer_address == target_address {
            return PolicyDecision::deny("authorization_denied", "patients cannot grant access to themselves");
        }
        PolicyDecision::allow("authorization_granted", "patient may authorize access")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PolicyEngine { PolicyEngine::new(PolicyTable::default()).unwrap() }

    #[test]
    fn missing_rule_denies() {
        let e = engine();
        let d = e.check_permission(Role::Pharmacist, DataCategory::Diagnosis, Permission::READ);
        assert!(!d.allowed);
        assert_eq!(d.code, "permission_denied");
    }

    #[test]
    fn combined_action_needs_every_bit() {
        let e = engine();
        assert!(e.check_permission(Role::Doctor, DataCategory::LabResult, Permission::READ | Permission::WRITE).allowed);
        assert!(!e.check_permission(Role::Doctor, DataCategory::LabResult, Permission::WRITE | Permission::DELETE).allowed);
    }

    #[test]
    fn self_modification_short_circuits() {
        let e = engine();
        let d = e.can_modify("0xp", "0xp", Role::Patient, DataCategory::LabResult, Permission::WRITE);
        assert_eq!(d.code, "self_modification");
        // Reading your own data is still governed by the category rule
        let r = e.can_modify("0xp", "0xp", Role::Patient, DataCategory::LabResult, Permission::READ);
        assert!(r.allowed);
    }

    #[test]
    fn reload_requires_newer_version() {
        let e = engine();
        assert!(e.reload(PolicyTable::new(1, vec![])).is_err());
        assert_eq!(e.reload(PolicyTable::new(2, vec![])).unwrap(), 2);
        assert!(!e.check_permission(Role::Doctor, DataCategory::LabResult, Permission::READ).allowed);
    }
}
