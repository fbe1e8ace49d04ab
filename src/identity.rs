//! Actor identity: role assignment gated by an identity-proof `Verifier`.
//!
//! Each address holds exactly one role. The assignment is written once through
//! `KeyValueStore::insert_new`, so a second assignment (even to the same role)
//! is refused instead of silently overwriting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::kv::{self, KeyValueStore};
use crate::model::{Actor, Role};

const ROLE_PREFIX: &str = "role/";

/// Outcome of an identity proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verification {
    Verified { proof_ref: String, verified_at: i64, expires_at: i64 },
    Failed { reason: String },
}

/// Identity-proof capability. Production wires a real proof system; tests pass a stub.
pub trait Verifier: Send + Sync {
    fn verify(&self, address: &str) -> Verification;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub address: String,
    pub role: Role,
    pub assigned_at: i64,
    pub proof_ref: String,
    pub proof_expires_at: i64,
}

impl RoleAssignment {
    pub fn actor(&self) -> Actor { Actor::new(self.address.clone(), self.role) }
    pub fn proof_valid_at(&self, now_ms: i64) -> bool { now_ms < self.proof_expires_at }
}

pub struct RoleRegistry {
    kv: Arc<dyn KeyValueStore>,
    verifier: Arc<dyn Verifier>,
    clock: Arc<dyn Clock>,
}

impl RoleRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>, verifier: Arc<dyn Verifier>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, verifier, clock }
    }

    fn key(address: &str) -> String { format!("{}{}", ROLE_PREFIX, address) }

    pub fn assign_role(&self, address: &str, role: Role) -> CoreResult<RoleAssignment> {
        if address.trim().is_empty() {
            return Err(CoreError::invalid("bad_address", "address must not be empty"));
        }
        let (proof_ref, proof_expires_at) = match self.verifier.verify(address) {
            Verification::Verified { proof_ref, expires_at, .. } => (proof_ref, expires_at),
            Verification::Failed { reason } => {
                warn!(target: "carecore::identity", "verification failed address={} reason={}", address, reason);
                return Err(CoreError::denied("verification_failed".to_string(), format!("identity verification failed: {}", reason)));
            }
        };
        let assignment = RoleAssignment {
            address: address.to_string(),
            role,
            assigned_at: self.clock.now_ms(),
            proof_ref,
            proof_expires_at,
        };
        if !kv::insert_new_json(self.kv.as_ref(), &Self::key(address), &assignment)? {
            return Err(CoreError::conflict("role_already_assigned".to_string(), format!("address {} already holds a role", address)));
        }
        info!(target: "carecore::identity", "role assigned address={} role={}", address, role);
        Ok(assignment)
    }

    pub fn role_of(&self, address: &str) -> CoreResult<Option<RoleAssignment>> {
        kv::get_json(self.kv.as_ref(), &Self::key(address))
    }

    /// Resolve an address to the actor it acts as; unassigned addresses are `NotFound`.
    pub fn actor(&self, address: &str) -> CoreResult<Actor> {
        match self.role_of(address)? {
            Some(a) => Ok(a.actor()),
            None => Err(CoreError::not_found("role_not_assigned".to_string(), format!("no role assigned to {}", address))),
        }
    }
}
