//! Versioned (role, category) -> permission rule table.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::model::{DataCategory, Permission, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: Role,
    pub category: DataCategory,
    pub permissions: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    pub version: u64,
    pub rules: Vec<PolicyRule>,
}

impl PolicyTable {
    pub fn new(version: u64, rules: Vec<PolicyRule>) -> Self { Self { version, rules } }

    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        let t: PolicyTable = serde_json::from_str(text)
            .map_err(|e| CoreError::config(format!("invalid policy table: {}", e)))?;
        t.validate()?;
        Ok(t)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::config(format!("cannot read policy table '{}': {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// A (role, category) pair may appear at most once; the table would otherwise be ambiguous.
    pub fn validate(&self) -> CoreResult<()> {
        let mut seen: HashMap<(Role, DataCategory), ()> = HashMap::new();
        for r in &self.rules {
            if seen.insert((r.role, r.category), ()).is_some() {
                return Err(CoreError::config(format!("duplicate policy rule for ({}, {})", r.role, r.category)));
            }
        }
        Ok(())
    }

    pub(crate) fn index(&self) -> HashMap<(Role, DataCategory), Permission> {
        self.rules.iter().map(|r| ((r.role, r.category), r.permissions)).collect()
    }
}

impl Default for PolicyTable {
    /// Baseline clinical table: doctors read and write every category, pharmacists read
    /// prescriptions and medication history, patients read everything about themselves.
    fn default() -> Self {
        let mut rules = Vec::new();
        for category in DataCategory::ALL {
            rules.push(PolicyRule { role: Role::Doctor, category, permissions: Permission::READ | Permission::WRITE });
            rules.push(PolicyRule { role: Role::Patient, category, permissions: Permission::READ });
        }
        for category in [DataCategory::Prescription, DataCategory::MedicationHistory] {
            rules.push(PolicyRule { role: Role::Pharmacist, category, permissions: Permission::READ });
        }
        Self { version: 1, rules }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_masks() {
        let t = PolicyTable::from_json_str(
            r#"{"version": 3, "rules": [
                {"role": "doctor", "category": "lab_result", "permissions": 3},
                {"role": "patient", "category": "lab_result", "permissions": 1}
            ]}"#,
        )
        .unwrap();
        assert_eq!(t.version, 3);
        assert_eq!(t.index()[&(Role::Doctor, DataCategory::LabResult)], Permission::READ | Permission::WRITE);
    }

    #[test]
    fn rejects_duplicate_pairs() {
        let err = PolicyTable::from_json_str(
            r#"{"version": 1, "rules": [
                {"role": "doctor", "category": "diagnosis", "permissions": 1},
                {"role": "doctor", "category": "diagnosis", "permissions": 3}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }
}
