//! Core domain vocabulary: roles, data categories, permission masks and actors.
//!
//! Numeric codes follow the wire codes used by the policy table and the event
//! log (roles 1..=3, categories 1..=9, permission bits 1/2/4/8), so tables and
//! raw events written by other tooling decode to the same values.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

mod payload;

pub use payload::{
    DiagnosisData, HealthPayload, ImagingResultData, LabResultData, LabTestResult, MedicalRecordData,
    Medication, MedicationHistoryData, MedicationHistoryEntry, PrescriptionData, TreatmentIntervention,
    TreatmentPlanData, VitalSignsData, GeneralRecordData,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Pharmacist,
    Patient,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Doctor, Role::Pharmacist, Role::Patient];

    pub fn code(self) -> u8 {
        match self {
            Role::Doctor => 1,
            Role::Pharmacist => 2,
            Role::Patient => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Role::Doctor),
            2 => Some(Role::Pharmacist),
            3 => Some(Role::Patient),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Pharmacist => "pharmacist",
            Role::Patient => "patient",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Prescription,
    LabResult,
    GeneralRecord,
    MedicalRecord,
    Diagnosis,
    TreatmentPlan,
    VitalSigns,
    ImagingResult,
    MedicationHistory,
}

impl DataCategory {
    pub const ALL: [DataCategory; 9] = [
        DataCategory::Prescription,
        DataCategory::LabResult,
        DataCategory::GeneralRecord,
        DataCategory::MedicalRecord,
        DataCategory::Diagnosis,
        DataCategory::TreatmentPlan,
        DataCategory::VitalSigns,
        DataCategory::ImagingResult,
        DataCategory::MedicationHistory,
    ];

    pub fn code(self) -> u8 {
        match self {
            DataCategory::Prescription => 1,
            DataCategory::LabResult => 2,
            DataCategory::GeneralRecord => 3,
            DataCategory::MedicalRecord => 4,
            DataCategory::Diagnosis => 5,
            DataCategory::TreatmentPlan => 6,
            DataCategory::VitalSigns => 7,
            DataCategory::ImagingResult => 8,
            DataCategory::MedicationHistory => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::Prescription => "prescription",
            DataCategory::LabResult => "lab_result",
            DataCategory::GeneralRecord => "general_record",
            DataCategory::MedicalRecord => "medical_record",
            DataCategory::Diagnosis => "diagnosis",
            DataCategory::TreatmentPlan => "treatment_plan",
            DataCategory::VitalSigns => "vital_signs",
            DataCategory::ImagingResult => "imaging_result",
            DataCategory::MedicationHistory => "medication_history",
        }
    }
}

impl Display for DataCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Permission bitmask: Read=1, Write=2, Delete=4, Share=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u8);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const READ: Permission = Permission(1);
    pub const WRITE: Permission = Permission(2);
    pub const DELETE: Permission = Permission(4);
    pub const SHARE: Permission = Permission(8);
    pub const ALL: Permission = Permission(15);

    /// Build from raw bits; unknown high bits are dropped.
    pub fn from_bits(bits: u8) -> Self { Permission(bits & Self::ALL.0) }
    pub fn bits(self) -> u8 { self.0 }
    pub fn is_empty(self) -> bool { self.0 == 0 }

    /// True when every bit of `other` is present in `self`.
    pub fn contains(self, other: Permission) -> bool { !other.is_empty() && self.0 & other.0 == other.0 }

    /// Write, Delete and Share alter data or who holds it.
    pub fn is_mutation(self) -> bool { self.0 & (Self::WRITE.0 | Self::DELETE.0 | Self::SHARE.0) != 0 }

    pub fn names(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.0 & Self::READ.0 != 0 { out.push("read"); }
        if self.0 & Self::WRITE.0 != 0 { out.push("write"); }
        if self.0 & Self::DELETE.0 != 0 { out.push("delete"); }
        if self.0 & Self::SHARE.0 != 0 { out.push("share"); }
        out
    }
}

impl std::ops::BitOr for Permission {
    type Output = Permission;
    fn bitor(self, rhs: Permission) -> Permission { Permission(self.0 | rhs.0) }
}

impl std::ops::BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Permission) { self.0 |= rhs.0; }
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() { return f.write_str("none"); }
        f.write_str(&self.names().join("|"))
    }
}

/// Caller identity as seen by the core: an address plus the role it acts under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub address: String,
    pub role: Role,
}

impl Actor {
    pub fn new(address: impl Into<String>, role: Role) -> Self { Self { address: address.into(), role } }
    pub fn doctor(address: impl Into<String>) -> Self { Self::new(address, Role::Doctor) }
    pub fn pharmacist(address: impl Into<String>) -> Self { Self::new(address, Role::Pharmacist) }
    pub fn patient(address: impl Into<String>) -> Self { Self::new(address, Role::Patient) }
}

/// What kind of transaction an audit event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Request,
    Approval,
    Rejection,
    Expiry,
    Read,
    Write,
    Delete,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Request => "request",
            TransactionKind::Approval => "approval",
            TransactionKind::Rejection => "rejection",
            TransactionKind::Expiry => "expiry",
            TransactionKind::Read => "read",
            TransactionKind::Write => "write",
            TransactionKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request" => Some(TransactionKind::Request),
            "approval" => Some(TransactionKind::Approval),
            "rejection" => Some(TransactionKind::Rejection),
            "expiry" => Some(TransactionKind::Expiry),
            "read" => Some(TransactionKind::Read),
            "write" => Some(TransactionKind::Write),
            "delete" => Some(TransactionKind::Delete),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_codes_are_stable() {
        assert_eq!(DataCategory::LabResult.code(), 2);
        assert_eq!(DataCategory::GeneralRecord.code(), 3);
        for c in DataCategory::ALL {
            assert_eq!(DataCategory::from_code(c.code()), Some(c));
        }
        assert_eq!(DataCategory::from_code(0), None);
        assert_eq!(Role::from_code(3), Some(Role::Patient));
    }

    #[test]
    fn permission_mask_semantics() {
        let rw = Permission::READ | Permission::WRITE;
        assert!(rw.contains(Permission::READ));
        assert!(rw.contains(Permission::READ | Permission::WRITE));
        assert!(!rw.contains(Permission::DELETE));
        assert!(!rw.contains(Permission::NONE));
        assert!(Permission::SHARE.is_mutation());
        assert!(!Permission::READ.is_mutation());
        assert_eq!(Permission::from_bits(0xFF), Permission::ALL);
        assert_eq!(rw.to_string(), "read|write");
    }
}
