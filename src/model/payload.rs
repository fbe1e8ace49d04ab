use serde::{Deserialize, Serialize};

use super::DataCategory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabTestResult {
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reference_range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResultData {
    pub test_name: String,
    pub test_code: String,
    pub results: Vec<LabTestResult>,
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    #[serde(default)]
    pub generic_name: String,
    pub dosage: String,
    #[serde(default)]
    pub form: String,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub instructions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionData {
    pub prescription_id: String,
    pub medications: Vec<Medication>,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    #[serde(default)]
    pub refills: u32,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalRecordData {
    pub chief_complaint: String,
    #[serde(default)]
    pub history_of_present_illness: String,
    #[serde(default)]
    pub past_medical_history: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub assessment: String,
    pub plan: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisData {
    pub icd10_code: String,
    pub description: String,
    pub severity: String,
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentIntervention {
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentPlanData {
    pub plan_id: String,
    pub goals: Vec<String>,
    pub interventions: Vec<TreatmentIntervention>,
    #[serde(default)]
    pub follow_up_required: bool,
    #[serde(default)]
    pub follow_up_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalSignsData {
    pub systolic: u16,
    pub diastolic: u16,
    pub heart_rate: u16,
    pub temperature_c: f64,
    pub respiratory_rate: u16,
    pub oxygen_saturation: f64,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    /// Epoch millis of the measurement.
    pub measured_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingResultData {
    pub study_type: String,
    pub body_part: String,
    pub findings: String,
    pub impression: String,
    #[serde(default)]
    pub recommendations: String,
    pub radiologist_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationHistoryEntry {
    pub medication: String,
    pub started_at: i64,
    #[serde(default)]
    pub ended_at: Option<i64>,
    pub dosage: String,
    #[serde(default)]
    pub indication: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationHistoryData {
    pub medications: Vec<MedicationHistoryEntry>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub adverse_reactions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralRecordData {
    pub title: String,
    pub body: String,
}

/// Decrypted health data. One variant per category; the `type` tag is the category name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HealthPayload {
    Prescription(PrescriptionData),
    LabResult(LabResultData),
    GeneralRecord(GeneralRecordData),
    MedicalRecord(MedicalRecordData),
    Diagnosis(DiagnosisData),
    TreatmentPlan(TreatmentPlanData),
    VitalSigns(VitalSignsData),
    ImagingResult(ImagingResultData),
    MedicationHistory(MedicationHistoryData),
}

impl HealthPayload {
    pub fn category(&self) -> DataCategory {
        match self {
            HealthPayload::Prescription(_) => DataCategory::Prescription,
            HealthPayload::LabResult(_) => DataCategory::LabResult,
            HealthPayload::GeneralRecord(_) => DataCategory::GeneralRecord,
            HealthPayload::MedicalRecord(_) => DataCategory::MedicalRecord,
            HealthPayload::Diagnosis(_) => DataCategory::Diagnosis,
            HealthPayload::TreatmentPlan(_) => DataCategory::TreatmentPlan,
            HealthPayload::VitalSigns(_) => DataCategory::VitalSigns,
            HealthPayload::ImagingResult(_) => DataCategory::ImagingResult,
            HealthPayload::MedicationHistory(_) => DataCategory::MedicationHistory,
        }
    }

    /// Canonical text of the fields that make two entries of this category "the same"
    /// for duplicate detection. Free-text notes are deliberately left out.
    pub fn match_key(&self) -> String {
        match self {
            HealthPayload::LabResult(d) => {
                let results: Vec<String> = d
                    .results
                    .iter()
                    .map(|r| format!("{}={}{}", r.parameter, r.value, r.unit))
                    .collect();
                format!("{}|{}|{}", d.test_name.trim().to_lowercase(), d.test_code, results.join(","))
            }
            HealthPayload::Prescription(d) => {
                let meds: Vec<String> = d
                    .medications
                    .iter()
                    .map(|m| format!("{}:{}", m.name.trim().to_lowercase(), m.dosage))
                    .collect();
                format!("{}|{}|{}", meds.join(","), d.dosage, d.frequency)
            }
            HealthPayload::MedicalRecord(d) => {
                format!("{}|{}", d.chief_complaint.trim().to_lowercase(), d.assessment.trim().to_lowercase())
            }
            HealthPayload::Diagnosis(d) => format!("{}|{}", d.icd10_code.to_uppercase(), d.status),
            HealthPayload::TreatmentPlan(d) => d.plan_id.clone(),
            HealthPayload::VitalSigns(d) => d.measured_at.to_string(),
            HealthPayload::ImagingResult(d) => {
                format!("{}|{}|{}", d.study_type, d.body_part, d.findings.trim())
            }
            HealthPayload::MedicationHistory(d) => {
                let meds: Vec<String> = d
                    .medications
                    .iter()
                    .map(|m| format!("{}:{}:{}", m.medication.trim().to_lowercase(), m.dosage, m.started_at))
                    .collect();
                meds.join(",")
            }
            HealthPayload::GeneralRecord(d) => format!("{}|{}", d.title.trim(), d.body.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab(value: f64, notes: Option<&str>) -> HealthPayload {
        HealthPayload::LabResult(LabResultData {
            test_name: "CBC".into(),
            test_code: "58410-2".into(),
            results: vec![LabTestResult {
                parameter: "hgb".into(),
                value,
                unit: "g/dL".into(),
                status: "normal".into(),
                reference_range: "12-16".into(),
            }],
            status: "normal".into(),
            notes: notes.map(|s| s.to_string()),
        })
    }

    #[test]
    fn match_key_ignores_notes_but_not_values() {
        assert_eq!(lab(13.1, None).match_key(), lab(13.1, Some("fasting")).match_key());
        assert_ne!(lab(13.1, None).match_key(), lab(9.0, None).match_key());
    }

    #[test]
    fn tagged_serialization_carries_category() {
        let v = serde_json::to_value(lab(13.1, None)).unwrap();
        assert_eq!(v["type"], "lab_result");
        let back: HealthPayload = serde_json::from_value(v).unwrap();
        assert_eq!(back.category(), DataCategory::LabResult);
    }
}
