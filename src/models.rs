use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ===== Patients =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub medical_record_number: String, // unique per patient, e.g. "MRN-2024-0001"
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub age: i32,
    pub medical_record_number: String,
}

// ===== Vital signs =====

/// One timestamped set of vitals for a patient. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalsReading {
    pub id: i64,
    pub patient_id: i64,
    pub heart_rate: i32,        // bpm
    pub blood_pressure: String, // "systolic/diastolic", e.g. "120/80"
    pub temperature: f64,       // degrees Fahrenheit
    pub oxygen_saturation: f64, // percent
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVitals {
    pub heart_rate: i32,
    pub blood_pressure: String,
    pub temperature: f64,
    pub oxygen_saturation: f64,
}

/// A patient's personal average vitals, derived from past readings.
///
/// Never persisted. Absence (`None` at the call site) means the patient has
/// no history yet, which is distinct from a zero baseline.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HistoricalBaseline {
    pub avg_heart_rate: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub avg_oxygen_saturation: Option<f64>,
}

// ===== Risk assessment =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Map a score in [0, 1] to its level. Boundaries are strict: a score of
    /// exactly 0.6 is MEDIUM and exactly 0.3 is LOW.
    pub fn from_score(score: f64) -> Self {
        if score > 0.6 {
            RiskLevel::High
        } else if score > 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Case-insensitive parse of "LOW" / "MEDIUM" / "HIGH".
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The scored output for one vitals snapshot.
///
/// `baseline_analysis` is recomputed on every request and is intentionally
/// never persisted; the stored `Prediction` row drops it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64, // always clamped to [0, 1]
    pub risk_level: RiskLevel,
    pub recommendation: String,
    pub baseline_analysis: Option<String>,
}

/// A persisted risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub patient_id: i64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    pub created_at: DateTime<Utc>,
}

// ===== Audit =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Valid,
    Suspicious,
}

/// Outcome of the pre-persistence plausibility check. Transient and purely
/// advisory: the reading is persisted regardless, and a SUSPICIOUS result is
/// only attached to the write response as a warning.
#[derive(Debug, Clone, Serialize)]
pub struct AuditResult {
    pub status: AuditStatus,
    pub reason: String,
}

impl AuditResult {
    pub fn is_suspicious(&self) -> bool {
        self.status == AuditStatus::Suspicious
    }
}

// ===== Triage =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Stable,
    Improving,
    Deteriorating,
}

/// One row of the cross-patient urgency ranking. Computed fresh on every
/// triage request, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TriageEntry {
    pub patient_id: i64,
    pub name: String,
    pub urgency_score: f64, // clamped to [0, 1]
    pub reason: String,
    pub current_risk: RiskLevel,
    pub trend: Trend,
}
