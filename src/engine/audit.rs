//! Pre-persistence plausibility audit for raw vitals.
//!
//! Hard rule checks run first and are authoritative; they catch values no
//! living patient can produce, which almost always means a failing sensor or
//! a data-entry slip. If the hard rules pass and a backend is configured, an
//! advisory AI check runs as a second opinion. The audit never blocks a
//! write: callers persist the reading regardless and attach a SUSPICIOUS
//! result as a warning.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::engine::backend::{extract_json, ScoringBackend};
use crate::models::{AuditResult, AuditStatus, VitalsReading};

pub const HEART_RATE_FLOOR: i32 = 30;
pub const HEART_RATE_CEILING: i32 = 220;
pub const TEMPERATURE_CEILING: f64 = 108.0;

pub struct VitalsAuditor {
    backend: Arc<dyn ScoringBackend>,
}

#[derive(Debug, Deserialize)]
struct PlausibilityVerdict {
    plausible: bool,
    #[serde(default)]
    reason: String,
}

impl VitalsAuditor {
    pub fn new(backend: Arc<dyn ScoringBackend>) -> Self {
        Self { backend }
    }

    pub async fn audit(&self, vitals: &VitalsReading) -> AuditResult {
        if vitals.heart_rate < HEART_RATE_FLOOR || vitals.heart_rate > HEART_RATE_CEILING {
            return AuditResult {
                status: AuditStatus::Suspicious,
                reason: "physiologically impossible heart rate".to_string(),
            };
        }
        if vitals.temperature > TEMPERATURE_CEILING {
            return AuditResult {
                status: AuditStatus::Suspicious,
                reason: "physiologically impossible temperature".to_string(),
            };
        }

        if self.backend.is_enabled() {
            if let Some(verdict) = self.advisory_check(vitals).await {
                if !verdict.plausible {
                    return AuditResult {
                        status: AuditStatus::Suspicious,
                        reason: format!("AI flagged: {}", verdict.reason),
                    };
                }
            }
        }

        AuditResult {
            status: AuditStatus::Valid,
            reason: "basic validation passed".to_string(),
        }
    }

    /// Ask the backend whether the reading is plausible. Any failure along
    /// the way (network, timeout, malformed reply) means the check is
    /// skipped, never surfaced to the caller.
    async fn advisory_check(&self, vitals: &VitalsReading) -> Option<PlausibilityVerdict> {
        let prompt = format!(
            "Are these vital signs physiologically plausible for a human patient?\n\
             - Heart rate: {} bpm\n\
             - Blood pressure: {}\n\
             - Temperature: {:.1} F\n\
             - Oxygen saturation: {:.1}%\n\
             Respond with a single JSON object: \
             {{\"plausible\": true or false, \"reason\": \"short explanation\"}}",
            vitals.heart_rate, vitals.blood_pressure, vitals.temperature, vitals.oxygen_saturation,
        );

        let reply = match self.backend.evaluate(&prompt).await {
            Ok(reply) => reply,
            Err(error) => {
                debug!(%error, "plausibility check skipped");
                return None;
            }
        };
        let json = extract_json(&reply)?;
        serde_json::from_str(&json).ok()
    }
}
