//! Risk-scoring and triage-ranking engine.
//!
//! Pure domain logic over read-only snapshots: the auditor, the baseline
//! comparator, the scoring strategies and the triage ranker. The only
//! outbound call is through the pluggable scoring backend; persistence is the
//! caller's job.

pub mod audit;
pub mod backend;
pub mod baseline;
pub mod scoring;
pub mod triage;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::AiConfig;
use crate::models::{
    AuditResult, HistoricalBaseline, Patient, RiskAssessment, TriageEntry, VitalsReading,
};

pub use audit::VitalsAuditor;
pub use backend::{BackendError, HttpBackend, NullBackend, ScoringBackend};
pub use baseline::{baseline, BaselineComparison};
pub use scoring::{LlmScorer, RuleBasedScorer, ScoringStrategy};
pub use triage::{TrendModel, TriageInput, TriageRanker};

/// Facade wiring the components to one configured backend. Strategy selection
/// happens here, once, at construction.
pub struct RiskEngine {
    backend: Arc<dyn ScoringBackend>,
    scorer: Arc<dyn ScoringStrategy>,
    auditor: VitalsAuditor,
    ranker: TriageRanker,
}

impl RiskEngine {
    pub fn from_config(ai: &AiConfig) -> Result<Self, BackendError> {
        let backend: Arc<dyn ScoringBackend> = match &ai.endpoint {
            Some(endpoint) => Arc::new(HttpBackend::new(
                endpoint,
                ai.api_key.clone(),
                ai.model.clone(),
                Duration::from_secs(ai.timeout_secs),
            )?),
            None => Arc::new(NullBackend),
        };
        Ok(Self::with_backend(backend))
    }

    pub fn with_backend(backend: Arc<dyn ScoringBackend>) -> Self {
        let scorer: Arc<dyn ScoringStrategy> = if backend.is_enabled() {
            Arc::new(LlmScorer::new(backend.clone()))
        } else {
            Arc::new(RuleBasedScorer)
        };
        Self {
            auditor: VitalsAuditor::new(backend.clone()),
            ranker: TriageRanker::new(),
            scorer,
            backend,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.scorer.name()
    }

    pub async fn audit(&self, vitals: &VitalsReading) -> AuditResult {
        self.auditor.audit(vitals).await
    }

    pub async fn score(
        &self,
        current: &VitalsReading,
        baseline: Option<&HistoricalBaseline>,
    ) -> RiskAssessment {
        self.scorer.score(current, baseline).await
    }

    pub fn rank(&self, inputs: &[TriageInput]) -> Vec<TriageEntry> {
        self.ranker.rank(inputs)
    }

    /// Free-form clinical question over a patient's latest vitals. Degrades
    /// to a canned summary built from the recorded data when the backend is
    /// unavailable.
    pub async fn copilot_answer(
        &self,
        patient: &Patient,
        latest: Option<&VitalsReading>,
        question: &str,
    ) -> String {
        if self.backend.is_enabled() {
            let prompt = copilot_prompt(patient, latest, question);
            match self.backend.evaluate(&prompt).await {
                Ok(reply) if !reply.trim().is_empty() => return reply.trim().to_string(),
                Ok(_) => warn!("copilot backend returned an empty reply"),
                Err(error) => warn!(%error, "copilot backend unavailable"),
            }
        }
        offline_copilot_answer(patient, latest)
    }
}

fn copilot_prompt(patient: &Patient, latest: Option<&VitalsReading>, question: &str) -> String {
    let mut prompt = format!(
        "You are a clinical assistant. Patient: {}, age {}.\n",
        patient.name, patient.age
    );
    match latest {
        Some(v) => prompt.push_str(&format!(
            "Latest vitals: heart rate {} bpm, blood pressure {}, \
             temperature {:.1} F, oxygen saturation {:.1}%.\n",
            v.heart_rate, v.blood_pressure, v.temperature, v.oxygen_saturation
        )),
        None => prompt.push_str("No vital signs have been recorded yet.\n"),
    }
    prompt.push_str(&format!(
        "Answer the following question concisely and factually: {question}"
    ));
    prompt
}

fn offline_copilot_answer(patient: &Patient, latest: Option<&VitalsReading>) -> String {
    match latest {
        Some(v) => format!(
            "The AI assistant is currently unavailable. Latest recorded vitals for {}: \
             heart rate {} bpm, blood pressure {}, temperature {:.1} F, \
             oxygen saturation {:.1}%.",
            patient.name, v.heart_rate, v.blood_pressure, v.temperature, v.oxygen_saturation
        ),
        None => format!(
            "The AI assistant is currently unavailable and no vital signs have been \
             recorded for {} yet.",
            patient.name
        ),
    }
}
