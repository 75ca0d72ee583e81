//! Risk scoring strategies.
//!
//! One contract, two interchangeable implementations selected by
//! configuration. `RuleBasedScorer` is a pure function over the vitals and is
//! always available; `LlmScorer` asks the external backend for a structured
//! verdict and falls back to the rules on any failure, so callers always get
//! a complete assessment and never an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::engine::backend::{extract_json, ScoringBackend};
use crate::engine::baseline::BaselineComparison;
use crate::models::{HistoricalBaseline, RiskAssessment, RiskLevel, VitalsReading};

pub const RECOMMEND_HIGH: &str =
    "Immediate medical attention recommended. Multiple vital signs indicate potential health concerns.";
pub const RECOMMEND_MEDIUM: &str =
    "Close monitoring advised. Some vital signs are outside normal ranges.";
pub const RECOMMEND_LOW: &str = "Routine care. All vital signs appear within normal ranges.";

pub fn recommendation_for(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::High => RECOMMEND_HIGH,
        RiskLevel::Medium => RECOMMEND_MEDIUM,
        RiskLevel::Low => RECOMMEND_LOW,
    }
}

/// Systolic pressure from a "systolic/diastolic" string. Unparseable input
/// defaults to a normal 120 rather than failing the assessment.
pub fn parse_systolic(blood_pressure: &str) -> i32 {
    blood_pressure
        .split('/')
        .next()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(120)
}

#[async_trait]
pub trait ScoringStrategy: Send + Sync {
    /// Score one vitals snapshot against an optional personal baseline.
    /// Infallible: every failure mode degrades to a well-defined assessment.
    async fn score(
        &self,
        current: &VitalsReading,
        baseline: Option<&HistoricalBaseline>,
    ) -> RiskAssessment;

    fn name(&self) -> &'static str;
}

/// Deterministic threshold rules. Also serves as the fallback for the
/// LLM-backed strategy and as triage's quick score, so there is exactly one
/// rule formula in the system.
pub struct RuleBasedScorer;

impl RuleBasedScorer {
    pub fn assess(
        &self,
        current: &VitalsReading,
        baseline: Option<&HistoricalBaseline>,
    ) -> RiskAssessment {
        let mut score: f64 = 0.0;

        if current.heart_rate > 100 || current.heart_rate < 60 {
            score += 0.3;
        }

        let systolic = parse_systolic(&current.blood_pressure);
        if systolic > 140 || systolic < 90 {
            score += 0.3;
        }

        if current.temperature > 100.4 || current.temperature < 96.0 {
            score += 0.2;
        }

        // Tiered: severe desaturation weighs double.
        if current.oxygen_saturation < 90.0 {
            score += 0.4;
        } else if current.oxygen_saturation < 95.0 {
            score += 0.2;
        }

        let comparison = BaselineComparison::compare(current.heart_rate, baseline);
        score += comparison.risk_contribution();

        let score = score.min(1.0);
        let level = RiskLevel::from_score(score);
        RiskAssessment {
            risk_score: score,
            risk_level: level,
            recommendation: recommendation_for(level).to_string(),
            baseline_analysis: Some(comparison.analysis_text()),
        }
    }

    /// Score from thresholds alone, ignoring history. Used by the triage
    /// ranker when no stored prediction exists for a patient.
    pub fn quick_score(&self, current: &VitalsReading) -> f64 {
        self.assess(current, None).risk_score
    }
}

#[async_trait]
impl ScoringStrategy for RuleBasedScorer {
    async fn score(
        &self,
        current: &VitalsReading,
        baseline: Option<&HistoricalBaseline>,
    ) -> RiskAssessment {
        self.assess(current, baseline)
    }

    fn name(&self) -> &'static str {
        "rule-based"
    }
}

/// LLM-backed strategy. Builds a structured prompt, validates the JSON
/// verdict, and silently falls back to `RuleBasedScorer` when the backend
/// call or the verdict is unusable.
pub struct LlmScorer {
    backend: Arc<dyn ScoringBackend>,
    fallback: RuleBasedScorer,
}

/// Shape the backend is asked to produce. `risk_score` stays a raw JSON value
/// so a non-numeric reply is caught during validation instead of failing the
/// whole deserialization with a less precise error.
#[derive(Debug, Deserialize)]
struct LlmVerdict {
    risk_score: serde_json::Value,
    risk_level: String,
    recommendation: Option<String>,
    baseline_analysis: Option<String>,
}

impl LlmScorer {
    pub fn new(backend: Arc<dyn ScoringBackend>) -> Self {
        Self {
            backend,
            fallback: RuleBasedScorer,
        }
    }

    fn build_prompt(current: &VitalsReading, baseline: Option<&HistoricalBaseline>) -> String {
        let mut prompt = format!(
            "You are a clinical risk assessment assistant. Assess the risk for a \
             patient with these current vital signs:\n\
             - Heart rate: {} bpm\n\
             - Blood pressure: {}\n\
             - Temperature: {:.1} F\n\
             - Oxygen saturation: {:.1}%\n",
            current.heart_rate,
            current.blood_pressure,
            current.temperature,
            current.oxygen_saturation,
        );
        if let Some(b) = baseline {
            prompt.push_str("Patient historical baseline:\n");
            if let Some(hr) = b.avg_heart_rate {
                prompt.push_str(&format!("- Average heart rate: {hr:.1} bpm\n"));
            }
            if let Some(temp) = b.avg_temperature {
                prompt.push_str(&format!("- Average temperature: {temp:.1} F\n"));
            }
            if let Some(spo2) = b.avg_oxygen_saturation {
                prompt.push_str(&format!("- Average oxygen saturation: {spo2:.1}%\n"));
            }
        } else {
            prompt.push_str("No historical baseline is available for this patient.\n");
        }
        prompt.push_str(
            "Respond with a single JSON object with exactly these keys: \
             risk_score (number between 0.0 and 1.0), risk_level (LOW, MEDIUM or HIGH), \
             recommendation (string), baseline_analysis (string).",
        );
        prompt
    }

    /// Validate a backend reply into an assessment. `None` means the reply is
    /// unusable and the caller must fall back.
    fn parse_verdict(
        reply: &str,
        comparison: &BaselineComparison,
    ) -> Option<RiskAssessment> {
        let json = extract_json(reply)?;
        let verdict: LlmVerdict = serde_json::from_str(&json).ok()?;

        let score = verdict.risk_score.as_f64()?;
        if !score.is_finite() {
            return None;
        }
        let score = score.clamp(0.0, 1.0);
        let level = RiskLevel::parse(&verdict.risk_level)?;

        Some(RiskAssessment {
            risk_score: score,
            risk_level: level,
            recommendation: verdict
                .recommendation
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| recommendation_for(level).to_string()),
            baseline_analysis: verdict
                .baseline_analysis
                .filter(|a| !a.trim().is_empty())
                .or_else(|| Some(comparison.analysis_text())),
        })
    }
}

#[async_trait]
impl ScoringStrategy for LlmScorer {
    async fn score(
        &self,
        current: &VitalsReading,
        baseline: Option<&HistoricalBaseline>,
    ) -> RiskAssessment {
        let comparison = BaselineComparison::compare(current.heart_rate, baseline);
        match self
            .backend
            .evaluate(&Self::build_prompt(current, baseline))
            .await
        {
            Ok(reply) => {
                if let Some(assessment) = Self::parse_verdict(&reply, &comparison) {
                    debug!(score = assessment.risk_score, "accepted backend verdict");
                    return assessment;
                }
                warn!("backend verdict was malformed, falling back to rules");
            }
            Err(error) => {
                warn!(%error, "scoring backend unavailable, falling back to rules");
            }
        }
        self.fallback.assess(current, baseline)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::BackendError;
    use crate::engine::baseline::baseline;
    use chrono::{TimeZone, Utc};

    fn reading(heart_rate: i32, blood_pressure: &str, temperature: f64, spo2: f64) -> VitalsReading {
        VitalsReading {
            id: 0,
            patient_id: 1,
            heart_rate,
            blood_pressure: blood_pressure.into(),
            temperature,
            oxygen_saturation: spo2,
            recorded_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    /// Backend stub that replays a scripted reply or error.
    struct Scripted(Result<String, ()>);

    #[async_trait]
    impl ScoringBackend for Scripted {
        async fn evaluate(&self, _prompt: &str) -> Result<String, BackendError> {
            match &self.0 {
                Ok(reply) => Ok(reply.clone()),
                Err(()) => Err(BackendError::Disabled),
            }
        }
    }

    #[test]
    fn normal_vitals_score_low() {
        let assessment = RuleBasedScorer.assess(&reading(72, "118/76", 98.6, 98.0), None);
        assert!(assessment.risk_score.abs() < 1e-9);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.recommendation, RECOMMEND_LOW);
    }

    #[test]
    fn severely_abnormal_vitals_score_exactly_one() {
        // 0.3 (tachycardia) + 0.3 (hypertension) + 0.4 (SpO2 below 90).
        let assessment = RuleBasedScorer.assess(&reading(180, "150/95", 99.0, 89.0), None);
        assert_eq!(assessment.risk_score, 1.0);
        assert_eq!(assessment.risk_level, RiskLevel::High);
    }

    #[test]
    fn accumulation_clamps_at_one() {
        // Every rule fires: 0.3 + 0.3 + 0.2 + 0.4 would be 1.2.
        let assessment = RuleBasedScorer.assess(&reading(30, "60/40", 94.0, 85.0), None);
        assert_eq!(assessment.risk_score, 1.0);
    }

    #[test]
    fn scorer_is_deterministic() {
        let snapshot = reading(110, "145/92", 101.0, 93.0);
        let first = RuleBasedScorer.assess(&snapshot, None);
        let second = RuleBasedScorer.assess(&snapshot, None);
        assert_eq!(first.risk_score, second.risk_score);
        assert_eq!(first.risk_level, second.risk_level);
        assert_eq!(first.recommendation, second.recommendation);
    }

    #[test]
    fn malformed_blood_pressure_defaults_to_normal() {
        assert_eq!(parse_systolic("abc/80"), 120);
        assert_eq!(parse_systolic("garbage"), 120);
        assert_eq!(parse_systolic(""), 120);
        assert_eq!(parse_systolic("150/95"), 150);
        assert_eq!(parse_systolic(" 88 /60"), 88);

        let assessment = RuleBasedScorer.assess(&reading(72, "abc/80", 98.6, 98.0), None);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[test]
    fn baseline_deviation_raises_the_score() {
        let history = vec![
            reading(50, "120/80", 98.6, 98.0),
            reading(50, "120/80", 98.6, 98.0),
            reading(50, "120/80", 98.6, 98.0),
        ];
        let b = baseline(&history);
        // 95 bpm is within absolute thresholds but 45 bpm above this
        // patient's personal average.
        let assessment = RuleBasedScorer.assess(&reading(95, "120/80", 98.6, 98.0), b.as_ref());
        assert!((assessment.risk_score - 0.2).abs() < 1e-9);
        assert!(assessment
            .baseline_analysis
            .as_deref()
            .unwrap()
            .contains("deviates 45 bpm"));
    }

    #[test]
    fn missing_baseline_is_reported_not_an_error() {
        let assessment = RuleBasedScorer.assess(&reading(80, "120/80", 98.6, 98.0), None);
        assert!(assessment
            .baseline_analysis
            .as_deref()
            .unwrap()
            .contains("No historical baseline data"));
    }

    #[tokio::test]
    async fn llm_scorer_accepts_a_fenced_verdict() {
        let scripted = Scripted(Ok(
            "```json\n{\"risk_score\": 0.72, \"risk_level\": \"high\", \
             \"recommendation\": \"Escalate to on-call physician.\", \
             \"baseline_analysis\": \"Trending above personal baseline.\"}\n```"
                .to_string(),
        ));
        let scorer = LlmScorer::new(Arc::new(scripted));
        let assessment = scorer.score(&reading(120, "150/95", 99.5, 93.0), None).await;
        assert!((assessment.risk_score - 0.72).abs() < 1e-9);
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.recommendation, "Escalate to on-call physician.");
    }

    #[tokio::test]
    async fn llm_scorer_falls_back_on_backend_error() {
        let snapshot = reading(120, "150/95", 99.5, 93.0);
        let scorer = LlmScorer::new(Arc::new(Scripted(Err(()))));
        let fallback = RuleBasedScorer.assess(&snapshot, None);
        let assessment = scorer.score(&snapshot, None).await;
        assert_eq!(assessment.risk_score, fallback.risk_score);
        assert_eq!(assessment.risk_level, fallback.risk_level);
    }

    #[tokio::test]
    async fn llm_scorer_falls_back_on_invalid_verdict() {
        let snapshot = reading(120, "150/95", 99.5, 93.0);
        let fallback = RuleBasedScorer.assess(&snapshot, None);

        for bad_reply in [
            "not json at all",
            "{\"risk_score\": \"not a number\", \"risk_level\": \"HIGH\"}",
            "{\"risk_score\": 0.5, \"risk_level\": \"CRITICAL\"}",
        ] {
            let scorer = LlmScorer::new(Arc::new(Scripted(Ok(bad_reply.to_string()))));
            let assessment = scorer.score(&snapshot, None).await;
            assert_eq!(assessment.risk_score, fallback.risk_score, "reply: {bad_reply}");
            assert_eq!(assessment.risk_level, fallback.risk_level);
        }
    }

    #[tokio::test]
    async fn llm_verdict_score_is_clamped() {
        let scripted = Scripted(Ok(
            "{\"risk_score\": 3.5, \"risk_level\": \"HIGH\"}".to_string()
        ));
        let scorer = LlmScorer::new(Arc::new(scripted));
        let assessment = scorer.score(&reading(80, "120/80", 98.6, 98.0), None).await;
        assert_eq!(assessment.risk_score, 1.0);
        // Missing recommendation falls back to the canned text for the level.
        assert_eq!(assessment.recommendation, RECOMMEND_HIGH);
    }
}
