//! Cross-patient triage ranking.
//!
//! Urgency combines how sick a patient is right now with how fast they are
//! getting worse. The trend model is the rate-based formula: hourly
//! heart-rate change between the last two readings, normalized against
//! 20 bpm/hour and weighted asymmetrically so that a worsening patient
//! outranks an improving one at the same absolute rate. Urgency is
//! `current_risk * 0.5 + min(trend_velocity, 0.5)`, clamped to [0, 1].

use std::cmp::Ordering;

use crate::engine::scoring::RuleBasedScorer;
use crate::models::{Patient, Prediction, TriageEntry, Trend, VitalsReading};

/// Everything the ranker needs for one patient: the last one or two readings
/// (newest first) and the latest stored prediction, if any.
pub struct TriageInput {
    pub patient: Patient,
    pub recent_readings: Vec<VitalsReading>,
    pub latest_prediction: Option<Prediction>,
}

/// Heart-rate change rate treated as maximally concerning, in bpm per hour.
pub const MAX_CONCERNING_RATE: f64 = 20.0;

/// Rate beyond which the trend stops being classified as stable.
pub const TREND_RATE_THRESHOLD: f64 = 5.0;

const WORSENING_MULTIPLIER: f64 = 1.5;
const IMPROVING_MULTIPLIER: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct TrendAssessment {
    pub trend: Trend,
    pub velocity: f64,
}

impl TrendAssessment {
    fn stable() -> Self {
        Self {
            trend: Trend::Stable,
            velocity: 0.0,
        }
    }
}

/// Rate-based trend detection over the two most recent readings.
pub struct TrendModel;

impl TrendModel {
    /// Readings must be ordered newest first. Fewer than two readings, or a
    /// non-positive elapsed time between them, yields a stable trend with
    /// zero contribution.
    pub fn assess(&self, readings: &[VitalsReading]) -> TrendAssessment {
        let (newest, older) = match readings {
            [newest, older, ..] => (newest, older),
            _ => return TrendAssessment::stable(),
        };

        let elapsed_hours =
            (newest.recorded_at - older.recorded_at).num_milliseconds() as f64 / 3_600_000.0;
        if elapsed_hours <= 0.0 {
            return TrendAssessment::stable();
        }

        let rate = (newest.heart_rate - older.heart_rate) as f64 / elapsed_hours;
        let velocity = (rate.abs() / MAX_CONCERNING_RATE).min(1.0);

        if rate > TREND_RATE_THRESHOLD {
            TrendAssessment {
                trend: Trend::Deteriorating,
                velocity: velocity * WORSENING_MULTIPLIER,
            }
        } else if rate < -TREND_RATE_THRESHOLD {
            TrendAssessment {
                trend: Trend::Improving,
                velocity: velocity * IMPROVING_MULTIPLIER,
            }
        } else {
            TrendAssessment::stable()
        }
    }
}

pub struct TriageRanker {
    trend: TrendModel,
    scorer: RuleBasedScorer,
}

impl Default for TriageRanker {
    fn default() -> Self {
        Self::new()
    }
}

impl TriageRanker {
    pub fn new() -> Self {
        Self {
            trend: TrendModel,
            scorer: RuleBasedScorer,
        }
    }

    /// Rank all patients by descending urgency. Patients with zero readings
    /// are excluded. The sort is stable, so equal scores keep the input
    /// order, which callers provide in ascending patient id.
    pub fn rank(&self, inputs: &[TriageInput]) -> Vec<TriageEntry> {
        let mut entries: Vec<TriageEntry> =
            inputs.iter().filter_map(|input| self.evaluate(input)).collect();
        entries.sort_by(|a, b| {
            b.urgency_score
                .partial_cmp(&a.urgency_score)
                .unwrap_or(Ordering::Equal)
        });
        entries
    }

    fn evaluate(&self, input: &TriageInput) -> Option<TriageEntry> {
        let latest = input.recent_readings.first()?;

        // Prefer the stored prediction; recompute from raw vitals only when
        // no prediction has ever been made for this patient.
        let current_risk = match &input.latest_prediction {
            Some(prediction) => prediction.risk_score,
            None => self.scorer.quick_score(latest),
        };

        let trend = self.trend.assess(&input.recent_readings);
        let urgency = (current_risk * 0.5 + trend.velocity.min(0.5)).clamp(0.0, 1.0);

        let mut reasons: Vec<&str> = Vec::new();
        if current_risk > 0.6 {
            reasons.push("High current risk");
        }
        match trend.trend {
            Trend::Deteriorating => reasons.push("Vitals deteriorating"),
            Trend::Improving => reasons.push("Vitals improving"),
            Trend::Stable => {}
        }
        let reason = if reasons.is_empty() {
            "Stable condition".to_string()
        } else {
            reasons.join("; ")
        };

        Some(TriageEntry {
            patient_id: input.patient.id,
            name: input.patient.name.clone(),
            urgency_score: urgency,
            reason,
            current_risk: crate::models::RiskLevel::from_score(current_risk),
            trend: trend.trend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn reading(patient_id: i64, heart_rate: i32, recorded_at: DateTime<Utc>) -> VitalsReading {
        VitalsReading {
            id: 0,
            patient_id,
            heart_rate,
            blood_pressure: "120/80".into(),
            temperature: 98.6,
            oxygen_saturation: 98.0,
            recorded_at,
        }
    }

    fn patient(id: i64, name: &str) -> Patient {
        Patient {
            id,
            name: name.into(),
            age: 50,
            medical_record_number: format!("MRN-{id:04}"),
            created_at: at(0),
        }
    }

    fn input(id: i64, name: &str, heart_rates: &[i32]) -> TriageInput {
        // Readings spaced an hour apart, newest first.
        let recent_readings = heart_rates
            .iter()
            .enumerate()
            .map(|(i, &hr)| reading(id, hr, at(-(i as i64) * 60)))
            .collect();
        TriageInput {
            patient: patient(id, name),
            recent_readings,
            latest_prediction: None,
        }
    }

    #[test]
    fn deteriorating_patient_outranks_stable_patient() {
        let stable = input(1, "Stable A", &[70, 70]);
        let worsening = input(2, "Worsening B", &[110, 70]);
        let ranked = TriageRanker::new().rank(&[stable, worsening]);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].patient_id, 2);
        assert!(ranked[0].urgency_score > ranked[1].urgency_score);
        assert_eq!(ranked[0].trend, Trend::Deteriorating);
        assert_eq!(ranked[1].trend, Trend::Stable);
        assert_eq!(ranked[1].reason, "Stable condition");
    }

    #[test]
    fn patients_without_readings_are_excluded() {
        let empty = TriageInput {
            patient: patient(1, "No Data"),
            recent_readings: vec![],
            latest_prediction: None,
        };
        let with_data = input(2, "Has Data", &[70]);
        let ranked = TriageRanker::new().rank(&[empty, with_data]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].patient_id, 2);
    }

    #[test]
    fn single_reading_means_stable_trend() {
        let ranked = TriageRanker::new().rank(&[input(1, "One Reading", &[130])]);
        assert_eq!(ranked[0].trend, Trend::Stable);
        // Quick score only: 0.3 for tachycardia, halved by the risk weight.
        assert!((ranked[0].urgency_score - 0.15).abs() < 1e-9);
    }

    #[test]
    fn equal_scores_preserve_input_order() {
        let ranked = TriageRanker::new().rank(&[
            input(1, "First", &[70, 70]),
            input(2, "Second", &[70, 70]),
            input(3, "Third", &[70, 70]),
        ]);
        let ids: Vec<i64> = ranked.iter().map(|e| e.patient_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn stored_prediction_is_preferred_over_recomputing() {
        let mut with_prediction = input(1, "Predicted", &[70]);
        with_prediction.latest_prediction = Some(Prediction {
            id: 1,
            patient_id: 1,
            risk_score: 0.9,
            risk_level: RiskLevel::High,
            recommendation: "Escalate.".into(),
            created_at: at(0),
        });
        let ranked = TriageRanker::new().rank(&[with_prediction]);
        // 0.9 * 0.5 rather than the quick score of 0.0 for a normal HR.
        assert!((ranked[0].urgency_score - 0.45).abs() < 1e-9);
        assert_eq!(ranked[0].current_risk, RiskLevel::High);
        assert_eq!(ranked[0].reason, "High current risk");
    }

    #[test]
    fn improving_trend_is_discounted() {
        let model = TrendModel;
        let worsening = model.assess(&[reading(1, 90, at(60)), reading(1, 70, at(0))]);
        let improving = model.assess(&[reading(1, 70, at(60)), reading(1, 90, at(0))]);

        assert_eq!(worsening.trend, Trend::Deteriorating);
        assert_eq!(improving.trend, Trend::Improving);
        // Same 20 bpm/hr rate, asymmetric weights: 1.0 * 1.5 vs 1.0 * 0.5.
        assert!((worsening.velocity - 1.5).abs() < 1e-9);
        assert!((improving.velocity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn velocity_is_normalized_and_capped() {
        let model = TrendModel;
        // 10 bpm over one hour: |10| / 20 = 0.5, then the worsening weight.
        let gentle = model.assess(&[reading(1, 80, at(60)), reading(1, 70, at(0))]);
        assert!((gentle.velocity - 0.75).abs() < 1e-9);

        // 400 bpm/hr rate normalizes to the 1.0 cap before weighting.
        let extreme = model.assess(&[reading(1, 170, at(15)), reading(1, 70, at(0))]);
        assert!((extreme.velocity - 1.5).abs() < 1e-9);
    }

    #[test]
    fn identical_timestamps_yield_stable_trend() {
        let model = TrendModel;
        let assessment = model.assess(&[reading(1, 110, at(0)), reading(1, 70, at(0))]);
        assert_eq!(assessment.trend, Trend::Stable);
        assert!(assessment.velocity.abs() < 1e-9);
    }

    #[test]
    fn urgency_is_clamped_to_unit_interval() {
        // Maximal risk and maximal worsening velocity: 1.0 * 0.5 + 0.5 = 1.0.
        let mut worst = input(1, "Worst", &[]);
        worst.recent_readings = vec![reading(1, 220, at(60)), reading(1, 60, at(0))];
        worst.latest_prediction = Some(Prediction {
            id: 1,
            patient_id: 1,
            risk_score: 1.0,
            risk_level: RiskLevel::High,
            recommendation: "Escalate.".into(),
            created_at: at(0),
        });
        let ranked = TriageRanker::new().rank(&[worst]);
        assert_eq!(ranked[0].urgency_score, 1.0);
        assert_eq!(ranked[0].reason, "High current risk; Vitals deteriorating");
    }
}
