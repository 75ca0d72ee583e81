//! Personalized historical baseline.
//!
//! A patient's baseline is the arithmetic mean of every past reading, not a
//! recent window. It exists to catch deviations that are significant for the
//! individual even when the absolute values look unremarkable, the classic
//! case being an athlete whose resting heart rate of 50 makes 95 bpm a real
//! change while still being "normal" on paper.

use crate::models::{HistoricalBaseline, VitalsReading};

/// Heart-rate deviation from baseline that is considered clinically notable.
pub const DEVIATION_THRESHOLD_BPM: f64 = 30.0;

/// Risk added when the current heart rate deviates past the threshold.
pub const DEVIATION_RISK: f64 = 0.2;

/// Compute the baseline over a patient's past readings.
///
/// Returns `None` when no history exists, which callers must treat as "no
/// baseline available" rather than a baseline of zero.
pub fn baseline(past_readings: &[VitalsReading]) -> Option<HistoricalBaseline> {
    if past_readings.is_empty() {
        return None;
    }
    let n = past_readings.len() as f64;
    Some(HistoricalBaseline {
        avg_heart_rate: Some(past_readings.iter().map(|r| r.heart_rate as f64).sum::<f64>() / n),
        avg_temperature: Some(past_readings.iter().map(|r| r.temperature).sum::<f64>() / n),
        avg_oxygen_saturation: Some(
            past_readings.iter().map(|r| r.oxygen_saturation).sum::<f64>() / n,
        ),
    })
}

/// How the current heart rate relates to the patient's baseline.
#[derive(Debug, Clone, Copy)]
pub enum BaselineComparison {
    /// No past readings, or the baseline carries no heart-rate average.
    NoHistory,
    /// Within the notable-deviation threshold.
    Within { deviation: f64, average: f64 },
    /// Past the notable-deviation threshold.
    Exceeds { deviation: f64, average: f64 },
}

impl BaselineComparison {
    pub fn compare(current_heart_rate: i32, baseline: Option<&HistoricalBaseline>) -> Self {
        let Some(average) = baseline.and_then(|b| b.avg_heart_rate) else {
            return BaselineComparison::NoHistory;
        };
        let deviation = (current_heart_rate as f64 - average).abs();
        if deviation > DEVIATION_THRESHOLD_BPM {
            BaselineComparison::Exceeds { deviation, average }
        } else {
            BaselineComparison::Within { deviation, average }
        }
    }

    /// Risk contribution folded into the rule-based score.
    pub fn risk_contribution(&self) -> f64 {
        match self {
            BaselineComparison::Exceeds { .. } => DEVIATION_RISK,
            _ => 0.0,
        }
    }

    /// Human-readable analysis. Always present in the assessment, including
    /// the explicit no-history case, and always cites the numbers when a
    /// baseline exists.
    pub fn analysis_text(&self) -> String {
        match self {
            BaselineComparison::NoHistory => {
                "No historical baseline data available for this patient.".to_string()
            }
            BaselineComparison::Within { deviation, average } => format!(
                "Current vitals are within the patient's baseline range \
                 (heart rate {deviation:.0} bpm from personal average of {average:.0} bpm)."
            ),
            BaselineComparison::Exceeds { deviation, average } => format!(
                "Heart rate deviates {deviation:.0} bpm from the patient's \
                 personal baseline of {average:.0} bpm."
            ),
        }
    }
}
