//! Composite confidence score.

use crate::models::clamp_unit;

pub const DETECTION_WEIGHT: f64 = 0.30;
pub const COMPLETENESS_WEIGHT: f64 = 0.25;
pub const QUALITY_WEIGHT: f64 = 0.20;
pub const CONSISTENCY_WEIGHT: f64 = 0.15;
pub const AGREEMENT_WEIGHT: f64 = 0.10;

/// Signals combined into the outcome confidence, each expected in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfidenceInputs {
    pub detection: f64,
    pub completeness: f64,
    pub quality: f64,
    pub consistency: f64,
    pub agreement: f64,
}

impl ConfidenceInputs {
    /// Weighted sum clamped to [0, 1]; out-of-range inputs are clamped first
    pub fn score(&self) -> f64 {
        clamp_unit(
            DETECTION_WEIGHT * clamp_unit(self.detection)
                + COMPLETENESS_WEIGHT * clamp_unit(self.completeness)
                + QUALITY_WEIGHT * clamp_unit(self.quality)
                + CONSISTENCY_WEIGHT * clamp_unit(self.consistency)
                + AGREEMENT_WEIGHT * clamp_unit(self.agreement),
        )
    }
}

/// Share of the measurement catalog that produced a value
pub fn landmark_completeness(successful: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_unit(successful as f64 / total as f64)
}

/// `max(0, 1 − 0.2 × warnings)`
pub fn anatomical_consistency(warning_count: usize) -> f64 {
    (1.0 - 0.2 * warning_count as f64).max(0.0)
}
