use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{LandmarkName, LandmarkSet, Warning};

/// Landmark pair assumed to span a known fraction of the reference length.
///
/// The default (shoulder pair spanning 20% of the reference) is an unvalidated
/// approximation; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationAnchor {
    pub first: LandmarkName,
    pub second: LandmarkName,
    pub fraction: f64,
}

impl Default for CalibrationAnchor {
    fn default() -> Self {
        Self {
            first: LandmarkName::LeftShoulder,
            second: LandmarkName::RightShoulder,
            fraction: 0.2,
        }
    }
}

/// Result of scale calibration
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Physical units per pixel, always > 0
    pub scale_factor: f64,
    pub calibrated: bool,
    pub anchor_distance_px: Option<f64>,
    pub warning: Option<Warning>,
}

impl Calibration {
    fn uncalibrated(anchor_distance_px: Option<f64>, reason: String) -> Self {
        Self {
            scale_factor: 1.0,
            calibrated: false,
            anchor_distance_px,
            warning: Some(Warning::Calibration(reason)),
        }
    }
}

/// Convert pixel distances to physical units using an optional reference length.
///
/// `reference_length` must already be validated as positive and finite.
pub fn calibrate(
    landmarks: &LandmarkSet,
    reference_length: Option<f64>,
    anchor: &CalibrationAnchor,
) -> Calibration {
    let Some(reference) = reference_length else {
        debug!("no reference length, values stay pixel-equivalent");
        return Calibration::uncalibrated(
            None,
            "no reference length supplied; measurements are pixel-equivalent, not physical units"
                .to_string(),
        );
    };

    let (Some(a), Some(b)) = (landmarks.get(anchor.first), landmarks.get(anchor.second)) else {
        debug!(first = %anchor.first, second = %anchor.second, "calibration anchor missing");
        return Calibration::uncalibrated(
            None,
            format!(
                "calibration anchor ({}, {}) not detected; measurements are pixel-equivalent",
                anchor.first, anchor.second
            ),
        );
    };

    let distance = a.distance_to(b);
    if !(distance > 0.0 && distance.is_finite()) {
        debug!(distance, "degenerate calibration anchor");
        return Calibration::uncalibrated(
            Some(distance),
            format!(
                "calibration anchor ({}, {}) has zero length; measurements are pixel-equivalent",
                anchor.first, anchor.second
            ),
        );
    }

    let scale_factor = reference * anchor.fraction / distance;
    if !(scale_factor.is_finite() && scale_factor > 0.0) {
        debug!(reference, distance, scale_factor, "scale factor out of range");
        return Calibration::uncalibrated(
            Some(distance),
            format!("scale factor {scale_factor} is not usable; measurements are pixel-equivalent"),
        );
    }
    debug!(reference, distance, scale_factor, "scale calibrated");
    Calibration {
        scale_factor,
        calibrated: true,
        anchor_distance_px: Some(distance),
        warning: None,
    }
}
