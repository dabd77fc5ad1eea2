use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::calibration::CalibrationAnchor;
use crate::error::{MorphoError, MorphoResult};
use crate::models::DetectorKind;
use crate::uncertainty::BootstrapConfig;

/// Engine-wide tunables, fixed for the lifetime of an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Images larger than this on either side are downscaled
    pub max_dimension: u32,
    /// Encoded inputs above this size are rejected
    pub max_input_bytes: usize,
    /// Apply adaptive contrast/sharpening before the first detection pass
    pub enhance_input: bool,
    /// Intensity stddev below which contrast is boosted
    pub low_contrast_threshold: f64,
    /// Laplacian variance below which the image is sharpened
    pub blur_threshold: f64,
    pub anchor: CalibrationAnchor,
    pub bootstrap: BootstrapConfig,
    /// Fixed landmark confidence and confidence cap for template-estimated outcomes
    pub estimated_confidence: f64,
    /// Detector variants run by default
    pub detectors: Vec<DetectorKind>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1920,
            max_input_bytes: 10 * 1024 * 1024,
            enhance_input: true,
            low_contrast_threshold: 30.0,
            blur_threshold: 100.0,
            anchor: CalibrationAnchor::default(),
            bootstrap: BootstrapConfig::default(),
            estimated_confidence: 0.5,
            detectors: DetectorKind::ALL.to_vec(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> MorphoResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MorphoError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            MorphoError::config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn with_enhance_input(mut self, enhance: bool) -> Self {
        self.enhance_input = enhance;
        self
    }

    pub fn with_anchor(mut self, anchor: CalibrationAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: BootstrapConfig) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_detectors(mut self, detectors: Vec<DetectorKind>) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn validate(&self) -> MorphoResult<()> {
        if self.max_dimension == 0 {
            return Err(MorphoError::config("max_dimension must be positive"));
        }
        if self.max_input_bytes == 0 {
            return Err(MorphoError::config("max_input_bytes must be positive"));
        }
        if !(self.anchor.fraction.is_finite() && self.anchor.fraction > 0.0) {
            return Err(MorphoError::config("anchor fraction must be a positive number"));
        }
        if self.anchor.first == self.anchor.second {
            return Err(MorphoError::config("calibration anchor needs two distinct landmarks"));
        }
        if !(self.bootstrap.noise_stddev_px.is_finite() && self.bootstrap.noise_stddev_px >= 0.0) {
            return Err(MorphoError::config("bootstrap noise stddev must be finite and >= 0"));
        }
        if self.detectors.is_empty() {
            return Err(MorphoError::config("at least one detector variant must be enabled"));
        }
        if !(0.0..=1.0).contains(&self.estimated_confidence) {
            return Err(MorphoError::config("estimated_confidence must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_dimension, 1920);
        assert_eq!(config.bootstrap.samples, 50);
        assert_eq!(config.anchor.fraction, 0.2);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_dimension": 800, "bootstrap": {"samples": 10}}"#)
                .unwrap();
        assert_eq!(config.max_dimension, 800);
        assert_eq!(config.bootstrap.samples, 10);
        assert_eq!(config.bootstrap.noise_stddev_px, 2.0);
        assert!(config.enhance_input);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::new().with_max_dimension(0).validate().is_err());

        let mut config = EngineConfig::new();
        config.bootstrap.noise_stddev_px = -1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::new();
        config.anchor.second = config.anchor.first;
        assert!(config.validate().is_err());

        let config: EngineConfig = serde_json::from_str(r#"{"detectors": []}"#).unwrap();
        assert!(matches!(config.validate(), Err(MorphoError::Config { .. })));
    }
}
