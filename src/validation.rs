//! Advisory anatomical plausibility checks. Nothing here fails an outcome; every
//! finding becomes a [`Warning::Validation`].

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::confidence::anatomical_consistency;
use crate::error::{MorphoError, MorphoResult};
use crate::measurement;
use crate::models::Warning;

/// Present measurement values by name
pub type MeasurementValues = BTreeMap<String, f64>;

/// Bounds on `numerator / denominator`
#[derive(Debug, Clone, Copy)]
pub struct RatioRule {
    pub numerator: &'static str,
    pub denominator: &'static str,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

pub const RATIO_RULES: [RatioRule; 3] = [
    RatioRule {
        numerator: "body_length",
        denominator: "wither_height",
        min: Some(0.8),
        max: Some(2.0),
    },
    RatioRule {
        numerator: "hip_width",
        denominator: "chest_width",
        min: None,
        max: Some(1.5),
    },
    RatioRule {
        numerator: "rump_height",
        denominator: "wither_height",
        min: Some(0.8),
        max: Some(1.25),
    },
];

impl RatioRule {
    /// Warning text when the ratio is out of bounds, `None` when it holds or
    /// cannot be evaluated
    pub fn check(&self, values: &MeasurementValues) -> Option<String> {
        let num = *values.get(self.numerator)?;
        let den = *values.get(self.denominator)?;
        if den <= 0.0 {
            return None;
        }
        let ratio = num / den;
        let low = self.min.is_some_and(|min| ratio < min);
        let high = self.max.is_some_and(|max| ratio > max);
        if !(low || high) {
            return None;
        }
        let bounds = match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{min:.2}-{max:.2}"),
            (Some(min), None) => format!(">= {min:.2}"),
            (None, Some(max)) => format!("<= {max:.2}"),
            (None, None) => String::new(),
        };
        Some(format!(
            "{}/{} ratio {ratio:.2} outside expected range {bounds}",
            self.numerator, self.denominator
        ))
    }
}

/// Typical wither-height limits per breed category, in centimetres
#[derive(Debug, Clone, Copy)]
pub struct CategoryRange {
    pub category: &'static str,
    pub measurement: &'static str,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

pub const CATEGORY_RANGES: [CategoryRange; 3] = [
    CategoryRange {
        category: "boer",
        measurement: "wither_height",
        min: None,
        max: Some(80.0),
    },
    CategoryRange {
        category: "nubian",
        measurement: "wither_height",
        min: Some(60.0),
        max: None,
    },
    CategoryRange {
        category: "alpine",
        measurement: "wither_height",
        min: Some(65.0),
        max: Some(100.0),
    },
];

/// Reference sample set for the outlier check, loaded from JSON:
/// `{"samples": [{"wither_height": 70.2, ...}, ...]}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReferencePopulation {
    pub samples: Vec<MeasurementValues>,
}

impl ReferencePopulation {
    pub fn new(samples: Vec<MeasurementValues>) -> Self {
        Self { samples }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> MorphoResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MorphoError::config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| MorphoError::config(format!("cannot parse {}: {e}", path.display())))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean and population stddev of one measurement, when enough samples carry it
    fn stats(&self, name: &str) -> Option<(f64, f64)> {
        let values: Vec<f64> = self.samples.iter().filter_map(|s| s.get(name).copied()).collect();
        if values.len() < MIN_POPULATION_SAMPLES {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        (std > 0.0).then_some((mean, std))
    }

    /// Root-mean-square z-score of `values` over the measurements both sides share
    pub fn rms_z(&self, values: &MeasurementValues) -> Option<f64> {
        let z: Vec<f64> = values
            .iter()
            .filter_map(|(name, value)| {
                let (mean, std) = self.stats(name)?;
                Some((value - mean) / std)
            })
            .collect();
        if z.is_empty() {
            return None;
        }
        Some((z.iter().map(|z| z * z).sum::<f64>() / z.len() as f64).sqrt())
    }
}

const MIN_POPULATION_SAMPLES: usize = 3;
const OUTLIER_Z: f64 = 3.0;

/// Collected findings plus the derived consistency score
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<Warning>,
    pub consistency: f64,
}

/// Run every applicable check. Range and category checks compare against
/// centimetre limits, so they are skipped for uncalibrated values.
pub fn validate(
    values: &MeasurementValues,
    calibrated: bool,
    category: Option<&str>,
    population: Option<&ReferencePopulation>,
) -> ValidationReport {
    let mut messages: Vec<String> = RATIO_RULES.iter().filter_map(|rule| rule.check(values)).collect();

    if calibrated {
        for (name, value) in values {
            let Some(range) = measurement::spec(name).and_then(|s| s.plausible) else {
                continue;
            };
            if !range.contains(*value) {
                messages.push(format!(
                    "{name} {value:.1} outside plausible range {:.0}-{:.0}",
                    range.min, range.max
                ));
            }
        }
        if let Some(category) = category {
            messages.extend(check_category(values, category));
        }
    } else if category.is_some() {
        debug!("category ranges skipped for uncalibrated values");
    }

    if let Some(population) = population {
        match population.rms_z(values) {
            Some(rms) if rms > OUTLIER_Z => messages.push(format!(
                "measurements are a statistical outlier against the reference population (RMS z-score {rms:.2})"
            )),
            Some(_) => {}
            None => debug!(samples = population.len(), "reference population too small to compare"),
        }
    }

    let warnings: Vec<Warning> = messages.into_iter().map(Warning::Validation).collect();
    for warning in &warnings {
        debug!(%warning, "validation warning");
    }
    ValidationReport {
        consistency: anatomical_consistency(warnings.len()),
        warnings,
    }
}

fn check_category(values: &MeasurementValues, category: &str) -> Vec<String> {
    let key = category.trim().to_lowercase();
    let ranges: Vec<&CategoryRange> = CATEGORY_RANGES.iter().filter(|r| r.category == key).collect();
    if ranges.is_empty() {
        debug!(category = %category, "no ranges for category");
    }
    ranges
        .into_iter()
        .filter_map(|range| {
            let value = *values.get(range.measurement)?;
            if range.min.is_some_and(|min| value < min) {
                Some(format!(
                    "{} {value:.1} unusually low for {key}",
                    range.measurement
                ))
            } else if range.max.is_some_and(|max| value > max) {
                Some(format!(
                    "{} {value:.1} unusually high for {key}",
                    range.measurement
                ))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> MeasurementValues {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn typical() -> MeasurementValues {
        values(&[
            ("wither_height", 70.0),
            ("rump_height", 72.0),
            ("body_length", 75.0),
            ("chest_width", 20.0),
            ("hip_width", 18.0),
        ])
    }

    #[test]
    fn test_typical_goat_passes() {
        let report = validate(&typical(), true, Some("boer"), None);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.consistency, 1.0);
    }

    #[test]
    fn test_ratio_rules() {
        let mut v = typical();
        v.insert("body_length".into(), 200.0);
        v.insert("hip_width".into(), 40.0);
        let report = validate(&v, false, None, None);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().all(Warning::is_validation));
        assert!((report.consistency - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_missing_measurements_skip_rules() {
        let report = validate(&values(&[("body_length", 500.0)]), false, None, None);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_category_and_range_checks_need_calibration() {
        let v = values(&[("wither_height", 300.0), ("rump_height", 300.0)]);
        assert!(validate(&v, false, Some("boer"), None).warnings.is_empty());

        let report = validate(&v, true, Some("Boer"), None);
        let text: Vec<&str> = report.warnings.iter().map(Warning::message).collect();
        assert!(text.iter().any(|w| w.contains("plausible range")));
        assert!(text.iter().any(|w| w.contains("unusually high for boer")));
    }

    #[test]
    fn test_unknown_category_is_ignored() {
        assert!(validate(&typical(), true, Some("saanen"), None).warnings.is_empty());
    }

    #[test]
    fn test_population_outlier() {
        let population = ReferencePopulation::new(vec![
            values(&[("wither_height", 68.0), ("body_length", 74.0)]),
            values(&[("wither_height", 70.0), ("body_length", 75.0)]),
            values(&[("wither_height", 72.0), ("body_length", 76.0)]),
        ]);
        assert!(validate(&typical(), true, None, Some(&population)).warnings.is_empty());

        let far = values(&[("wither_height", 95.0), ("body_length", 99.0)]);
        let report = validate(&far, true, None, Some(&population));
        assert!(report.warnings.iter().any(|w| w.message().contains("outlier")));
    }

    #[test]
    fn test_small_population_is_skipped() {
        let population = ReferencePopulation::new(vec![values(&[("wither_height", 68.0)])]);
        assert_eq!(population.rms_z(&typical()), None);
    }
}
