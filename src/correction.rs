//! Optional breed-specific correction capability.
//!
//! Trained regressors live outside this crate; the engine only calls whatever
//! implementation the caller attaches, and never fails because of it.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{MeasurementResult, Warning, clamp_unit};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrectionError {
    #[error("no correction model for category '{0}'")]
    UnknownCategory(String),
    #[error("correction model failed: {0}")]
    Failed(String),
}

pub trait CorrectionModel: Send + Sync {
    /// Corrected values for (a subset of) `measurements` plus a confidence in [0, 1]
    fn predict(
        &self,
        measurements: &BTreeMap<String, f64>,
        category: &str,
    ) -> Result<(BTreeMap<String, f64>, f64), CorrectionError>;
}

/// Outcome of invoking a correction model over a result list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Applied {
    pub confidence: Option<f64>,
    pub warning: Option<Warning>,
}

/// Replace values in `results` with the model's predictions. Unknown names and
/// non-finite predictions are ignored; corrected values are floored at 0.
pub fn apply(model: &dyn CorrectionModel, results: &mut [MeasurementResult], category: &str) -> Applied {
    let present: BTreeMap<String, f64> = results
        .iter()
        .filter_map(|r| r.value.map(|v| (r.name.clone(), v)))
        .collect();

    match model.predict(&present, category) {
        Ok((corrected, confidence)) => {
            let mut replaced = 0usize;
            for result in results.iter_mut() {
                let Some(value) = corrected.get(&result.name).copied().filter(|v| v.is_finite()) else {
                    continue;
                };
                result.value = Some(value.max(0.0));
                result.provenance.corrected = true;
                replaced += 1;
            }
            debug!(category, replaced, confidence, "correction applied");
            Applied {
                confidence: Some(clamp_unit(confidence)),
                warning: None,
            }
        }
        Err(err) => {
            warn!(category, error = %err, "correction model failed, keeping raw values");
            Applied {
                confidence: None,
                warning: Some(Warning::Correction(format!("{err}; raw measurements kept"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    struct Scale(f64);

    impl CorrectionModel for Scale {
        fn predict(
            &self,
            measurements: &BTreeMap<String, f64>,
            category: &str,
        ) -> Result<(BTreeMap<String, f64>, f64), CorrectionError> {
            if category != "boer" {
                return Err(CorrectionError::UnknownCategory(category.to_string()));
            }
            let out = measurements.iter().map(|(k, v)| (k.clone(), v * self.0)).collect();
            Ok((out, 0.8))
        }
    }

    fn result(name: &str, value: Option<f64>) -> MeasurementResult {
        MeasurementResult {
            name: name.to_string(),
            value,
            uncertainty: None,
            provenance: Provenance {
                landmarks: Vec::new(),
                origin: None,
                strategy: None,
                calibrated: true,
                corrected: false,
                bootstrap_mean: None,
            },
        }
    }

    #[test]
    fn test_corrections_replace_present_values() {
        let mut results = vec![result("wither_height", Some(70.0)), result("head_width", None)];
        let applied = apply(&Scale(1.1), &mut results, "boer");
        assert_eq!(applied.confidence, Some(0.8));
        assert!((results[0].value.unwrap() - 77.0).abs() < 1e-9);
        assert!(results[0].provenance.corrected);
        assert_eq!(results[1].value, None);
        assert!(!results[1].provenance.corrected);
    }

    #[test]
    fn test_negative_predictions_floor_at_zero() {
        let mut results = vec![result("wither_height", Some(70.0))];
        apply(&Scale(-1.0), &mut results, "boer");
        assert_eq!(results[0].value, Some(0.0));
    }

    #[test]
    fn test_failure_becomes_warning() {
        let mut results = vec![result("wither_height", Some(70.0))];
        let applied = apply(&Scale(2.0), &mut results, "alpine");
        assert_eq!(applied.confidence, None);
        assert!(matches!(applied.warning, Some(Warning::Correction(_))));
        assert_eq!(results[0].value, Some(70.0));
    }
}
