//! Bootstrap estimate of how sensitive each measurement is to landmark jitter.
//!
//! Every trial perturbs all landmark coordinates with independent Gaussian noise
//! and recomputes the full catalog. Trials are independent and seeded from the
//! trial index, so the rayon fan-out gives the same answer on any thread count.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::measurement::{self, MeasurementMap};
use crate::models::LandmarkSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub samples: usize,
    /// Approximates expected detector jitter
    pub noise_stddev_px: f64,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            samples: 50,
            noise_stddev_px: 2.0,
            seed: 42,
        }
    }
}

impl BootstrapConfig {
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_noise(mut self, noise_stddev_px: f64) -> Self {
        self.noise_stddev_px = noise_stddev_px;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Spread {
    pub mean: f64,
    pub stddev: f64,
}

/// Per-measurement spread; `None` when the measurement was null in every trial
pub type SpreadMap = BTreeMap<&'static str, Option<Spread>>;

pub fn bootstrap(landmarks: &LandmarkSet, scale_factor: f64, config: &BootstrapConfig) -> SpreadMap {
    let noise = if config.noise_stddev_px > 0.0 {
        Normal::new(0.0, config.noise_stddev_px).ok()
    } else {
        None
    };

    let trials: Vec<MeasurementMap> = (0..config.samples)
        .into_par_iter()
        .map(|trial| {
            let perturbed = match &noise {
                Some(normal) => {
                    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(trial as u64));
                    landmarks.remapped(|l| {
                        (l.x + normal.sample(&mut rng), l.y + normal.sample(&mut rng))
                    })
                }
                None => landmarks.clone(),
            };
            measurement::compute(&perturbed, scale_factor)
        })
        .collect();

    measurement::catalog()
        .iter()
        .map(|spec| {
            let values: Vec<f64> = trials.iter().filter_map(|t| t.get(spec.name).copied().flatten()).collect();
            (spec.name, spread(&values))
        })
        .collect()
}

fn spread(values: &[f64]) -> Option<Spread> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    // identical samples must report exactly zero, not rounding residue
    let stddev = if hi == lo {
        0.0
    } else {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
    };
    Some(Spread { mean, stddev })
}
