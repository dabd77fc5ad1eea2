//! Running several detection strategies over one image and merging them.
//!
//! Agreement score: `base` is the share of attempted strategies that returned
//! a landmark set. Anchors and outlines only feed the disagreement side. For every landmark reported by two or more landmark sets, the mean
//! pairwise distance is divided by the image diagonal; `5 ×` the mean of those
//! (capped at 1) is the positional disagreement. When an outline was found, the
//! share of combined landmarks falling outside its bounding box (padded by 10%)
//! is averaged in with it. `agreement = base × (1 − disagreement)`, clamped.

use image::DynamicImage;
use rayon::prelude::*;
use tracing::debug;

use super::{Detection, DetectorRegistry};
use crate::models::{DetectorKind, LandmarkName, LandmarkSet, clamp_unit};

const DISAGREEMENT_GAIN: f64 = 5.0;
const OUTLINE_PADDING: f64 = 0.1;

/// One strategy's attempt; `detection` is `None` when it found nothing
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub kind: DetectorKind,
    pub detection: Option<Detection>,
}

impl StrategyResult {
    pub fn found(&self) -> bool {
        self.detection.is_some()
    }

    pub fn landmarks(&self) -> Option<&LandmarkSet> {
        self.detection.as_ref().and_then(Detection::landmarks)
    }
}

/// Run every requested variant the registry holds, in parallel
pub fn run_strategies(registry: &DetectorRegistry, kinds: &[DetectorKind], image: &DynamicImage) -> Vec<StrategyResult> {
    kinds
        .par_iter()
        .filter(|kind| registry.contains(**kind))
        .map(|&kind| StrategyResult {
            kind,
            detection: registry.run(kind, image),
        })
        .collect()
}

/// Pick the primary landmark set, else the broad one, and score agreement.
/// `None` when no strategy produced landmarks.
pub fn combine(results: &[StrategyResult], dims: (u32, u32)) -> Option<(LandmarkSet, f64)> {
    let chosen = [DetectorKind::Primary, DetectorKind::Broad]
        .iter()
        .find_map(|kind| results.iter().find(|r| r.kind == *kind).and_then(StrategyResult::landmarks))
        .or_else(|| results.iter().find_map(StrategyResult::landmarks))?;

    let score = agreement(results, chosen, dims);
    debug!(
        strategy = ?chosen.strategy,
        landmarks = chosen.len(),
        agreement = score,
        "ensemble combined"
    );
    Some((chosen.clone().with_agreement(score), score))
}

pub fn agreement(results: &[StrategyResult], chosen: &LandmarkSet, (width, height): (u32, u32)) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let with_landmarks = results.iter().filter(|r| r.landmarks().is_some()).count();
    let base = with_landmarks as f64 / results.len() as f64;

    let mut terms = Vec::with_capacity(2);
    if let Some(positional) = positional_disagreement(results, (width, height)) {
        terms.push(positional);
    }
    if let Some(outside) = outside_outline(results, chosen) {
        terms.push(outside);
    }
    let disagreement = if terms.is_empty() {
        0.0
    } else {
        terms.iter().sum::<f64>() / terms.len() as f64
    };

    clamp_unit(base * (1.0 - disagreement))
}

fn positional_disagreement(results: &[StrategyResult], (width, height): (u32, u32)) -> Option<f64> {
    let sets: Vec<&LandmarkSet> = results.iter().filter_map(StrategyResult::landmarks).collect();
    if sets.len() < 2 {
        return None;
    }
    let diagonal = ((width as f64).powi(2) + (height as f64).powi(2)).sqrt().max(1.0);

    let mut per_landmark = Vec::new();
    for name in LandmarkName::ALL {
        let points: Vec<_> = sets.iter().filter_map(|s| s.get(name)).collect();
        if points.len() < 2 {
            continue;
        }
        let mut total = 0.0;
        let mut pairs = 0usize;
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                total += a.distance_to(b);
                pairs += 1;
            }
        }
        per_landmark.push(total / pairs as f64 / diagonal);
    }
    if per_landmark.is_empty() {
        return None;
    }
    let mean = per_landmark.iter().sum::<f64>() / per_landmark.len() as f64;
    Some((DISAGREEMENT_GAIN * mean).min(1.0))
}

fn outside_outline(results: &[StrategyResult], chosen: &LandmarkSet) -> Option<f64> {
    let silhouette = results
        .iter()
        .find_map(|r| r.detection.as_ref().and_then(Detection::silhouette))?;
    if chosen.is_empty() {
        return None;
    }
    let outside = chosen
        .iter()
        .filter(|l| !silhouette.bbox.contains_padded(l.x, l.y, OUTLINE_PADDING))
        .count();
    Some(outside as f64 / chosen.len() as f64)
}
