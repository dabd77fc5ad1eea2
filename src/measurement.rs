use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{LandmarkName, LandmarkSet};

/// Geometric function applied to a landmark pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    /// Straight-line distance
    Euclidean,
    /// Absolute vertical pixel delta, for height-style measurements
    Vertical,
}

impl Geometry {
    pub fn apply(&self, a: (f64, f64), b: (f64, f64)) -> f64 {
        match self {
            Geometry::Euclidean => {
                let dx = a.0 - b.0;
                let dy = a.1 - b.1;
                (dx * dx + dy * dy).sqrt()
            }
            Geometry::Vertical => (a.1 - b.1).abs(),
        }
    }
}

/// Plausible range in physical units (centimetres), checked only when calibrated
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlausibleRange {
    pub min: f64,
    pub max: f64,
}

impl PlausibleRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementSpec {
    pub name: &'static str,
    pub landmarks: [LandmarkName; 2],
    pub geometry: Geometry,
    pub plausible: Option<PlausibleRange>,
}

impl MeasurementSpec {
    const fn new(
        name: &'static str,
        from: LandmarkName,
        to: LandmarkName,
        geometry: Geometry,
        plausible: PlausibleRange,
    ) -> Self {
        Self {
            name,
            landmarks: [from, to],
            geometry,
            plausible: Some(plausible),
        }
    }

    /// Value for this measurement, or `None` when a required landmark is absent
    pub fn evaluate(&self, landmarks: &LandmarkSet, scale_factor: f64) -> Option<f64> {
        let a = landmarks.get(self.landmarks[0])?;
        let b = landmarks.get(self.landmarks[1])?;
        let value = self.geometry.apply((a.x, a.y), (b.x, b.y)) * scale_factor;
        value.is_finite().then_some(value.abs())
    }
}

use Geometry::{Euclidean, Vertical};
use LandmarkName::*;

/// Fixed measurement catalog
pub const CATALOG: [MeasurementSpec; 9] = [
    MeasurementSpec::new("wither_height", LeftShoulder, LeftAnkle, Vertical, PlausibleRange::new(40.0, 110.0)),
    MeasurementSpec::new("rump_height", LeftHip, LeftAnkle, Vertical, PlausibleRange::new(40.0, 110.0)),
    MeasurementSpec::new("sternum_height", LeftElbow, LeftWrist, Vertical, PlausibleRange::new(15.0, 70.0)),
    MeasurementSpec::new("body_length", LeftShoulder, LeftHip, Euclidean, PlausibleRange::new(40.0, 130.0)),
    MeasurementSpec::new("chest_width", LeftShoulder, RightShoulder, Euclidean, PlausibleRange::new(10.0, 50.0)),
    MeasurementSpec::new("hip_width", LeftHip, RightHip, Euclidean, PlausibleRange::new(10.0, 45.0)),
    MeasurementSpec::new("head_length", Nose, LeftEar, Euclidean, PlausibleRange::new(10.0, 40.0)),
    MeasurementSpec::new("head_width", LeftEar, RightEar, Euclidean, PlausibleRange::new(5.0, 30.0)),
    MeasurementSpec::new("neck_length", LeftShoulder, Nose, Euclidean, PlausibleRange::new(10.0, 60.0)),
];

pub fn catalog() -> &'static [MeasurementSpec] {
    &CATALOG
}

pub fn spec(name: &str) -> Option<&'static MeasurementSpec> {
    CATALOG.iter().find(|s| s.name == name)
}

pub type MeasurementMap = BTreeMap<&'static str, Option<f64>>;

/// Evaluate the whole catalog. Missing landmarks null out only the affected entries.
pub fn compute(landmarks: &LandmarkSet, scale_factor: f64) -> MeasurementMap {
    CATALOG
        .iter()
        .map(|spec| (spec.name, spec.evaluate(landmarks, scale_factor)))
        .collect()
}

/// Number of non-null entries
pub fn successful(values: &MeasurementMap) -> usize {
    values.values().filter(|v| v.is_some()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectorKind, Landmark};

    fn set(points: &[(LandmarkName, f64, f64)]) -> LandmarkSet {
        points.iter().fold(LandmarkSet::detected(DetectorKind::Primary), |s, &(n, x, y)| {
            s.with_landmark(Landmark::detected(n, x, y, 0.9))
        })
    }

    #[test]
    fn test_chest_width_scenario() {
        let landmarks = set(&[(LeftShoulder, 100.0, 200.0), (RightShoulder, 300.0, 200.0)]);
        let values = compute(&landmarks, 0.5);
        assert_eq!(values["chest_width"], Some(100.0));
    }

    #[test]
    fn test_missing_landmarks_null_only_their_entries() {
        let landmarks = set(&[(LeftShoulder, 100.0, 200.0), (RightShoulder, 300.0, 200.0)]);
        let values = compute(&landmarks, 1.0);
        assert_eq!(values.len(), CATALOG.len());
        assert_eq!(successful(&values), 1);
        assert_eq!(values["body_length"], None);
        assert_eq!(values["wither_height"], None);
    }

    #[test]
    fn test_vertical_uses_only_y() {
        let landmarks = set(&[(LeftShoulder, 0.0, 100.0), (LeftAnkle, 250.0, 300.0)]);
        assert_eq!(compute(&landmarks, 1.0)["wither_height"], Some(200.0));
    }

    #[test]
    fn test_values_never_negative() {
        let landmarks = set(&[(LeftHip, 50.0, 10.0), (LeftAnkle, 40.0, 5.0), (LeftShoulder, -30.0, -40.0)]);
        for value in compute(&landmarks, 2.0).values().flatten() {
            assert!(*value >= 0.0);
        }
    }

    #[test]
    fn test_catalog_names_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            assert!(CATALOG[i + 1..].iter().all(|b| b.name != a.name));
            assert!(spec(a.name).is_some());
        }
    }
}
