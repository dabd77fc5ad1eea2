use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MorphoError;

/// Anatomical landmark catalog, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkName {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl LandmarkName {
    pub const ALL: [LandmarkName; 17] = [
        LandmarkName::Nose,
        LandmarkName::LeftEye,
        LandmarkName::RightEye,
        LandmarkName::LeftEar,
        LandmarkName::RightEar,
        LandmarkName::LeftShoulder,
        LandmarkName::RightShoulder,
        LandmarkName::LeftElbow,
        LandmarkName::RightElbow,
        LandmarkName::LeftWrist,
        LandmarkName::RightWrist,
        LandmarkName::LeftHip,
        LandmarkName::RightHip,
        LandmarkName::LeftKnee,
        LandmarkName::RightKnee,
        LandmarkName::LeftAnkle,
        LandmarkName::RightAnkle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LandmarkName::Nose => "nose",
            LandmarkName::LeftEye => "left_eye",
            LandmarkName::RightEye => "right_eye",
            LandmarkName::LeftEar => "left_ear",
            LandmarkName::RightEar => "right_ear",
            LandmarkName::LeftShoulder => "left_shoulder",
            LandmarkName::RightShoulder => "right_shoulder",
            LandmarkName::LeftElbow => "left_elbow",
            LandmarkName::RightElbow => "right_elbow",
            LandmarkName::LeftWrist => "left_wrist",
            LandmarkName::RightWrist => "right_wrist",
            LandmarkName::LeftHip => "left_hip",
            LandmarkName::RightHip => "right_hip",
            LandmarkName::LeftKnee => "left_knee",
            LandmarkName::RightKnee => "right_knee",
            LandmarkName::LeftAnkle => "left_ankle",
            LandmarkName::RightAnkle => "right_ankle",
        }
    }
}

impl fmt::Display for LandmarkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LandmarkName {
    type Err = MorphoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LandmarkName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| MorphoError::config(format!("unknown landmark name '{s}'")))
    }
}

/// Whether a landmark was observed by a detector or reconstructed from a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Detected,
    Estimated,
}

/// Detection strategy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Full skeleton, highest accuracy
    Primary,
    /// Lower acceptance threshold, higher recall
    Broad,
    /// One coarse anchor region (head box)
    SecondaryFeature,
    /// Foreground/background body silhouette
    Outline,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::Primary,
        DetectorKind::Broad,
        DetectorKind::SecondaryFeature,
        DetectorKind::Outline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Primary => "primary",
            DetectorKind::Broad => "broad",
            DetectorKind::SecondaryFeature => "secondary_feature",
            DetectorKind::Outline => "outline",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named anatomical point in image-pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub name: LandmarkName,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    pub confidence: f64,
    pub origin: Origin,
}

impl Landmark {
    pub fn detected(name: LandmarkName, x: f64, y: f64, confidence: f64) -> Self {
        Self {
            name,
            x,
            y,
            z: None,
            confidence: clamp_unit(confidence),
            origin: Origin::Detected,
        }
    }

    pub fn estimated(name: LandmarkName, x: f64, y: f64, confidence: f64) -> Self {
        Self {
            origin: Origin::Estimated,
            ..Self::detected(name, x, y, confidence)
        }
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    pub fn distance_to(&self, other: &Landmark) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The full collection of landmarks produced for one image.
///
/// All members share the set's origin: inserting a landmark re-tags it, so a set
/// is never partly detected and partly estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub strategy: Option<DetectorKind>,
    pub origin: Origin,
    pub agreement: f64,
    pub landmarks: BTreeMap<LandmarkName, Landmark>,
}

impl LandmarkSet {
    pub fn new(strategy: DetectorKind, origin: Origin) -> Self {
        Self {
            strategy: Some(strategy),
            origin,
            agreement: 0.0,
            landmarks: BTreeMap::new(),
        }
    }

    pub fn detected(strategy: DetectorKind) -> Self {
        Self::new(strategy, Origin::Detected)
    }

    pub fn estimated(strategy: DetectorKind) -> Self {
        Self::new(strategy, Origin::Estimated)
    }

    /// Empty set carried by failed outcomes
    pub fn empty() -> Self {
        Self {
            strategy: None,
            origin: Origin::Detected,
            agreement: 0.0,
            landmarks: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, mut landmark: Landmark) {
        landmark.origin = self.origin;
        self.landmarks.insert(landmark.name, landmark);
    }

    pub fn with_landmark(mut self, landmark: Landmark) -> Self {
        self.insert(landmark);
        self
    }

    pub fn with_agreement(mut self, agreement: f64) -> Self {
        self.agreement = clamp_unit(agreement);
        self
    }

    pub fn get(&self, name: LandmarkName) -> Option<&Landmark> {
        self.landmarks.get(&name)
    }

    pub fn contains(&self, name: LandmarkName) -> bool {
        self.landmarks.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.values()
    }

    /// Mean landmark confidence, 0 for an empty set
    pub fn mean_confidence(&self) -> f64 {
        if self.landmarks.is_empty() {
            return 0.0;
        }
        let total: f64 = self.landmarks.values().map(|l| l.confidence).sum();
        clamp_unit(total / self.landmarks.len() as f64)
    }

    /// Copy of this set with every position replaced by `f(landmark)`
    pub fn remapped(&self, mut f: impl FnMut(&Landmark) -> (f64, f64)) -> LandmarkSet {
        let mut out = self.clone();
        for landmark in out.landmarks.values_mut() {
            let (x, y) = f(landmark);
            landmark.x = x;
            landmark.y = y;
        }
        out
    }
}

/// Axis-aligned box in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn max_x(&self) -> u32 {
        self.x + self.width.saturating_sub(1)
    }

    pub fn max_y(&self) -> u32 {
        self.y + self.height.saturating_sub(1)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Point containment with a margin expressed as a fraction of the box size
    pub fn contains_padded(&self, x: f64, y: f64, padding: f64) -> bool {
        let pad_x = self.width as f64 * padding;
        let pad_y = self.height as f64 * padding;
        x >= self.x as f64 - pad_x
            && x <= (self.x + self.width) as f64 + pad_x
            && y >= self.y as f64 - pad_y
            && y <= (self.y + self.height) as f64 + pad_y
    }
}

/// Coarse anchor region returned by the secondary-feature detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorBox {
    pub bbox: BoundingBox,
    pub confidence: f64,
}

/// Body silhouette returned by the outline detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Silhouette {
    pub bbox: BoundingBox,
    pub area: u32,
    pub foreground_fraction: f64,
}

/// Where a measurement value came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub landmarks: Vec<LandmarkName>,
    pub origin: Option<Origin>,
    pub strategy: Option<DetectorKind>,
    pub calibrated: bool,
    pub corrected: bool,
    pub bootstrap_mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub name: String,
    /// Physical units when calibrated, pixel-equivalent otherwise; never negative
    pub value: Option<f64>,
    /// Bootstrap standard deviation
    pub uncertainty: Option<f64>,
    pub provenance: Provenance,
}

impl MeasurementResult {
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityReport {
    /// Mean intensity, 0-255
    pub brightness: f64,
    /// Intensity standard deviation
    pub contrast: f64,
    /// Laplacian response variance
    pub sharpness: f64,
    /// Variance of the image minus its smoothed version
    pub noise: f64,
    /// Fraction of edge pixels
    pub edge_density: f64,
    /// Weighted composite in [0, 1]
    pub score: f64,
}

/// Non-fatal condition attached to a successful outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Warning {
    Calibration(String),
    Validation(String),
    Correction(String),
}

impl Warning {
    pub fn message(&self) -> &str {
        match self {
            Warning::Calibration(m) | Warning::Validation(m) | Warning::Correction(m) => m,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Warning::Validation(_))
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Terminal states of the detection fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackState {
    Initial,
    PrimaryAttempted,
    EnhancedAttempted,
    FallbackDetection,
    Succeeded,
    Estimated,
    Failed,
}

impl FallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FallbackState::Succeeded | FallbackState::Estimated | FallbackState::Failed
        )
    }
}

/// Everything the engine reports for one image
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub id: Uuid,
    pub processed_at: String,
    pub success: bool,
    pub landmarks: LandmarkSet,
    pub measurements: Vec<MeasurementResult>,
    pub quality: QualityReport,
    pub confidence: f64,
    pub scale_factor: f64,
    pub calibrated: bool,
    pub agreement: f64,
    pub strategies_used: Vec<DetectorKind>,
    pub fallback_state: FallbackState,
    pub warnings: Vec<Warning>,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MorphoError>,
    #[serde(skip)]
    pub annotated: Option<RgbImage>,
}

impl ProcessingOutcome {
    pub fn measurement(&self, name: &str) -> Option<&MeasurementResult> {
        self.measurements.iter().find(|m| m.name == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.measurement(name).and_then(|m| m.value)
    }

    pub fn warning_messages(&self) -> Vec<&str> {
        self.warnings.iter().map(Warning::message).collect()
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
