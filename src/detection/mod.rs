pub mod contours;
pub mod ensemble;
pub mod fallback;
pub mod preprocessing;
pub mod silhouette;

use image::DynamicImage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{AnchorBox, DetectorKind, LandmarkSet, Silhouette};

pub use ensemble::{StrategyResult, combine};
pub use fallback::{ChainOutcome, FallbackController};
pub use silhouette::{HeadRegionDetector, OutlineDetector, SilhouetteKeypointDetector};

/// What a single detection strategy found
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Landmarks(LandmarkSet),
    Anchor(AnchorBox),
    Outline(Silhouette),
}

impl Detection {
    pub fn landmarks(&self) -> Option<&LandmarkSet> {
        match self {
            Detection::Landmarks(set) => Some(set),
            _ => None,
        }
    }

    pub fn anchor(&self) -> Option<&AnchorBox> {
        match self {
            Detection::Anchor(anchor) => Some(anchor),
            _ => None,
        }
    }

    pub fn silhouette(&self) -> Option<&Silhouette> {
        match self {
            Detection::Outline(silhouette) => Some(silhouette),
            _ => None,
        }
    }
}

/// A detection strategy. Implementations hold their (possibly expensive) model
/// state and must be usable from several threads at once.
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// Run detection; `None` means nothing usable was found
    fn detect(&self, image: &DynamicImage) -> Option<Detection>;

    /// Human-readable name (used in logs)
    fn name(&self) -> &str {
        self.kind().as_str()
    }
}

/// Detectors loaded once at engine construction and shared read-only across invocations
pub struct DetectorRegistry {
    detectors: BTreeMap<DetectorKind, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn builder() -> DetectorRegistryBuilder {
        DetectorRegistryBuilder::default()
    }

    /// The built-in silhouette-based detectors for every variant
    pub fn builtin() -> Self {
        Self::builder()
            .with_detector(Arc::new(SilhouetteKeypointDetector::primary()))
            .with_detector(Arc::new(SilhouetteKeypointDetector::broad()))
            .with_detector(Arc::new(HeadRegionDetector::new()))
            .with_detector(Arc::new(OutlineDetector::new()))
            .build()
    }

    pub fn get(&self, kind: DetectorKind) -> Option<&Arc<dyn Detector>> {
        self.detectors.get(&kind)
    }

    pub fn contains(&self, kind: DetectorKind) -> bool {
        self.detectors.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = DetectorKind> + '_ {
        self.detectors.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run one variant, logging the result
    pub fn run(&self, kind: DetectorKind, image: &DynamicImage) -> Option<Detection> {
        let detector = self.get(kind)?;
        let detection = detector.detect(image);
        debug!(detector = detector.name(), found = detection.is_some(), "detector finished");
        detection
    }

    /// Release every detector
    pub fn shutdown(self) {
        info!(detectors = self.detectors.len(), "releasing detectors");
        drop(self.detectors);
    }
}

impl fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("detectors", &self.detectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct DetectorRegistryBuilder {
    detectors: BTreeMap<DetectorKind, Arc<dyn Detector>>,
}

impl DetectorRegistryBuilder {
    /// Register a detector under its own kind, replacing any previous one
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.insert(detector.kind(), detector);
        self
    }

    pub fn build(self) -> DetectorRegistry {
        info!(detectors = self.detectors.len(), "detector registry ready");
        DetectorRegistry {
            detectors: self.detectors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing(DetectorKind);

    impl Detector for Nothing {
        fn kind(&self) -> DetectorKind {
            self.0
        }

        fn detect(&self, _image: &DynamicImage) -> Option<Detection> {
            None
        }
    }

    #[test]
    fn test_builtin_registers_every_variant() {
        let registry = DetectorRegistry::builtin();
        for kind in DetectorKind::ALL {
            assert!(registry.contains(kind), "{kind}");
        }
        registry.shutdown();
    }

    #[test]
    fn test_builder_replaces_by_kind() {
        let registry = DetectorRegistry::builder()
            .with_detector(Arc::new(Nothing(DetectorKind::Primary)))
            .with_detector(Arc::new(Nothing(DetectorKind::Primary)))
            .build();
        assert_eq!(registry.len(), 1);
        let image = DynamicImage::new_rgb8(4, 4);
        assert!(registry.run(DetectorKind::Primary, &image).is_none());
        assert!(registry.run(DetectorKind::Outline, &image).is_none());
    }
}
