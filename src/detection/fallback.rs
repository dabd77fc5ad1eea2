//! Detection fallback chain.
//!
//! ```text
//! Initial ──found──▶ Succeeded
//!    │
//!    ▼
//! PrimaryAttempted ──enhance──▶ EnhancedAttempted ──found──▶ Succeeded
//!                                      │
//!                                      ▼
//!                             FallbackDetection ──anchor──▶ Estimated
//!                                      │
//!                                      ▼
//!                                    Failed
//! ```

use image::DynamicImage;
use tracing::{debug, info};

use super::ensemble::{self, StrategyResult};
use super::preprocessing::enhance_for_detection;
use super::{Detection, DetectorRegistry};
use crate::models::{AnchorBox, DetectorKind, FallbackState, Landmark, LandmarkName, LandmarkSet};

pub const ESTIMATED_NOTE: &str = "Measurements estimated from head detection (lower accuracy)";
pub const ENHANCED_NOTE: &str = "Landmarks found after enhancing the image";

/// Terminal result of the chain
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub state: FallbackState,
    /// Empty when `state` is `Failed`
    pub landmarks: LandmarkSet,
    pub agreement: f64,
    /// Strategies that returned something, in catalog order
    pub strategies_used: Vec<DetectorKind>,
    /// Every state visited, starting with `Initial`
    pub transitions: Vec<FallbackState>,
    pub notes: Vec<String>,
}

impl ChainOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.state, FallbackState::Succeeded | FallbackState::Estimated)
    }
}

pub struct FallbackController<'a> {
    registry: &'a DetectorRegistry,
    enabled: Vec<DetectorKind>,
    estimated_confidence: f64,
}

impl<'a> FallbackController<'a> {
    /// `enabled` restricts which registered variants may run
    pub fn new(registry: &'a DetectorRegistry, enabled: &[DetectorKind], estimated_confidence: f64) -> Self {
        let enabled = DetectorKind::ALL
            .into_iter()
            .filter(|kind| enabled.contains(kind) && registry.contains(*kind))
            .collect();
        Self {
            registry,
            enabled,
            estimated_confidence,
        }
    }

    fn is_enabled(&self, kind: DetectorKind) -> bool {
        self.enabled.contains(&kind)
    }

    pub fn run(&self, image: &DynamicImage) -> ChainOutcome {
        let dims = (image.width(), image.height());
        let mut state = FallbackState::Initial;
        let mut transitions = vec![state];
        let mut attempts: Vec<StrategyResult> = Vec::new();
        let mut notes = Vec::new();
        let mut enhanced: Option<DynamicImage> = None;
        let mut found: Option<(LandmarkSet, f64)> = None;

        while !state.is_terminal() {
            let next = match state {
                FallbackState::Initial => {
                    let results = ensemble::run_strategies(self.registry, &self.enabled, image);
                    found = ensemble::combine(&results, dims);
                    attempts.extend(results);
                    if found.is_some() {
                        FallbackState::Succeeded
                    } else {
                        FallbackState::PrimaryAttempted
                    }
                }
                FallbackState::PrimaryAttempted => {
                    enhanced = Some(enhance_for_detection(image));
                    FallbackState::EnhancedAttempted
                }
                FallbackState::EnhancedAttempted => {
                    let retry = self.retry_on(enhanced.as_ref().unwrap_or(image));
                    if let Some(retry) = retry {
                        // outline and anchor results from the first pass still count
                        let mut results: Vec<StrategyResult> = attempts
                            .iter()
                            .filter(|r| r.landmarks().is_none())
                            .cloned()
                            .collect();
                        results.push(retry.clone());
                        found = ensemble::combine(&results, dims);
                        attempts.push(retry);
                    }
                    if found.is_some() {
                        notes.push(ENHANCED_NOTE.to_string());
                        FallbackState::Succeeded
                    } else {
                        FallbackState::FallbackDetection
                    }
                }
                FallbackState::FallbackDetection => match self.anchor(&attempts, enhanced.as_ref().unwrap_or(image)) {
                    Some((anchor, fresh)) => {
                        if let Some(fresh) = fresh {
                            attempts.push(fresh);
                        }
                        let set = estimate_from_anchor(&anchor, dims, self.estimated_confidence);
                        found = Some((set, 0.0));
                        notes.push(ESTIMATED_NOTE.to_string());
                        FallbackState::Estimated
                    }
                    None => FallbackState::Failed,
                },
                terminal => terminal,
            };
            debug!(from = ?state, to = ?next, "fallback transition");
            state = next;
            transitions.push(state);
        }

        let strategies_used = DetectorKind::ALL
            .into_iter()
            .filter(|kind| attempts.iter().any(|r| r.kind == *kind && r.found()))
            .collect();
        let (landmarks, agreement) = found.unwrap_or_else(|| (LandmarkSet::empty(), 0.0));

        info!(state = ?state, landmarks = landmarks.len(), agreement, "detection chain finished");
        ChainOutcome {
            state,
            landmarks,
            agreement,
            strategies_used,
            transitions,
            notes,
        }
    }

    /// The single retry: primary, or broad when primary is not enabled
    fn retry_on(&self, image: &DynamicImage) -> Option<StrategyResult> {
        let kind = [DetectorKind::Primary, DetectorKind::Broad]
            .into_iter()
            .find(|kind| self.is_enabled(*kind))?;
        Some(StrategyResult {
            kind,
            detection: self.registry.run(kind, image),
        })
    }

    /// Anchor from the first pass, or a fresh secondary-feature run on the
    /// enhanced image (returned alongside so it is recorded as an attempt)
    fn anchor(&self, attempts: &[StrategyResult], image: &DynamicImage) -> Option<(AnchorBox, Option<StrategyResult>)> {
        if !self.is_enabled(DetectorKind::SecondaryFeature) {
            return None;
        }
        let earlier = attempts
            .iter()
            .filter(|r| r.kind == DetectorKind::SecondaryFeature)
            .find_map(|r| r.detection.as_ref().and_then(Detection::anchor));
        if let Some(anchor) = earlier {
            return Some((*anchor, None));
        }

        let detection = self.registry.run(DetectorKind::SecondaryFeature, image);
        let anchor = detection.as_ref().and_then(Detection::anchor).copied()?;
        Some((
            anchor,
            Some(StrategyResult {
                kind: DetectorKind::SecondaryFeature,
                detection,
            }),
        ))
    }
}

/// Reconstruct the full skeleton from a head box using fixed body proportions.
/// Every landmark is `Estimated` with `confidence` (capped by the anchor's own).
pub fn estimate_from_anchor(anchor: &AnchorBox, (width, height): (u32, u32), confidence: f64) -> LandmarkSet {
    use LandmarkName::*;

    let (cx, cy) = anchor.bbox.center();
    let w = anchor.bbox.width as f64;
    let h = anchor.bbox.height as f64;
    let max_x = width.saturating_sub(1) as f64;
    let max_y = height.saturating_sub(1) as f64;
    let confidence = confidence.min(anchor.confidence.max(0.0));

    // (left, right, lateral offset, vertical offset)
    let pairs = [
        (LeftEye, RightEye, w / 4.0, -h / 4.0),
        (LeftEar, RightEar, w / 3.0, -h / 2.0),
        (LeftShoulder, RightShoulder, w / 2.0, h),
        (LeftElbow, RightElbow, w / 2.0, 1.75 * h),
        (LeftWrist, RightWrist, w / 2.0, 3.0 * h),
        (LeftHip, RightHip, w / 2.0, 1.5 * h),
        (LeftKnee, RightKnee, w / 2.0, 2.25 * h),
        (LeftAnkle, RightAnkle, w / 2.0, 3.0 * h),
    ];

    let point = |name, x: f64, y: f64| Landmark::estimated(name, x.clamp(0.0, max_x), y.clamp(0.0, max_y), confidence);
    let mut set = LandmarkSet::estimated(DetectorKind::SecondaryFeature).with_landmark(point(Nose, cx, cy));
    for (left, right, dx, dy) in pairs {
        set.insert(point(left, cx - dx, cy + dy));
        set.insert(point(right, cx + dx, cy + dy));
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detector;
    use crate::models::{BoundingBox, Origin, Silhouette};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a canned detection and counts invocations
    struct Canned {
        kind: DetectorKind,
        detection: Option<Detection>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn new(kind: DetectorKind, detection: Option<Detection>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                detection,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Detector for Canned {
        fn kind(&self) -> DetectorKind {
            self.kind
        }

        fn detect(&self, _image: &DynamicImage) -> Option<Detection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.detection.clone()
        }
    }

    /// Finds nothing on the first call and `detection` on every later one
    struct SecondTime {
        detection: Detection,
        calls: AtomicUsize,
    }

    impl Detector for SecondTime {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Primary
        }

        fn detect(&self, _image: &DynamicImage) -> Option<Detection> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (call > 0).then(|| self.detection.clone())
        }
    }

    fn head_box() -> AnchorBox {
        AnchorBox {
            bbox: BoundingBox { x: 180, y: 20, width: 40, height: 40 },
            confidence: 0.7,
        }
    }

    fn skeleton(kind: DetectorKind) -> LandmarkSet {
        LandmarkSet::detected(kind)
            .with_landmark(Landmark::detected(LandmarkName::LeftShoulder, 100.0, 200.0, 0.9))
            .with_landmark(Landmark::detected(LandmarkName::RightShoulder, 300.0, 200.0, 0.9))
    }

    fn image() -> DynamicImage {
        DynamicImage::new_rgb8(400, 300)
    }

    #[test]
    fn test_primary_success_is_direct() {
        let primary = Canned::new(DetectorKind::Primary, Some(Detection::Landmarks(skeleton(DetectorKind::Primary))));
        let registry = DetectorRegistry::builder().with_detector(primary.clone()).build();
        let chain = FallbackController::new(&registry, &DetectorKind::ALL, 0.5).run(&image());

        assert_eq!(chain.state, FallbackState::Succeeded);
        assert_eq!(chain.transitions, vec![FallbackState::Initial, FallbackState::Succeeded]);
        assert_eq!(chain.strategies_used, vec![DetectorKind::Primary]);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert!(chain.notes.is_empty());
    }

    #[test]
    fn test_enhanced_retry_recovers_landmarks() {
        let primary = Arc::new(SecondTime {
            detection: Detection::Landmarks(skeleton(DetectorKind::Primary)),
            calls: AtomicUsize::new(0),
        });
        let outline = Silhouette {
            bbox: BoundingBox { x: 50, y: 100, width: 300, height: 180 },
            area: 30000,
            foreground_fraction: 0.25,
        };
        let registry = DetectorRegistry::builder()
            .with_detector(primary.clone())
            .with_detector(Canned::new(DetectorKind::Outline, Some(Detection::Outline(outline))))
            .build();
        let chain = FallbackController::new(&registry, &DetectorKind::ALL, 0.5).run(&image());

        assert_eq!(chain.state, FallbackState::Succeeded);
        assert_eq!(
            chain.transitions,
            vec![
                FallbackState::Initial,
                FallbackState::PrimaryAttempted,
                FallbackState::EnhancedAttempted,
                FallbackState::Succeeded,
            ]
        );
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert_eq!(chain.notes, vec![ENHANCED_NOTE.to_string()]);
        assert_eq!(chain.landmarks.len(), 2);
        assert!(chain.landmarks.iter().all(|l| l.origin == Origin::Detected));
        assert_eq!(chain.strategies_used, vec![DetectorKind::Primary, DetectorKind::Outline]);
        // the first-pass outline is scored alongside the retry: one landmark set out of two
        assert!((chain.agreement - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_anchor_only_yields_estimated_skeleton() {
        let primary = Canned::new(DetectorKind::Primary, None);
        let head = Canned::new(DetectorKind::SecondaryFeature, Some(Detection::Anchor(head_box())));
        let registry = DetectorRegistry::builder()
            .with_detector(primary.clone())
            .with_detector(head.clone())
            .build();
        let chain = FallbackController::new(&registry, &DetectorKind::ALL, 0.5).run(&image());

        assert_eq!(chain.state, FallbackState::Estimated);
        assert_eq!(
            chain.transitions,
            vec![
                FallbackState::Initial,
                FallbackState::PrimaryAttempted,
                FallbackState::EnhancedAttempted,
                FallbackState::FallbackDetection,
                FallbackState::Estimated,
            ]
        );
        // initial pass plus the single retry
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        // the first-pass anchor is reused
        assert_eq!(head.calls.load(Ordering::SeqCst), 1);
        assert_eq!(chain.landmarks.len(), LandmarkName::ALL.len());
        assert!(chain.landmarks.iter().all(|l| l.origin == Origin::Estimated && l.confidence <= 0.5));
        assert_eq!(chain.notes, vec![ESTIMATED_NOTE.to_string()]);
    }

    #[test]
    fn test_nothing_found_fails() {
        let registry = DetectorRegistry::builder()
            .with_detector(Canned::new(DetectorKind::Primary, None))
            .with_detector(Canned::new(DetectorKind::SecondaryFeature, None))
            .build();
        let chain = FallbackController::new(&registry, &DetectorKind::ALL, 0.5).run(&image());

        assert_eq!(chain.state, FallbackState::Failed);
        assert!(!chain.succeeded());
        assert!(chain.landmarks.is_empty());
        assert!(chain.strategies_used.is_empty());
    }

    #[test]
    fn test_disabled_secondary_feature_cannot_rescue() {
        let registry = DetectorRegistry::builder()
            .with_detector(Canned::new(DetectorKind::Primary, None))
            .with_detector(Canned::new(DetectorKind::SecondaryFeature, Some(Detection::Anchor(head_box()))))
            .build();
        let chain = FallbackController::new(&registry, &[DetectorKind::Primary], 0.5).run(&image());
        assert_eq!(chain.state, FallbackState::Failed);
    }

    #[test]
    fn test_template_is_clamped_to_image() {
        let anchor = AnchorBox {
            bbox: BoundingBox { x: 0, y: 200, width: 60, height: 60 },
            confidence: 0.9,
        };
        let set = estimate_from_anchor(&anchor, (400, 300), 0.5);
        assert!(set.iter().all(|l| (0.0..=399.0).contains(&l.x) && (0.0..=299.0).contains(&l.y)));
        let ankle = set.get(LandmarkName::LeftAnkle).unwrap();
        assert_eq!(ankle.y, 299.0);
        assert_eq!(ankle.x, 0.0);
        let nose = set.get(LandmarkName::Nose).unwrap();
        assert_eq!((nose.x, nose.y), (30.0, 230.0));
    }
}
