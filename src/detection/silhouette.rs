//! Built-in classical detectors working from the body silhouette.
//!
//! No trained model ships with the crate. The silhouette is the largest
//! Otsu-thresholded connected component that is not the background frame; the
//! keypoint detectors read a side-view skeleton off its column profile. Model
//! backed detectors plug in through [`Detector`](super::Detector) instead.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;

use super::contours::{LabelImage, Region, find_regions};
use super::preprocessing::{apply_blur, to_grayscale};
use super::{Detection, Detector};
use crate::models::{
    AnchorBox, BoundingBox, DetectorKind, Landmark, LandmarkName, LandmarkSet, Silhouette,
};

/// Below this intensity range there is nothing to segment
const MIN_INTENSITY_RANGE: u8 = 16;
/// Top share of the silhouette height used to decide which end holds the head
const HEAD_BAND: f64 = 0.35;

/// Segmented body with its per-column vertical extent
pub struct SilhouetteMask {
    pub region: Region,
    pub image_area: u32,
    labeled: LabelImage,
    head_right: bool,
}

impl SilhouetteMask {
    pub fn bbox(&self) -> BoundingBox {
        self.region.bbox()
    }

    pub fn head_right(&self) -> bool {
        self.head_right
    }

    pub fn foreground_fraction(&self) -> f64 {
        self.region.area() as f64 / self.image_area.max(1) as f64
    }

    fn is_body(&self, x: u32, y: u32) -> bool {
        self.labeled.get_pixel(x, y)[0] == self.region.label
    }

    /// Top and bottom body pixel in column `x`
    fn column(&self, x: u32) -> Option<(u32, u32)> {
        let r = &self.region;
        if x < r.min_x || x > r.max_x {
            return None;
        }
        let top = (r.min_y..=r.max_y).find(|&y| self.is_body(x, y))?;
        let bottom = (r.min_y..=r.max_y).rev().find(|&y| self.is_body(x, y))?;
        Some((top, bottom))
    }

    /// Column `frac` of the body length away from the head end
    fn from_head(&self, frac: f64) -> (f64, u32, u32) {
        let r = &self.region;
        let span = (r.width() - 1) as f64;
        let x = if self.head_right {
            r.max_x as f64 - frac * span
        } else {
            r.min_x as f64 + frac * span
        };
        let col = (x.round() as u32).clamp(r.min_x, r.max_x);
        // regions are 8-connected so every column in the box holds body pixels
        let (top, bottom) = self.column(col).unwrap_or((r.min_y, r.max_y));
        (x, top, bottom)
    }
}

/// Segment the dominant foreground body. `None` for flat images or when the
/// largest candidate covers less than `min_foreground` of the frame.
pub fn extract_silhouette(img: &DynamicImage, min_foreground: f64, blur_sigma: f32) -> Option<SilhouetteMask> {
    let gray = apply_blur(&to_grayscale(img), blur_sigma);
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return None;
    }
    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi - lo < MIN_INTENSITY_RANGE {
        return None;
    }

    let level = otsu_level(&gray);
    let image_area = width * height;
    let min_area = ((min_foreground * image_area as f64).ceil() as u32).max(1);

    let mut best: Option<(LabelImage, Region)> = None;
    for dark_foreground in [true, false] {
        let mask = GrayImage::from_fn(width, height, |x, y| {
            let v = gray.get_pixel(x, y)[0];
            let on = if dark_foreground { v <= level } else { v > level };
            Luma([if on { 255 } else { 0 }])
        });
        let (labeled, regions) = find_regions(&mask, min_area);
        let Some(candidate) = regions.into_iter().find(|r| !is_frame(r, width, height)) else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((_, current)) => border_ratio(&candidate) < border_ratio(current),
        };
        if better {
            best = Some((labeled, candidate));
        }
    }

    let (labeled, region) = best?;
    let head_right = head_on_right(&labeled, &region);
    Some(SilhouetteMask {
        region,
        image_area,
        labeled,
        head_right,
    })
}

/// Background regions wrap the whole frame and hug its border
fn is_frame(region: &Region, width: u32, height: u32) -> bool {
    let perimeter = 2 * (width + height);
    region.width() == width && region.height() == height && region.border_pixels * 2 > perimeter
}

fn border_ratio(region: &Region) -> f64 {
    region.border_pixels as f64 / region.pixel_count.max(1) as f64
}

/// The head end carries more mass in the top band (raised head and neck)
fn head_on_right(labeled: &LabelImage, region: &Region) -> bool {
    let band_bottom = region.min_y + ((region.height() as f64 * HEAD_BAND) as u32).max(1);
    let third = (region.width() / 3).max(1);
    let mass = |x0: u32, x1: u32| {
        let mut count = 0u32;
        for y in region.min_y..band_bottom.min(region.max_y + 1) {
            for x in x0..x1 {
                count += u32::from(labeled.get_pixel(x, y)[0] == region.label);
            }
        }
        count
    };
    let left = mass(region.min_x, (region.min_x + third).min(region.max_x + 1));
    let right = mass((region.max_x + 1).saturating_sub(third), region.max_x + 1);
    right >= left
}

/// Full skeleton read off the silhouette, assuming a side view
pub struct SilhouetteKeypointDetector {
    kind: DetectorKind,
    min_foreground: f64,
    blur_sigma: f32,
    base_confidence: f64,
}

impl SilhouetteKeypointDetector {
    pub fn primary() -> Self {
        Self {
            kind: DetectorKind::Primary,
            min_foreground: 0.05,
            blur_sigma: 1.5,
            base_confidence: 0.85,
        }
    }

    /// Accepts smaller, fainter silhouettes at lower confidence
    pub fn broad() -> Self {
        Self {
            kind: DetectorKind::Broad,
            min_foreground: 0.01,
            blur_sigma: 2.5,
            base_confidence: 0.6,
        }
    }

    fn skeleton(&self, mask: &SilhouetteMask) -> LandmarkSet {
        let width = mask.region.width() as f64;
        let ground = mask.region.max_y as f64;
        // compact blobs are less likely to be a standing body
        let fill = mask.region.fill_ratio() as f64;
        let confidence = self.base_confidence * (0.6 + 0.4 * (fill / 0.4).min(1.0));

        let mut set = LandmarkSet::detected(self.kind);
        let mut pair = |left: LandmarkName, right: LandmarkName, x: f64, y: f64, lateral: f64| {
            let offset = lateral * width;
            set.insert(Landmark::detected(left, x - offset, y, confidence));
            set.insert(Landmark::detected(right, x + offset, y, confidence));
        };

        let (x, top, bottom) = mask.from_head(0.0);
        let nose_y = (top + bottom) as f64 / 2.0;

        let (x_eye, top, bottom) = mask.from_head(0.06);
        pair(LandmarkName::LeftEye, LandmarkName::RightEye, x_eye, top as f64 + 0.3 * (bottom - top) as f64, 0.02);

        let (x_ear, top, _) = mask.from_head(0.10);
        pair(LandmarkName::LeftEar, LandmarkName::RightEar, x_ear, top as f64, 0.03);

        let (x_sh, top, _) = mask.from_head(0.30);
        let top = top as f64;
        pair(LandmarkName::LeftShoulder, LandmarkName::RightShoulder, x_sh, top + 0.1 * (ground - top), 0.07);

        let (x_fore, top, _) = mask.from_head(0.32);
        let top = top as f64;
        pair(LandmarkName::LeftElbow, LandmarkName::RightElbow, x_fore, top + 0.55 * (ground - top), 0.07);
        pair(LandmarkName::LeftWrist, LandmarkName::RightWrist, x_fore, ground, 0.07);

        let (x_hip, top, _) = mask.from_head(0.85);
        let top = top as f64;
        pair(LandmarkName::LeftHip, LandmarkName::RightHip, x_hip, top + 0.15 * (ground - top), 0.06);

        let (x_hind, top, _) = mask.from_head(0.83);
        let top = top as f64;
        pair(LandmarkName::LeftKnee, LandmarkName::RightKnee, x_hind, top + 0.7 * (ground - top), 0.06);
        pair(LandmarkName::LeftAnkle, LandmarkName::RightAnkle, x_hind, ground, 0.06);

        set.insert(Landmark::detected(LandmarkName::Nose, x, nose_y, confidence));
        set
    }
}

impl Detector for SilhouetteKeypointDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect(&self, image: &DynamicImage) -> Option<Detection> {
        let mask = extract_silhouette(image, self.min_foreground, self.blur_sigma)?;
        Some(Detection::Landmarks(self.skeleton(&mask)))
    }

    fn name(&self) -> &str {
        match self.kind {
            DetectorKind::Primary => "silhouette keypoints (primary)",
            _ => "silhouette keypoints (broad)",
        }
    }
}

/// Coarse head box at the head end of the silhouette
pub struct HeadRegionDetector {
    min_foreground: f64,
    blur_sigma: f32,
}

impl HeadRegionDetector {
    pub fn new() -> Self {
        Self {
            min_foreground: 0.005,
            blur_sigma: 2.0,
        }
    }
}

impl Default for HeadRegionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for HeadRegionDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::SecondaryFeature
    }

    fn detect(&self, image: &DynamicImage) -> Option<Detection> {
        let mask = extract_silhouette(image, self.min_foreground, self.blur_sigma)?;
        let r = &mask.region;
        let head_span = ((r.width() as f64 * 0.2).round() as u32).max(1);
        let (x0, x1) = if mask.head_right {
            (r.max_x + 1 - head_span.min(r.width()), r.max_x)
        } else {
            (r.min_x, (r.min_x + head_span - 1).min(r.max_x))
        };

        let columns: Vec<(u32, u32)> = (x0..=x1).filter_map(|x| mask.column(x)).collect();
        let top = columns.iter().map(|c| c.0).min()?;
        let bottom = columns.iter().map(|c| c.1).max()?;
        let max_height = ((r.height() as f64 * 0.4).round() as u32).max(1);
        let height = (bottom - top + 1).min(max_height);

        Some(Detection::Anchor(AnchorBox {
            bbox: BoundingBox {
                x: x0,
                y: top,
                width: x1 - x0 + 1,
                height,
            },
            confidence: 0.5,
        }))
    }

    fn name(&self) -> &str {
        "silhouette head region"
    }
}

/// Foreground/background segmentation giving the body outline
pub struct OutlineDetector {
    min_foreground: f64,
    blur_sigma: f32,
}

impl OutlineDetector {
    pub fn new() -> Self {
        Self {
            min_foreground: 0.01,
            blur_sigma: 2.0,
        }
    }
}

impl Default for OutlineDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for OutlineDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Outline
    }

    fn detect(&self, image: &DynamicImage) -> Option<Detection> {
        let mask = extract_silhouette(image, self.min_foreground, self.blur_sigma)?;
        Some(Detection::Outline(Silhouette {
            bbox: mask.bbox(),
            area: mask.region.area(),
            foreground_fraction: mask.foreground_fraction(),
        }))
    }

    fn name(&self) -> &str {
        "silhouette outline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Dark side-view body on a white background, head raised on the right
    fn side_view() -> DynamicImage {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([255, 255, 255]));
        let mut fill = |x0: u32, y0: u32, x1: u32, y1: u32| {
            for y in y0..y1 {
                for x in x0..x1 {
                    img.put_pixel(x, y, Rgb([40, 40, 40]));
                }
            }
        };
        fill(80, 100, 300, 170); // body
        for leg_x in [90, 120, 260, 285] {
            fill(leg_x, 170, leg_x + 12, 260);
        }
        fill(290, 60, 320, 120); // neck
        fill(300, 40, 360, 80); // head
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_silhouette_finds_body_and_head_side() {
        let mask = extract_silhouette(&side_view(), 0.05, 1.5).unwrap();
        let bbox = mask.bbox();
        assert!(bbox.x.abs_diff(80) <= 3 && bbox.max_x().abs_diff(359) <= 3);
        assert!(bbox.y.abs_diff(40) <= 3 && bbox.max_y().abs_diff(259) <= 3);
        assert!(mask.head_right());
    }

    #[test]
    fn test_flat_image_has_no_silhouette() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 80, Rgb([200, 200, 200])));
        assert!(extract_silhouette(&img, 0.001, 1.5).is_none());
        assert!(SilhouetteKeypointDetector::primary().detect(&img).is_none());
        assert!(HeadRegionDetector::new().detect(&img).is_none());
    }

    #[test]
    fn test_primary_skeleton_is_complete_and_ordered() {
        let detection = SilhouetteKeypointDetector::primary().detect(&side_view()).unwrap();
        let set = detection.landmarks().unwrap();
        assert_eq!(set.len(), LandmarkName::ALL.len());

        let nose = set.get(LandmarkName::Nose).unwrap();
        let hip = set.get(LandmarkName::LeftHip).unwrap();
        let shoulder = set.get(LandmarkName::LeftShoulder).unwrap();
        let ankle = set.get(LandmarkName::LeftAnkle).unwrap();
        assert!(nose.x > shoulder.x && shoulder.x > hip.x);
        assert!(shoulder.y < ankle.y);
        assert!(set.iter().all(|l| (0.0..=1.0).contains(&l.confidence)));
    }

    #[test]
    fn test_head_box_sits_at_head_end() {
        let detection = HeadRegionDetector::new().detect(&side_view()).unwrap();
        let anchor = detection.anchor().unwrap();
        let (cx, cy) = anchor.bbox.center();
        assert!(cx > 290.0);
        assert!(cy < 120.0);
    }

    #[test]
    fn test_outline_reports_fraction() {
        let detection = OutlineDetector::new().detect(&side_view()).unwrap();
        let silhouette = detection.silhouette().unwrap();
        assert!(silhouette.foreground_fraction > 0.1 && silhouette.foreground_fraction < 0.4);
    }
}
