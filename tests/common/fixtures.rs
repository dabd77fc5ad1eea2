use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use morphometer::{
    AnchorBox, BoundingBox, Detection, Detector, DetectorKind, DetectorRegistry, Landmark,
    LandmarkName, LandmarkSet,
};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::NamedTempFile;

const BODY: Rgb<u8> = Rgb([40, 40, 40]);

/// 400x300 side view of a dark goat-like body on white, head raised on the right
pub fn goat_image() -> RgbImage {
    let mut img = RgbImage::from_pixel(400, 300, Rgb([255, 255, 255]));
    draw_filled_rect_mut(&mut img, Rect::at(80, 100).of_size(220, 70), BODY);
    for leg_x in [90, 120, 260, 285] {
        draw_filled_rect_mut(&mut img, Rect::at(leg_x, 170).of_size(12, 90), BODY);
    }
    draw_filled_rect_mut(&mut img, Rect::at(290, 60).of_size(30, 60), BODY);
    draw_filled_rect_mut(&mut img, Rect::at(300, 40).of_size(60, 40), BODY);
    img
}

/// Uniform grey frame with nothing to detect
pub fn blank_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(400, 300, Rgb([128, 128, 128])))
}

pub fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("Failed to encode test image");
    buf
}

/// Writes the goat image as a PNG temp file.
/// The file will be automatically cleaned up when dropped.
pub fn create_test_image() -> NamedTempFile {
    write_png(&goat_image())
}

pub fn write_png(img: &RgbImage) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    img.save_with_format(file.path(), ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

/// Detector returning a fixed result regardless of the image
pub struct StubDetector {
    pub kind: DetectorKind,
    pub detection: Option<Detection>,
}

impl Detector for StubDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect(&self, _image: &DynamicImage) -> Option<Detection> {
        self.detection.clone()
    }
}

pub fn stub(kind: DetectorKind, detection: Option<Detection>) -> Arc<StubDetector> {
    Arc::new(StubDetector { kind, detection })
}

pub fn registry_of(detectors: Vec<Arc<StubDetector>>) -> DetectorRegistry {
    detectors
        .into_iter()
        .fold(DetectorRegistry::builder(), |builder, d| builder.with_detector(d))
        .build()
}

/// Primary detector finding only the two shoulders
pub fn shoulders(left: (f64, f64), right: (f64, f64)) -> Detection {
    Detection::Landmarks(
        LandmarkSet::detected(DetectorKind::Primary)
            .with_landmark(Landmark::detected(LandmarkName::LeftShoulder, left.0, left.1, 0.9))
            .with_landmark(Landmark::detected(LandmarkName::RightShoulder, right.0, right.1, 0.9)),
    )
}

pub fn head_anchor() -> Detection {
    Detection::Anchor(AnchorBox {
        bbox: BoundingBox { x: 300, y: 40, width: 60, height: 40 },
        confidence: 0.6,
    })
}
