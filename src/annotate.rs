use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::measurement;
use crate::models::{LandmarkSet, Origin};

const DETECTED: Rgb<u8> = Rgb([0, 200, 0]);
const ESTIMATED: Rgb<u8> = Rgb([255, 140, 0]);
const MEASURE_LINE: Rgb<u8> = Rgb([30, 144, 255]);

/// Copy of `image` with the landmark set and measurement segments drawn on it.
/// Estimated sets get an orange frame so they are never mistaken for detections.
pub fn annotate(image: &DynamicImage, landmarks: &LandmarkSet) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();
    let radius = ((width.max(height) as f32 / 200.0).round() as i32).max(2);

    for spec in measurement::catalog() {
        let (Some(a), Some(b)) = (landmarks.get(spec.landmarks[0]), landmarks.get(spec.landmarks[1])) else {
            continue;
        };
        draw_line_segment_mut(&mut canvas, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), MEASURE_LINE);
    }

    for landmark in landmarks.iter() {
        let color = match landmark.origin {
            Origin::Detected => DETECTED,
            Origin::Estimated => ESTIMATED,
        };
        let center = (landmark.x.round() as i32, landmark.y.round() as i32);
        draw_filled_circle_mut(&mut canvas, center, radius, color);
    }

    if landmarks.origin == Origin::Estimated && width > 2 && height > 2 {
        for inset in 0..radius.min(width as i32 / 2).min(height as i32 / 2) {
            let rect = Rect::at(inset, inset).of_size(width - 2 * inset as u32, height - 2 * inset as u32);
            draw_hollow_rect_mut(&mut canvas, rect, ESTIMATED);
        }
    }
    canvas
}
