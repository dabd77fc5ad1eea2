use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;

use crate::models::{QualityReport, clamp_unit};

// Reference ranges used to normalise quality terms to [0, 1]
const SHARPNESS_REFERENCE: f64 = 500.0;
const CONTRAST_REFERENCE: f64 = 50.0;
const EDGE_DENSITY_REFERENCE: f64 = 0.1;
const NOISE_REFERENCE: f64 = 100.0;

const CLAHE_GRID: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 3.0;

/// Thresholds deciding whether adaptive enhancement kicks in
#[derive(Debug, Clone, Copy)]
pub struct EnhanceThresholds {
    pub low_contrast: f64,
    pub blur: f64,
}

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Apply Gaussian blur to reduce noise
pub fn apply_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    gaussian_blur_f32(img, sigma)
}

/// Detect edges using Canny edge detector
pub fn detect_edges(img: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    canny(img, low_threshold, high_threshold)
}

/// Mean and standard deviation of intensities
pub fn intensity_stats(gray: &GrayImage) -> (f64, f64) {
    let n = (gray.width() as u64 * gray.height() as u64) as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let (sum, sum_sq) = gray.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Variance of the 4-neighbour Laplacian response over interior pixels
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }
    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let response = px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }
    let n = ((width - 2) * (height - 2)) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Variance of the residual between the image and a smoothed copy
pub fn noise_variance(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let smoothed = apply_blur(gray, 1.0);
    let n = (gray.width() as u64 * gray.height() as u64) as f64;
    let (sum, sum_sq) = gray
        .pixels()
        .zip(smoothed.pixels())
        .fold((0.0f64, 0.0f64), |(s, sq), (a, b)| {
            let r = a[0] as f64 - b[0] as f64;
            (s + r, sq + r * r)
        });
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Fraction of Canny edge pixels
pub fn edge_density(gray: &GrayImage) -> f64 {
    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return 0.0;
    }
    let edges = detect_edges(gray, 50.0, 150.0);
    let count = edges.pixels().filter(|p| p[0] > 0).count();
    count as f64 / total as f64
}

/// Score brightness, contrast, sharpness and noise into one composite
pub fn assess_quality(img: &DynamicImage) -> QualityReport {
    let gray = to_grayscale(img);
    let (brightness, contrast) = intensity_stats(&gray);
    let sharpness = laplacian_variance(&gray);
    let noise = noise_variance(&gray);
    let edge_density = edge_density(&gray);

    let sharpness_norm = (sharpness / SHARPNESS_REFERENCE).min(1.0);
    let contrast_norm = (contrast / CONTRAST_REFERENCE).min(1.0);
    // optimal around mid-grey
    let brightness_norm = 1.0 - (brightness - 128.0).abs() / 128.0;
    let edge_norm = (edge_density / EDGE_DENSITY_REFERENCE).min(1.0);
    let noise_norm = (noise / NOISE_REFERENCE).min(1.0);

    let score = 0.30 * sharpness_norm
        + 0.25 * contrast_norm
        + 0.20 * clamp_unit(brightness_norm)
        + 0.15 * edge_norm
        + 0.10 * (1.0 - noise_norm);

    QualityReport {
        brightness,
        contrast,
        sharpness,
        noise,
        edge_density,
        score: clamp_unit(score),
    }
}

/// Adaptive enhancement: contrast boost when flat, sharpening when blurry.
/// Returns the new image and the names of the operations applied.
pub fn enhance(img: &DynamicImage, thresholds: EnhanceThresholds) -> (DynamicImage, Vec<&'static str>) {
    let gray = to_grayscale(img);
    let (_, contrast) = intensity_stats(&gray);
    let sharpness = laplacian_variance(&gray);

    let mut applied = Vec::new();
    let mut rgb = img.to_rgb8();
    if contrast < thresholds.low_contrast {
        rgb = boost_contrast(&rgb);
        applied.push("contrast");
    }
    if sharpness < thresholds.blur {
        rgb = sharpen(&rgb);
        applied.push("sharpen");
    }
    if applied.is_empty() {
        return (img.clone(), applied);
    }
    (DynamicImage::ImageRgb8(rgb), applied)
}

/// Unconditional contrast boost used by the detection retry
pub fn enhance_for_detection(img: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageRgb8(boost_contrast(&img.to_rgb8()))
}

/// Uniform downscale so the longer side is at most `max_dimension`
pub fn normalize(img: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    let longest = width.max(height);
    if longest <= max_dimension || max_dimension == 0 {
        return img.clone();
    }
    let scale = max_dimension as f64 / longest as f64;
    let new_w = ((width as f64 * scale).round() as u32).clamp(1, max_dimension);
    let new_h = ((height as f64 * scale).round() as u32).clamp(1, max_dimension);
    img.resize_exact(new_w, new_h, FilterType::Lanczos3)
}

/// Contrast-limited adaptive histogram equalisation on luma; the luma delta is
/// added back to every channel so hue is roughly preserved
pub fn boost_contrast(rgb: &RgbImage) -> RgbImage {
    let luma = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        Luma([luma_of(p)])
    });
    let equalized = clahe(&luma, CLAHE_GRID, CLAHE_CLIP_LIMIT);

    RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        let delta = equalized.get_pixel(x, y)[0] as i32 - luma.get_pixel(x, y)[0] as i32;
        Rgb([
            (p[0] as i32 + delta).clamp(0, 255) as u8,
            (p[1] as i32 + delta).clamp(0, 255) as u8,
            (p[2] as i32 + delta).clamp(0, 255) as u8,
        ])
    })
}

fn luma_of(p: &Rgb<u8>) -> u8 {
    (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32).round() as u8
}

fn clahe(gray: &GrayImage, grid: u32, clip_limit: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    // recompute tile counts so no tile is empty
    let tile_w = width.div_ceil(grid.min(width));
    let tile_h = height.div_ceil(grid.min(height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let count = (x1 - x0) * (y1 - y0);

            // clip and redistribute the excess uniformly
            let limit = ((clip_limit * count as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let share = excess / 256;
            let remainder = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += share + u32::from(i < remainder);
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (value, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[value] = ((cdf as f32 * 255.0 / count as f32).round()).min(255.0) as u8;
            }
        }
    }

    // bilinear blend between the four nearest tile mappings
    let axis = |pos: u32, tile: u32, tiles: u32| {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let i0 = f.floor().clamp(0.0, (tiles - 1) as f32) as u32;
        let i1 = (i0 + 1).min(tiles - 1);
        let t = (f - i0 as f32).clamp(0.0, 1.0);
        (i0, i1, t)
    };

    GrayImage::from_fn(width, height, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;
        let (x0, x1, ax) = axis(x, tile_w, tiles_x);
        let (y0, y1, ay) = axis(y, tile_h, tiles_y);
        let m = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;
        let top = m(x0, y0) * (1.0 - ax) + m(x1, y0) * ax;
        let bottom = m(x0, y1) * (1.0 - ax) + m(x1, y1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// 3x3 sharpening: centre weight 9, neighbours -1. Border pixels are copied.
pub fn sharpen(rgb: &RgbImage) -> RgbImage {
    let (width, height) = rgb.dimensions();
    let mut sharpened = rgb.clone();
    if width < 3 || height < 3 {
        return sharpened;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut out = [0u8; 3];
            for (c, slot) in out.iter_mut().enumerate() {
                let mut neighbours = 0.0f32;
                for dy in 0..3 {
                    for dx in 0..3 {
                        if dx == 1 && dy == 1 {
                            continue;
                        }
                        neighbours += rgb.get_pixel(x + dx - 1, y + dy - 1)[c] as f32;
                    }
                }
                let center = rgb.get_pixel(x, y)[c] as f32;
                *slot = (9.0 * center - neighbours).clamp(0.0, 255.0) as u8;
            }
            sharpened.put_pixel(x, y, Rgb(out));
        }
    }

    sharpened
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(size: u32, cell: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |x, y| {
            if (x / cell + y / cell) % 2 == 0 { Rgb([230, 230, 230]) } else { Rgb([25, 25, 25]) }
        }))
    }

    fn flat(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value; 3])))
    }

    #[test]
    fn test_quality_prefers_detailed_images() {
        let detailed = assess_quality(&checkerboard(64, 4));
        let blank = assess_quality(&flat(64, 64, 128));
        assert!(detailed.score > blank.score);
        assert!(detailed.contrast > 50.0);
        assert_eq!(blank.contrast, 0.0);
        assert_eq!(blank.sharpness, 0.0);
        assert!((0.0..=1.0).contains(&detailed.score));
        assert!((0.0..=1.0).contains(&blank.score));
    }

    #[test]
    fn test_enhance_leaves_good_images_alone() {
        let img = checkerboard(64, 2);
        let thresholds = EnhanceThresholds { low_contrast: 30.0, blur: 100.0 };
        let (out, applied) = enhance(&img, thresholds);
        assert!(applied.is_empty());
        assert_eq!(out.to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn test_enhance_boosts_low_contrast_stripes() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(256, 256, |x, _| {
            let v = if (x / 4) % 2 == 0 { 100 } else { 110 };
            Rgb([v, v, v])
        }));
        let thresholds = EnhanceThresholds { low_contrast: 30.0, blur: 100.0 };
        let (out, applied) = enhance(&img, thresholds);
        assert!(applied.contains(&"contrast"));
        let (_, before) = intensity_stats(&img.to_luma8());
        let (_, after) = intensity_stats(&out.to_luma8());
        assert!(after > before);
    }

    #[test]
    fn test_normalize_preserves_aspect() {
        let out = normalize(&flat(4000, 2000, 10), 1000);
        assert_eq!((out.width(), out.height()), (1000, 500));

        let small = normalize(&flat(300, 200, 10), 1000);
        assert_eq!((small.width(), small.height()), (300, 200));
    }

    #[test]
    fn test_sharpen_keeps_flat_regions() {
        let img = RgbImage::from_pixel(10, 10, Rgb([80, 80, 80]));
        assert_eq!(sharpen(&img), img);
    }
}
