use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use std::collections::HashMap;

use crate::models::BoundingBox;

/// Connected foreground region of a binary mask
#[derive(Debug, Clone)]
pub struct Region {
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
    /// Pixels lying on the image border
    pub border_pixels: u32,
}

impl Region {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> u32 {
        self.pixel_count
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            x: self.min_x,
            y: self.min_y,
            width: self.width(),
            height: self.height(),
        }
    }

    /// Share of the bounding box actually covered by the region
    pub fn fill_ratio(&self) -> f32 {
        let box_area = (self.width() * self.height()) as f32;
        if box_area == 0.0 {
            return 0.0;
        }
        self.pixel_count as f32 / box_area
    }
}

pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Label connected components of a binary mask (non-zero = foreground) and
/// collect per-region statistics, dropping regions smaller than `min_area`
pub fn find_regions(mask: &GrayImage, min_area: u32) -> (LabelImage, Vec<Region>) {
    let labeled = connected_components(mask, Connectivity::Eight, Luma([0]));
    let (width, height) = mask.dimensions();

    let mut regions: HashMap<u32, Region> = HashMap::new();
    for (x, y, label) in labeled.enumerate_pixels() {
        let label_val = label[0];
        if label_val == 0 {
            continue; // Skip background
        }
        let on_border = x == 0 || y == 0 || x + 1 == width || y + 1 == height;

        regions
            .entry(label_val)
            .and_modify(|r| {
                r.min_x = r.min_x.min(x);
                r.min_y = r.min_y.min(y);
                r.max_x = r.max_x.max(x);
                r.max_y = r.max_y.max(y);
                r.pixel_count += 1;
                r.border_pixels += u32::from(on_border);
            })
            .or_insert(Region {
                label: label_val,
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixel_count: 1,
                border_pixels: u32::from(on_border),
            });
    }

    let mut regions: Vec<Region> = regions
        .into_values()
        .filter(|r| r.pixel_count >= min_area)
        .collect();
    // largest first, label as tie-break keeps the order deterministic
    regions.sort_by(|a, b| b.pixel_count.cmp(&a.pixel_count).then(a.label.cmp(&b.label)));
    (labeled, regions)
}
