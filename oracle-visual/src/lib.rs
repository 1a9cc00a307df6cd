// Copyright 2025 Smoke Test Oracle Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Pixel-accurate visual diffing, independent of any artifact store.
//! Operates purely on decoded image bytes: region masking, a
//! YIQ-delta pixelmatch comparator, diff-image rendering, and
//! significant-region analysis.

mod pixelmatch;
mod region;

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use oracle_core::{OracleError, Result};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

pub use region::Region;

/// A rectangle expressed either in pixels or as a percentage of the
/// image's width/height (e.g. `"25%"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRegion {
    pub x: RegionCoord,
    pub y: RegionCoord,
    pub width: RegionCoord,
    pub height: RegionCoord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionCoord {
    Pixels(i64),
    Percent(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiffColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Default for DiffColor {
    fn default() -> Self {
        Self { r: 255, g: 0, b: 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompareOptions {
    pub threshold: Option<f64>,
    pub include_aa: bool,
    pub include_diff_image: bool,
    pub diff_color: DiffColor,
    pub exclude_regions: Vec<MaskRegion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificantRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub diff_percentage: f64,
}

#[derive(Debug, Clone)]
pub struct DiffResult {
    pub diff_percentage: f64,
    pub different_pixels: u64,
    pub total_pixels: u64,
    pub diff_image: Option<Vec<u8>>,
    pub diff_bounds: Option<Bounds>,
    pub significant_regions: Vec<SignificantRegion>,
}

const DEFAULT_THRESHOLD: f64 = 0.1;
const SIGNIFICANT_CELL: u32 = 50;
const SIGNIFICANT_CELL_MIN_DIFF_PCT: f64 = 5.0;

pub struct VisualDiffEngine;

impl VisualDiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compare two raw, format-tagged images. Dimension mismatches are
    /// resolved here (unlike `ScreenshotStore::compare`, which treats
    /// them as a hard error) by resizing `current` to `baseline`'s
    /// size with an exact (possibly distorting) fit.
    pub fn compare(
        &self,
        baseline: &[u8],
        current: &[u8],
        opts: &CompareOptions,
    ) -> Result<DiffResult> {
        let baseline_img = decode(baseline)?;
        let mut current_img = decode(current)?;

        if baseline_img.dimensions() != current_img.dimensions() {
            let (w, h) = baseline_img.dimensions();
            current_img = current_img.resize_exact(w, h, image::imageops::FilterType::Lanczos3);
        }

        let (width, height) = baseline_img.dimensions();
        let mut base_rgba = baseline_img.to_rgba8();
        let mut curr_rgba = current_img.to_rgba8();

        for region in &opts.exclude_regions {
            let rect = region::resolve(region, width, height);
            region::mask_gray(&mut base_rgba, rect);
            region::mask_gray(&mut curr_rgba, rect);
        }

        let threshold = opts.threshold.unwrap_or(DEFAULT_THRESHOLD);
        let pixelmatch::PixelmatchResult {
            different_pixels,
            diff_mask,
        } = pixelmatch::compare(&base_rgba, &curr_rgba, threshold, opts.include_aa);

        let total_pixels = (width as u64) * (height as u64);
        let diff_percentage = if total_pixels == 0 {
            0.0
        } else {
            (different_pixels as f64 / total_pixels as f64) * 100.0
        };

        let diff_image = if opts.include_diff_image {
            Some(render_diff_image(width, height, &diff_mask, opts.diff_color)?)
        } else {
            None
        };

        let diff_bounds = compute_bounds(width, height, &diff_mask);
        let significant_regions = compute_significant_regions(width, height, &diff_mask);

        Ok(DiffResult {
            diff_percentage,
            different_pixels: different_pixels as u64,
            total_pixels,
            diff_image,
            diff_bounds,
            significant_regions,
        })
    }
}

impl Default for VisualDiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|e| OracleError::invalid_payload("decode_image", e.to_string()))
}

fn render_diff_image(
    width: u32,
    height: u32,
    diff_mask: &[bool],
    color: DiffColor,
) -> Result<Vec<u8>> {
    let mut img = RgbaImage::new(width, height);
    for (i, pixel) in img.pixels_mut().enumerate() {
        *pixel = if diff_mask[i] {
            Rgba([color.r, color.g, color.b, 255])
        } else {
            Rgba([0, 0, 0, 0])
        };
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| OracleError::invalid_payload("encode_diff_image", e.to_string()))?;
    Ok(buf.into_inner())
}

fn compute_bounds(width: u32, height: u32, diff_mask: &[bool]) -> Option<Bounds> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0u32, 0u32);
    let mut any = false;

    for y in 0..height {
        for x in 0..width {
            if diff_mask[(y * width + x) as usize] {
                any = true;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }

    if !any {
        return None;
    }
    Some(Bounds {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

fn compute_significant_regions(
    width: u32,
    height: u32,
    diff_mask: &[bool],
) -> Vec<SignificantRegion> {
    let mut regions = Vec::new();
    let mut y = 0;
    while y < height {
        let cell_h = SIGNIFICANT_CELL.min(height - y);
        let mut x = 0;
        while x < width {
            let cell_w = SIGNIFICANT_CELL.min(width - x);
            let mut diff_count = 0u64;
            for cy in y..y + cell_h {
                for cx in x..x + cell_w {
                    if diff_mask[(cy * width + cx) as usize] {
                        diff_count += 1;
                    }
                }
            }
            let total = (cell_w as u64) * (cell_h as u64);
            let pct = if total == 0 {
                0.0
            } else {
                (diff_count as f64 / total as f64) * 100.0
            };
            if pct > SIGNIFICANT_CELL_MIN_DIFF_PCT {
                regions.push(SignificantRegion {
                    x,
                    y,
                    width: cell_w,
                    height: cell_h,
                    diff_percentage: pct,
                });
            }
            x += SIGNIFICANT_CELL;
        }
        y += SIGNIFICANT_CELL;
    }
    regions.sort_by(|a, b| b.diff_percentage.partial_cmp(&a.diff_percentage).unwrap());
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid_png(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_fn(w, h, |_, _| Rgb(rgb));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn identical_images_have_zero_diff() {
        let img = solid_png(100, 100, [255, 0, 0]);
        let engine = VisualDiffEngine::new();
        let result = engine.compare(&img, &img, &CompareOptions::default()).unwrap();
        assert_eq!(result.diff_percentage, 0.0);
        assert_eq!(result.different_pixels, 0);
    }

    #[test]
    fn red_vs_blue_is_mostly_different() {
        let red = solid_png(100, 100, [255, 0, 0]);
        let blue = solid_png(100, 100, [0, 0, 255]);
        let engine = VisualDiffEngine::new();
        let result = engine.compare(&red, &blue, &CompareOptions::default()).unwrap();
        assert!(result.diff_percentage > 90.0);
    }

    #[test]
    fn mismatched_dimensions_are_resized_not_rejected() {
        let a = solid_png(100, 100, [10, 10, 10]);
        let b = solid_png(50, 50, [10, 10, 10]);
        let engine = VisualDiffEngine::new();
        let result = engine.compare(&a, &b, &CompareOptions::default()).unwrap();
        assert_eq!(result.diff_percentage, 0.0);
    }

    #[test]
    fn exclude_regions_suppress_diffs_in_that_rect() {
        let red = RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]));
        let mut blue = RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]));
        for x in 0..5 {
            for y in 0..5 {
                blue.put_pixel(x, y, Rgba([0, 0, 255, 255]));
            }
        }
        let mut buf_a = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(red)
            .write_to(&mut buf_a, ImageFormat::Png)
            .unwrap();
        let mut buf_b = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(blue)
            .write_to(&mut buf_b, ImageFormat::Png)
            .unwrap();

        let opts = CompareOptions {
            exclude_regions: vec![MaskRegion {
                x: RegionCoord::Pixels(0),
                y: RegionCoord::Pixels(0),
                width: RegionCoord::Pixels(5),
                height: RegionCoord::Pixels(5),
            }],
            ..Default::default()
        };
        let engine = VisualDiffEngine::new();
        let result = engine
            .compare(&buf_a.into_inner(), &buf_b.into_inner(), &opts)
            .unwrap();
        assert_eq!(result.diff_percentage, 0.0);
    }

    #[test]
    fn significant_regions_are_sorted_descending() {
        let mut img = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        for x in 0..50 {
            for y in 0..50 {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let mut buf_black = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255])))
            .write_to(&mut buf_black, ImageFormat::Png)
            .unwrap();
        let mut buf_mixed = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf_mixed, ImageFormat::Png)
            .unwrap();

        let engine = VisualDiffEngine::new();
        let result = engine
            .compare(&buf_black.into_inner(), &buf_mixed.into_inner(), &CompareOptions::default())
            .unwrap();
        assert!(!result.significant_regions.is_empty());
        for w in result.significant_regions.windows(2) {
            assert!(w[0].diff_percentage >= w[1].diff_percentage);
        }
    }
}
