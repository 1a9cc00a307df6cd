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

//! Perceptual pixel comparator: converts each pixel to YIQ and flags a
//! difference when the luma-weighted delta exceeds the threshold,
//! matching the classic pixelmatch algorithm's sensitivity curve
//! rather than a raw RGB distance.

use image::RgbaImage;

pub struct PixelmatchResult {
    pub different_pixels: usize,
    pub diff_mask: Vec<bool>,
}

/// Maximum possible YIQ delta between two colors, used to normalize
/// `threshold` (0.0-1.0) into an absolute cutoff.
const MAX_YIQ_DELTA: f64 = 35215.0;

pub fn compare(base: &RgbaImage, curr: &RgbaImage, threshold: f64, include_aa: bool) -> PixelmatchResult {
    let (width, height) = base.dimensions();
    let max_delta = MAX_YIQ_DELTA * threshold.clamp(0.0, 1.0) * threshold.clamp(0.0, 1.0);

    let mut diff_mask = vec![false; (width * height) as usize];
    let mut different_pixels = 0;

    for y in 0..height {
        for x in 0..width {
            let a = base.get_pixel(x, y);
            let b = curr.get_pixel(x, y);
            let delta = color_delta(a.0, b.0);

            let is_different = delta > max_delta
                && (include_aa || !is_antialiased(base, curr, x, y, width, height));

            if is_different {
                diff_mask[(y * width + x) as usize] = true;
                different_pixels += 1;
            }
        }
    }

    PixelmatchResult {
        different_pixels,
        diff_mask,
    }
}

fn rgb_to_yiq(rgba: [u8; 4]) -> (f64, f64, f64, f64) {
    let a = rgba[3] as f64 / 255.0;
    let r = rgba[0] as f64;
    let g = rgba[1] as f64;
    let b = rgba[2] as f64;
    let y = r * 0.29889531 + g * 0.58662247 + b * 0.11448223;
    let i = r * 0.59597799 - g * 0.27417610 - b * 0.32180189;
    let q = r * 0.21147017 - g * 0.52261711 + b * 0.31114694;
    (y, i, q, a)
}

fn color_delta(a: [u8; 4], b: [u8; 4]) -> f64 {
    let (y1, i1, q1, a1) = rgb_to_yiq(a);
    let (y2, i2, q2, a2) = rgb_to_yiq(b);
    // Blend toward white by alpha so fully/partially transparent
    // pixels compare against the background rather than raw channels.
    let a1n = a1;
    let a2n = a2;
    let dy = y1 * a1n - y2 * a2n;
    let di = i1 * a1n - i2 * a2n;
    let dq = q1 * a1n - q2 * a2n;
    0.5053 * dy * dy + 0.299 * di * di + 0.1957 * dq * dq
}

/// Heuristic: a pixel is part of anti-aliasing if at least one of its
/// 8 neighbors in `base` is identical to it in `curr`'s corresponding
/// neighbor brightness range, common in pixelmatch-style comparators.
fn is_antialiased(base: &RgbaImage, curr: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> bool {
    let x0 = x.saturating_sub(1);
    let y0 = y.saturating_sub(1);
    let x1 = (x + 1).min(width - 1);
    let y1 = (y + 1).min(height - 1);

    let center = base.get_pixel(x, y).0;
    let mut has_bright_neighbor = false;
    let mut has_dark_neighbor = false;

    for ny in y0..=y1 {
        for nx in x0..=x1 {
            if nx == x && ny == y {
                continue;
            }
            let neighbor = curr.get_pixel(nx, ny).0;
            let (cy, ..) = rgb_to_yiq(center);
            let (ny_, ..) = rgb_to_yiq(neighbor);
            if ny_ > cy {
                has_bright_neighbor = true;
            } else if ny_ < cy {
                has_dark_neighbor = true;
            }
        }
    }

    has_bright_neighbor && has_dark_neighbor
}
