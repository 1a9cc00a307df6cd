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

//! Resolves a `MaskRegion` (pixels or percent-of-dimension) against a
//! concrete image size, clamping to bounds, and grays out the result.

use crate::{MaskRegion, RegionCoord};
use image::{Rgba, RgbaImage};

#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

fn resolve_coord(coord: &RegionCoord, dimension: u32) -> i64 {
    match coord {
        RegionCoord::Pixels(v) => *v,
        RegionCoord::Percent(s) => {
            let pct: f64 = s.trim_end_matches('%').parse().unwrap_or(0.0);
            ((pct / 100.0) * dimension as f64).round() as i64
        }
    }
}

pub fn resolve(region: &MaskRegion, width: u32, height: u32) -> Region {
    let x = resolve_coord(&region.x, width).clamp(0, width as i64) as u32;
    let y = resolve_coord(&region.y, height).clamp(0, height as i64) as u32;
    let raw_w = resolve_coord(&region.width, width).max(0) as u32;
    let raw_h = resolve_coord(&region.height, height).max(0) as u32;
    let w = raw_w.min(width.saturating_sub(x));
    let h = raw_h.min(height.saturating_sub(y));
    Region {
        x,
        y,
        width: w,
        height: h,
    }
}

pub fn mask_gray(img: &mut RgbaImage, rect: Region) {
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            img.put_pixel(x, y, Rgba([128, 128, 128, 255]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_region_resolves_relative_to_dimensions() {
        let region = MaskRegion {
            x: RegionCoord::Percent("50%".into()),
            y: RegionCoord::Percent("0%".into()),
            width: RegionCoord::Percent("25%".into()),
            height: RegionCoord::Percent("100%".into()),
        };
        let rect = resolve(&region, 200, 100);
        assert_eq!(rect.x, 100);
        assert_eq!(rect.y, 0);
        assert_eq!(rect.width, 50);
        assert_eq!(rect.height, 100);
    }

    #[test]
    fn out_of_bounds_region_is_clamped() {
        let region = MaskRegion {
            x: RegionCoord::Pixels(90),
            y: RegionCoord::Pixels(90),
            width: RegionCoord::Pixels(50),
            height: RegionCoord::Pixels(50),
        };
        let rect = resolve(&region, 100, 100);
        assert_eq!(rect.x, 90);
        assert_eq!(rect.width, 10);
        assert_eq!(rect.height, 10);
    }

    #[test]
    fn mask_gray_overwrites_pixels_in_rect() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        mask_gray(&mut img, Region { x: 1, y: 1, width: 2, height: 2 });
        assert_eq!(*img.get_pixel(1, 1), Rgba([128, 128, 128, 255]));
        assert_eq!(*img.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
    }
}
