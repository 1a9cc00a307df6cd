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

//! Screenshot store: persists images, generates thumbnails, converts
//! formats, and compares same-size images pixel-for-pixel.

use crate::index::{FingerprintIndex, MainIndex};
use crate::store_base::StoreBase;
use image::{DynamicImage, ImageFormat};
use oracle_core::{ArtifactCategory, OracleError, Result, StorageRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenshotMetadata {
    pub url: Option<String>,
    pub viewport: Option<String>,
    pub device_scale_factor: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormatKind {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormatKind {
    fn extension(self) -> &'static str {
        match self {
            ImageFormatKind::Png => "png",
            ImageFormatKind::Jpeg => "jpeg",
            ImageFormatKind::Webp => "webp",
        }
    }

    fn to_image_format(self) -> ImageFormat {
        match self {
            ImageFormatKind::Png => ImageFormat::Png,
            ImageFormatKind::Jpeg => ImageFormat::Jpeg,
            ImageFormatKind::Webp => ImageFormat::WebP,
        }
    }

    fn from_image_format(fmt: ImageFormat) -> Self {
        match fmt {
            ImageFormat::Jpeg => ImageFormatKind::Jpeg,
            ImageFormat::WebP => ImageFormatKind::Webp,
            _ => ImageFormatKind::Png,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompareOptions {
    pub threshold: Option<f64>,
    pub include_aa: bool,
    pub include_diff_image: bool,
}

#[derive(Debug, Clone)]
pub struct DiffSummary {
    pub diff_percentage: f64,
    pub different_pixels: u64,
    pub total_pixels: u64,
    /// Present only when the caller requested `include_diff_image` and
    /// has not yet persisted it; the manager clears this once it has
    /// stored the bytes and populated `diff_ref`.
    pub diff_image: Option<Vec<u8>>,
    /// Populated by `StorageManager::compare_screenshots` once the diff
    /// image has been persisted as a `visual_diff` artifact.
    pub diff_ref: Option<StorageRef>,
}

#[derive(Debug, Clone, Default)]
pub struct ScreenshotQueryFilter {
    pub url: Option<String>,
    pub limit: Option<usize>,
}

pub struct ScreenshotStore {
    base: StoreBase,
    thumbnail_width: u32,
    thumbnail_height: u32,
    quality: u8,
}

impl ScreenshotStore {
    pub fn new(
        base_dir: impl AsRef<Path>,
        thumbnail_width: u32,
        thumbnail_height: u32,
        quality: u8,
    ) -> Result<Self> {
        Ok(Self {
            base: StoreBase::new(base_dir, ArtifactCategory::Screenshot)?,
            thumbnail_width,
            thumbnail_height,
            quality,
        })
    }

    pub fn store(
        &self,
        bytes: &[u8],
        metadata: Option<ScreenshotMetadata>,
    ) -> Result<StorageRef> {
        let fingerprint = StoreBase::fingerprint(bytes);
        let mut fingerprints = FingerprintIndex::load(&self.base)?;
        if let Some(existing_id) = fingerprints.get(&fingerprint) {
            let main = MainIndex::load(&self.base)?;
            if let Some(existing) = main.get(existing_id) {
                tracing::info!(id = %existing.id, "screenshot content already stored, reusing");
                return Ok(existing.clone());
            }
        }

        let img = decode(bytes)?;
        let format = guess_format(bytes)?;
        let (width, height) = (img.width(), img.height());

        let id = self.base.generate_id();
        let path = self.base.item_path(&id, format.extension());
        let hash = self.base.write_body_atomic(&path, bytes)?;

        let thumb_bytes = self.render_thumbnail(&img, format)?;
        let thumb_id = self.base.generate_id();
        let thumb_path = self.base.item_path(&thumb_id, format.extension());
        let thumb_hash = self.base.write_body_atomic(&thumb_path, &thumb_bytes)?;

        let metadata = metadata.unwrap_or_default();
        let mut tags = HashMap::new();
        if let Some(u) = &metadata.url {
            tags.insert("url".to_string(), u.clone());
        }
        tags.insert("width".to_string(), width.to_string());
        tags.insert("height".to_string(), height.to_string());
        tags.insert("format".to_string(), format.extension().to_string());
        tags.insert("thumbnail_id".to_string(), thumb_id.clone());

        let ref_ = self.base.make_ref(
            id.clone(),
            path.display().to_string(),
            bytes.len() as u64,
            hash,
            tags,
        );

        let thumb_ref = self.base.make_ref(
            thumb_id,
            thumb_path.display().to_string(),
            thumb_bytes.len() as u64,
            thumb_hash,
            HashMap::new(),
        );

        let mut index = MainIndex::load(&self.base)?;
        index.insert(ref_.clone());
        index.insert(thumb_ref);
        index.save(&self.base)?;

        fingerprints.set(fingerprint, ref_.id.clone());
        fingerprints.save(&self.base)?;

        tracing::info!(id = %ref_.id, width, height, format = format.extension(), "stored screenshot");
        Ok(ref_)
    }

    fn render_thumbnail(&self, img: &DynamicImage, format: ImageFormatKind) -> Result<Vec<u8>> {
        let thumb = img.resize(
            self.thumbnail_width,
            self.thumbnail_height,
            image::imageops::FilterType::Lanczos3,
        );
        encode(&thumb, format, self.quality)
    }

    pub fn retrieve(&self, ref_: &StorageRef) -> Result<Vec<u8>> {
        let path = Path::new(&ref_.path);
        let body = self.base.read_body(path)?;
        StoreBase::verify_integrity(path, &ref_.hash, &body)?;
        Ok(body)
    }

    /// Look up a previously stored ref by id, without loading its payload.
    pub fn find(&self, id: &str) -> Result<Option<StorageRef>> {
        Ok(MainIndex::load(&self.base)?.get(id).cloned())
    }

    pub fn retrieve_thumbnail(&self, ref_: &StorageRef) -> Result<Vec<u8>> {
        let thumb_id = ref_
            .tag("thumbnail_id")
            .ok_or_else(|| OracleError::not_found("thumbnail", ref_.id.clone()))?;
        let index = MainIndex::load(&self.base)?;
        let thumb_ref = index
            .get(thumb_id)
            .cloned()
            .ok_or_else(|| OracleError::not_found("thumbnail", thumb_id.to_string()))?;
        self.retrieve(&thumb_ref)
    }

    pub fn compare(
        &self,
        ref1: &StorageRef,
        ref2: &StorageRef,
        opts: &CompareOptions,
    ) -> Result<DiffSummary> {
        let w1: u32 = ref1.tag("width").and_then(|v| v.parse().ok()).unwrap_or(0);
        let h1: u32 = ref1.tag("height").and_then(|v| v.parse().ok()).unwrap_or(0);
        let w2: u32 = ref2.tag("width").and_then(|v| v.parse().ok()).unwrap_or(0);
        let h2: u32 = ref2.tag("height").and_then(|v| v.parse().ok()).unwrap_or(0);

        if (w1, h1) != (w2, h2) {
            return Err(OracleError::DimensionMismatch {
                left_w: w1,
                left_h: h1,
                right_w: w2,
                right_h: h2,
            });
        }

        let bytes1 = self.retrieve(ref1)?;
        let bytes2 = self.retrieve(ref2)?;

        let engine = oracle_visual::VisualDiffEngine::new();
        let result = engine.compare(
            &bytes1,
            &bytes2,
            &oracle_visual::CompareOptions {
                threshold: opts.threshold,
                include_aa: opts.include_aa,
                include_diff_image: opts.include_diff_image,
                ..Default::default()
            },
        )?;

        Ok(DiffSummary {
            diff_percentage: result.diff_percentage,
            different_pixels: result.different_pixels,
            total_pixels: result.total_pixels,
            diff_image: result.diff_image,
            diff_ref: None,
        })
    }

    pub fn resize(&self, ref_: &StorageRef, width: u32, height: Option<u32>) -> Result<Vec<u8>> {
        let bytes = self.retrieve(ref_)?;
        let img = decode(&bytes)?;
        let format = guess_format(&bytes)?;

        let target_w = width.min(img.width());
        let target_h = height.unwrap_or_else(|| {
            ((target_w as f64 / img.width() as f64) * img.height() as f64).round() as u32
        }).min(img.height());

        let resized = img.resize(target_w, target_h, image::imageops::FilterType::Lanczos3);
        encode(&resized, format, self.quality)
    }

    pub fn convert(&self, ref_: &StorageRef, format: ImageFormatKind) -> Result<Vec<u8>> {
        let bytes = self.retrieve(ref_)?;
        let img = decode(&bytes)?;
        encode(&img, format, self.quality)
    }

    pub fn query(&self, filter: &ScreenshotQueryFilter) -> Result<Vec<StorageRef>> {
        let index = MainIndex::load(&self.base)?;
        let mut refs: Vec<_> = index
            .iter()
            .filter(|r| r.tag("thumbnail_id").is_none() || r.tag("width").is_some())
            .filter(|r| match &filter.url {
                Some(u) => r.tag("url") == Some(u.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        refs.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        if let Some(limit) = filter.limit {
            refs.truncate(limit);
        }
        Ok(refs)
    }

    /// Removes a screenshot, its thumbnail, and both main-index entries.
    /// Used by the manager's `cleanup()` to recover orphaned screenshot
    /// artifacts left behind by a failed `capture_checkpoint`.
    pub fn delete(&self, ref_: &StorageRef) -> Result<()> {
        let mut index = MainIndex::load(&self.base)?;

        if let Some(thumb_id) = ref_.tag("thumbnail_id").map(str::to_string) {
            if let Some(thumb_ref) = index.get(&thumb_id).cloned() {
                let thumb_path = Path::new(&thumb_ref.path);
                if thumb_path.exists() {
                    std::fs::remove_file(thumb_path)
                        .map_err(|e| OracleError::io("screenshot_delete_thumbnail", e))?;
                }
            }
            index.remove(&thumb_id);
        }

        let path = Path::new(&ref_.path);
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| OracleError::io("screenshot_delete", e))?;
        }
        index.remove(&ref_.id);
        index.save(&self.base)?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|e| OracleError::invalid_payload("decode_screenshot", e.to_string()))
}

fn guess_format(bytes: &[u8]) -> Result<ImageFormatKind> {
    let fmt = image::guess_format(bytes)
        .map_err(|e| OracleError::invalid_payload("guess_format", e.to_string()))?;
    Ok(ImageFormatKind::from_image_format(fmt))
}

fn encode(img: &DynamicImage, format: ImageFormatKind, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        ImageFormatKind::Jpeg => {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            img.write_with_encoder(encoder)
                .map_err(|e| OracleError::invalid_payload("encode_jpeg", e.to_string()))?;
        }
        other => {
            img.write_to(&mut buf, other.to_image_format())
                .map_err(|e| OracleError::invalid_payload("encode_image", e.to_string()))?;
        }
    }
    Ok(buf.into_inner())
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
    fn store_generates_thumbnail_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path(), 32, 24, 80).unwrap();
        let png = solid_png(100, 100, [255, 0, 0]);
        let ref_ = store.store(&png, None).unwrap();
        assert_eq!(ref_.tag("width"), Some("100"));
        assert!(ref_.tag("thumbnail_id").is_some());

        let thumb = store.retrieve_thumbnail(&ref_).unwrap();
        let thumb_img = decode(&thumb).unwrap();
        assert!(thumb_img.width() <= 32);
        assert!(thumb_img.height() <= 24);
    }

    #[test]
    fn identical_screenshots_compare_equal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path(), 32, 24, 80).unwrap();
        let png = solid_png(100, 100, [255, 0, 0]);
        let r1 = store.store(&png, None).unwrap();
        let r2 = store.store(&png, None).unwrap();
        let summary = store.compare(&r1, &r2, &CompareOptions::default()).unwrap();
        assert_eq!(summary.diff_percentage, 0.0);
        assert_eq!(summary.different_pixels, 0);
    }

    #[test]
    fn red_vs_blue_screenshots_differ_mostly() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path(), 32, 24, 80).unwrap();
        let red = store.store(&solid_png(50, 50, [255, 0, 0]), None).unwrap();
        let blue = store.store(&solid_png(50, 50, [0, 0, 255]), None).unwrap();
        let summary = store.compare(&red, &blue, &CompareOptions::default()).unwrap();
        assert!(summary.diff_percentage > 90.0);
    }

    #[test]
    fn mismatched_dimensions_are_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path(), 32, 24, 80).unwrap();
        let a = store.store(&solid_png(100, 100, [1, 1, 1]), None).unwrap();
        let b = store.store(&solid_png(50, 50, [1, 1, 1]), None).unwrap();
        let err = store.compare(&a, &b, &CompareOptions::default()).unwrap_err();
        assert!(matches!(err, OracleError::DimensionMismatch { .. }));
    }

    #[test]
    fn storing_identical_bytes_twice_reuses_the_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path(), 32, 24, 80).unwrap();
        let png = solid_png(60, 60, [10, 20, 30]);
        let r1 = store.store(&png, None).unwrap();
        let r2 = store.store(&png, None).unwrap();
        assert_eq!(r1.id, r2.id);
    }

    #[test]
    fn delete_removes_image_thumbnail_and_index_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path(), 32, 24, 80).unwrap();
        let ref_ = store.store(&solid_png(50, 50, [1, 2, 3]), None).unwrap();
        let thumb_id = ref_.tag("thumbnail_id").unwrap().to_string();

        store.delete(&ref_).unwrap();

        assert!(store.find(&ref_.id).unwrap().is_none());
        assert!(store.find(&thumb_id).unwrap().is_none());
        assert!(store.retrieve(&ref_).is_err());
    }

    #[test]
    fn resize_never_enlarges() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path(), 32, 24, 80).unwrap();
        let ref_ = store.store(&solid_png(50, 50, [1, 2, 3]), None).unwrap();
        let resized = store.resize(&ref_, 200, Some(200)).unwrap();
        let img = decode(&resized).unwrap();
        assert!(img.width() <= 50);
        assert!(img.height() <= 50);
    }
}
