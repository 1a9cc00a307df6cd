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

//! `StorageManager`: the single composing entry point over the four
//! artifact stores. Capture/load a whole checkpoint in one call;
//! delegate everything else to the store it concerns.

use chrono::Utc;
use oracle_core::{OracleError, OracleConfig, Result, StorageRef};
use oracle_storage::checkpoint_store::{
    CheckpointManifest, CheckpointMetadata, CheckpointState,
};
use oracle_storage::console_store::ConsoleEntry;
use oracle_storage::{CheckpointStore, ConsoleStore, DomStore, ScreenshotStore, VisualDiffStore};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

pub struct CaptureRequest {
    pub name: String,
    pub url: String,
    pub html: Option<String>,
    pub screenshot: Option<Vec<u8>>,
    pub console_logs: Option<Vec<ConsoleEntry>>,
    pub metadata: Option<CheckpointMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedCheckpoint {
    pub manifest: Option<CheckpointManifest>,
    pub html: Option<String>,
    pub screenshot: Option<Vec<u8>>,
    pub console_logs: Option<Vec<ConsoleEntry>>,
}

#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub total_size: u64,
    pub dom_count: usize,
    pub screenshot_count: usize,
    pub console_count: usize,
    pub checkpoint_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Dom,
    Screenshot,
    Console,
    Checkpoint,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    pub kinds: Option<Vec<ArtifactKind>>,
    pub max_age_secs: Option<u64>,
    pub keep_last: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOutcome {
    pub deleted: usize,
    pub freed_space: u64,
}

/// Owns the four stores and the shared base directory. Construction is
/// cheap; `initialize()` creates the on-disk layout and is safe to call
/// more than once.
pub struct StorageManager {
    base_dir: PathBuf,
    dom: Arc<DomStore>,
    screenshots: Arc<ScreenshotStore>,
    console: Arc<ConsoleStore>,
    checkpoints: Arc<CheckpointStore>,
    visual_diffs: Arc<VisualDiffStore>,
    initialized: AtomicBool,
}

impl StorageManager {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let base_dir = config.base_dir.clone();
        Ok(Self {
            dom: Arc::new(DomStore::new(&base_dir, config.dom_chunk_size)?),
            screenshots: Arc::new(ScreenshotStore::new(
                &base_dir,
                config.thumbnail_width,
                config.thumbnail_height,
                config.quality,
            )?),
            console: Arc::new(ConsoleStore::new(&base_dir)?),
            checkpoints: Arc::new(CheckpointStore::new(&base_dir)?),
            visual_diffs: Arc::new(VisualDiffStore::new(&base_dir)?),
            base_dir,
            initialized: AtomicBool::new(false),
        })
    }

    /// Idempotent: each store already creates its own directory on
    /// construction, so this only flips the flag other methods can use
    /// to assert readiness.
    pub fn initialize(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(base_dir = %self.base_dir.display(), "storage manager initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn dom(&self) -> &DomStore {
        &self.dom
    }

    pub fn screenshots(&self) -> &ScreenshotStore {
        &self.screenshots
    }

    pub fn console(&self) -> &ConsoleStore {
        &self.console
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn dom_handle(&self) -> Arc<DomStore> {
        self.dom.clone()
    }

    pub fn screenshots_handle(&self) -> Arc<ScreenshotStore> {
        self.screenshots.clone()
    }

    pub fn console_handle(&self) -> Arc<ConsoleStore> {
        self.console.clone()
    }

    pub fn checkpoints_handle(&self) -> Arc<CheckpointStore> {
        self.checkpoints.clone()
    }

    pub fn store_dom(&self, html: &str) -> Result<StorageRef> {
        self.dom.store(html, None)
    }

    pub fn retrieve_dom(&self, ref_: &StorageRef) -> Result<String> {
        self.dom.retrieve(ref_)
    }

    pub fn store_screenshot(&self, bytes: &[u8]) -> Result<StorageRef> {
        self.screenshots.store(bytes, None)
    }

    pub fn retrieve_screenshot(&self, ref_: &StorageRef) -> Result<Vec<u8>> {
        self.screenshots.retrieve(ref_)
    }

    /// Compares two screenshots. When `opts.include_diff_image` is set,
    /// the overlay image is persisted as a `visual_diff` artifact and
    /// its ref is returned on `DiffSummary::diff_ref`, with the raw
    /// bytes dropped from the result.
    pub fn compare_screenshots(
        &self,
        ref1: &StorageRef,
        ref2: &StorageRef,
        opts: &oracle_storage::screenshot_store::CompareOptions,
    ) -> Result<oracle_storage::screenshot_store::DiffSummary> {
        let mut summary = self.screenshots.compare(ref1, ref2, opts)?;
        if let Some(bytes) = summary.diff_image.take() {
            summary.diff_ref = Some(self.visual_diffs.store(&bytes)?);
        }
        Ok(summary)
    }

    pub fn store_console(&self, entries: Vec<ConsoleEntry>) -> Result<StorageRef> {
        self.console.store(entries, None)
    }

    pub fn retrieve_console(&self, ref_: &StorageRef) -> Result<Vec<ConsoleEntry>> {
        self.console.retrieve(ref_)
    }

    pub fn capture_checkpoint(&self, req: CaptureRequest) -> Result<StorageRef> {
        let dom_id = req
            .html
            .as_deref()
            .map(|html| self.dom.store(html, None))
            .transpose()?
            .map(|r| r.id);

        let screenshot_id = req
            .screenshot
            .as_deref()
            .map(|bytes| self.screenshots.store(bytes, None))
            .transpose()?
            .map(|r| r.id);

        let console_id = req
            .console_logs
            .map(|entries| self.console.store(entries, None))
            .transpose()?
            .map(|r| r.id);

        let manifest = CheckpointManifest {
            name: req.name,
            url: req.url,
            timestamp: now_unix(),
            state: CheckpointState {
                dom_id,
                screenshot_id,
                console_id,
                network_id: None,
                custom_data: None,
            },
            metadata: req.metadata.unwrap_or_default(),
        };

        self.checkpoints.store(manifest)
    }

    pub fn load_checkpoint(&self, ref_: &StorageRef) -> Result<LoadedCheckpoint> {
        let manifest = self.checkpoints.retrieve(ref_)?;

        let html = manifest
            .state
            .dom_id
            .as_deref()
            .and_then(|id| self.dom.find(id).ok().flatten())
            .and_then(|r| self.dom.retrieve(&r).ok());

        let screenshot = manifest
            .state
            .screenshot_id
            .as_deref()
            .and_then(|id| self.screenshots.find(id).ok().flatten())
            .and_then(|r| self.screenshots.retrieve(&r).ok());

        let console_logs = manifest
            .state
            .console_id
            .as_deref()
            .and_then(|id| self.console.find(id).ok().flatten())
            .and_then(|r| self.console.retrieve(&r).ok());

        Ok(LoadedCheckpoint {
            manifest: Some(manifest),
            html,
            screenshot,
            console_logs,
        })
    }

    pub fn stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        for namespace in ["dom", "screenshots", "console", "checkpoints", "visual_diff"] {
            let dir = self.base_dir.join(namespace);
            if !dir.exists() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    stats.total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
        }
        stats.dom_count = self.dom.count()?;
        stats.screenshot_count = self.screenshots.query(&Default::default())?.len();
        stats.console_count = self.console.count()?;
        stats.checkpoint_count = self.checkpoints.count()?;
        Ok(stats)
    }

    pub fn cleanup(&self, opts: &CleanupOptions) -> Result<CleanupOutcome> {
        let kinds = opts
            .kinds
            .clone()
            .unwrap_or_else(|| vec![ArtifactKind::Dom, ArtifactKind::Screenshot, ArtifactKind::Console, ArtifactKind::Checkpoint]);

        let mut outcome = CleanupOutcome::default();
        let cutoff = opts.max_age_secs.map(|age| Utc::now() - chrono::Duration::seconds(age as i64));

        if kinds.contains(&ArtifactKind::Checkpoint) {
            let mut refs = self.checkpoints.query(&Default::default())?;
            refs.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
            let stale = select_stale(&refs, cutoff, opts.keep_last);
            for r in stale {
                outcome.freed_space += r.size;
                self.checkpoints.delete(&r, false)?;
                outcome.deleted += 1;
            }
            self.checkpoints.compact()?;
        }
        if kinds.contains(&ArtifactKind::Dom) {
            let refs = self.dom.query(&Default::default())?;
            let stale = select_stale(&refs, cutoff, opts.keep_last);
            for r in stale {
                outcome.freed_space += r.size;
                self.dom.delete(&r)?;
                outcome.deleted += 1;
            }
        }
        if kinds.contains(&ArtifactKind::Screenshot) {
            let refs = self.screenshots.query(&Default::default())?;
            let stale = select_stale(&refs, cutoff, opts.keep_last);
            for r in stale {
                outcome.freed_space += r.size;
                self.screenshots.delete(&r)?;
                outcome.deleted += 1;
            }
        }
        if kinds.contains(&ArtifactKind::Console) {
            self.console.compact()?;
        }

        Ok(outcome)
    }

    pub fn export(&self, dest: impl AsRef<Path>) -> Result<()> {
        let options = fs_extra::dir::CopyOptions::new().overwrite(true).copy_inside(true);
        fs_extra::dir::copy(&self.base_dir, dest.as_ref(), &options)
            .map_err(|e| OracleError::invalid_payload("export", e.to_string()))?;
        Ok(())
    }

    pub fn import(&self, src: impl AsRef<Path>, merge: bool) -> Result<()> {
        if !merge && self.base_dir.exists() {
            std::fs::remove_dir_all(&self.base_dir).map_err(|e| OracleError::io("import_clear", e))?;
        }
        std::fs::create_dir_all(&self.base_dir).map_err(|e| OracleError::io("import_mkdir", e))?;
        let options = fs_extra::dir::CopyOptions::new().overwrite(true).content_only(true);
        fs_extra::dir::copy(src.as_ref(), &self.base_dir, &options)
            .map_err(|e| OracleError::invalid_payload("import", e.to_string()))?;
        self.initialized.store(false, Ordering::SeqCst);
        self.initialize()
    }
}

fn select_stale(refs: &[StorageRef], cutoff: Option<chrono::DateTime<Utc>>, keep_last: usize) -> Vec<StorageRef> {
    refs.iter()
        .skip(keep_last)
        .filter(|r| cutoff.map(|c| r.timestamp < c).unwrap_or(true))
        .cloned()
        .collect()
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, StorageManager) {
        let dir = tempfile::tempdir().unwrap();
        let config = OracleConfig::new(dir.path());
        let manager = StorageManager::new(&config).unwrap();
        manager.initialize().unwrap();
        (dir, manager)
    }

    #[test]
    fn capture_and_load_roundtrips_all_three_payloads() {
        let (_dir, manager) = manager();
        let req = CaptureRequest {
            name: "home".to_string(),
            url: "u".to_string(),
            html: Some("<html><body><p>hi</p></body></html>".to_string()),
            screenshot: Some(solid_png()),
            console_logs: Some(vec![ConsoleEntry {
                timestamp: 1,
                level: oracle_storage::console_store::Level::Log,
                message: "start".to_string(),
                source: None,
                stack_trace: None,
            }]),
            metadata: None,
        };

        let ref_ = manager.capture_checkpoint(req).unwrap();
        assert_eq!(manager.checkpoints().get_by_name("home").unwrap().unwrap().id, ref_.id);

        let loaded = manager.load_checkpoint(&ref_).unwrap();
        assert!(loaded.html.unwrap().contains("<p>hi</p>"));
        assert!(loaded.screenshot.is_some());
        assert_eq!(loaded.console_logs.unwrap().len(), 1);
    }

    #[test]
    fn stats_reflect_stored_artifacts() {
        let (_dir, manager) = manager();
        manager.store_dom("<html><body><p>a</p></body></html>").unwrap();
        let stats = manager.stats().unwrap();
        assert_eq!(stats.dom_count, 1);
        assert!(stats.total_size > 0);
    }

    #[test]
    fn cleanup_recovers_orphaned_dom_and_screenshot_artifacts() {
        let (_dir, manager) = manager();
        manager.store_dom("<html><body><p>a</p></body></html>").unwrap();
        manager.store_screenshot(&solid_png()).unwrap();
        assert_eq!(manager.stats().unwrap().dom_count, 1);

        let outcome = manager
            .cleanup(&CleanupOptions {
                kinds: Some(vec![ArtifactKind::Dom, ArtifactKind::Screenshot]),
                max_age_secs: None,
                keep_last: 0,
            })
            .unwrap();

        // one dom artifact plus the screenshot's main and thumbnail entries
        assert_eq!(outcome.deleted, 3);
        assert_eq!(manager.stats().unwrap().dom_count, 0);
        assert_eq!(manager.stats().unwrap().screenshot_count, 0);
    }

    fn solid_png() -> Vec<u8> {
        use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
        use std::io::Cursor;
        let img: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_fn(10, 10, |_, _| Rgb([1, 2, 3]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }
}
