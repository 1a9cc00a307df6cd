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

//! Engine configuration, with `ORACLE_*` environment variable overrides
//! for zero-config deployment.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_DOM_CHUNK_SIZE: usize = 75;
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 320;
pub const DEFAULT_THUMBNAIL_HEIGHT: u32 = 240;
pub const DEFAULT_QUALITY: u8 = 80;

/// Top-level configuration for the storage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub base_dir: PathBuf,
    pub dom_chunk_size: usize,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub quality: u8,
}

impl OracleConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            dom_chunk_size: DEFAULT_DOM_CHUNK_SIZE,
            thumbnail_width: DEFAULT_THUMBNAIL_WIDTH,
            thumbnail_height: DEFAULT_THUMBNAIL_HEIGHT,
            quality: DEFAULT_QUALITY,
        }
    }

    /// Build a config from `base_dir`, applying `ORACLE_*` env overrides.
    pub fn from_env(base_dir: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::new(base_dir);

        if let Ok(v) = env::var("ORACLE_BASE_DIR") {
            cfg.base_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parsed("ORACLE_DOM_CHUNK_SIZE") {
            cfg.dom_chunk_size = v;
        }
        if let Some(v) = env_parsed("ORACLE_THUMBNAIL_WIDTH") {
            cfg.thumbnail_width = v;
        }
        if let Some(v) = env_parsed("ORACLE_THUMBNAIL_HEIGHT") {
            cfg.thumbnail_height = v;
        }
        if let Some(v) = env_parsed("ORACLE_QUALITY") {
            cfg.quality = v;
        }

        cfg
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Install a `tracing` subscriber honoring `ORACLE_LOG` (default `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = env::var("ORACLE_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .try_init();
}
