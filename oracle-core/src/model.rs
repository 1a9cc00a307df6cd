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

//! Shared data model: artifact categories and the content-addressed
//! [`StorageRef`] every store returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The five kinds of artifact this engine persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactCategory {
    Screenshot,
    Html,
    Console,
    VisualDiff,
    Checkpoint,
}

impl ArtifactCategory {
    /// Directory namespace this category is stored under.
    pub fn namespace(self) -> &'static str {
        match self {
            ArtifactCategory::Screenshot => "screenshots",
            ArtifactCategory::Html => "dom",
            ArtifactCategory::Console => "console",
            ArtifactCategory::VisualDiff => "visual_diff",
            ArtifactCategory::Checkpoint => "checkpoints",
        }
    }
}

impl std::fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.namespace())
    }
}

/// A stable pointer to a stored artifact. Never carries payload bytes —
/// `serde_json::to_string(&ref)` must stay well under 4KB for any item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    pub id: String,
    pub category: ArtifactCategory,
    /// Opaque locator. Callers must not parse this to derive `id`.
    pub path: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the stored body.
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub compressed: bool,
    /// Scalar-only summary attributes. Never holds payload data.
    pub tags: HashMap<String, String>,
}

impl StorageRef {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}
