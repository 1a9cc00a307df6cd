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

//! Visual diff store: persists the overlay image `VisualDiffEngine`
//! produces when a comparison is run with `include_diff_image`. A plain
//! content store — no thumbnails, no dedup — written by the manager
//! once it has bytes back from the engine.

use crate::index::MainIndex;
use crate::store_base::StoreBase;
use oracle_core::{ArtifactCategory, Result, StorageRef};
use std::collections::HashMap;
use std::path::Path;

pub struct VisualDiffStore {
    base: StoreBase,
}

impl VisualDiffStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            base: StoreBase::new(base_dir, ArtifactCategory::VisualDiff)?,
        })
    }

    pub fn store(&self, bytes: &[u8]) -> Result<StorageRef> {
        let id = self.base.generate_id();
        let path = self.base.item_path(&id, "png");
        let hash = self.base.write_body_atomic(&path, bytes)?;

        let ref_ = self
            .base
            .make_ref(id, path.display().to_string(), bytes.len() as u64, hash, HashMap::new());

        let mut index = MainIndex::load(&self.base)?;
        index.insert(ref_.clone());
        index.save(&self.base)?;

        tracing::info!(id = %ref_.id, "stored visual diff image");
        Ok(ref_)
    }

    pub fn retrieve(&self, ref_: &StorageRef) -> Result<Vec<u8>> {
        let path = Path::new(&ref_.path);
        let body = self.base.read_body(path)?;
        StoreBase::verify_integrity(path, &ref_.hash, &body)?;
        Ok(body)
    }

    /// Number of stored diff images, read from the main index alone.
    pub fn count(&self) -> Result<usize> {
        let index = MainIndex::load(&self.base)?;
        Ok(if index.is_empty() { 0 } else { index.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_retrieve_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = VisualDiffStore::new(dir.path()).unwrap();
        let ref_ = store.store(b"fake png bytes").unwrap();
        assert_eq!(ref_.category, ArtifactCategory::VisualDiff);
        let body = store.retrieve(&ref_).unwrap();
        assert_eq!(body, b"fake png bytes");
        assert_eq!(store.count().unwrap(), 1);
    }
}
