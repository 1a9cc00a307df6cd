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

//! Checkpoint store: persists manifests that reference sibling-store
//! items by bare id, and keeps a name index (most-recent id per name,
//! old name freed on rename) plus per-tag lists.

use crate::index::{IdList, MainIndex, NameIndex};
use crate::store_base::StoreBase;
use oracle_core::{ArtifactCategory, OracleError, Result, StorageRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    pub dom_id: Option<String>,
    pub screenshot_id: Option<String>,
    pub console_id: Option<String>,
    pub network_id: Option<String>,
    pub custom_data: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub viewport: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub name: String,
    pub url: String,
    pub timestamp: i64,
    pub state: CheckpointState,
    pub metadata: CheckpointMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub state: Option<CheckpointState>,
    pub metadata: Option<CheckpointMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointQueryFilter {
    pub url: Option<String>,
    pub name: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CheckpointDiff {
    pub differing_state_keys: Vec<String>,
    pub differing_custom_keys: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub deleted_id: String,
    pub sibling_ids: Vec<String>,
}

const NAME_INDEX_FILE: &str = "name_index.json";

fn tag_index_file(tag: &str) -> String {
    format!("tag_index_{tag}.json")
}

pub struct CheckpointStore {
    base: StoreBase,
}

impl CheckpointStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            base: StoreBase::new(base_dir, ArtifactCategory::Checkpoint)?,
        })
    }

    fn manifest_tags(manifest: &CheckpointManifest) -> HashMap<String, String> {
        let mut tags = HashMap::new();
        tags.insert("name".to_string(), manifest.name.clone());
        tags.insert("url".to_string(), manifest.url.clone());
        tags.insert(
            "has_dom".to_string(),
            manifest.state.dom_id.is_some().to_string(),
        );
        tags.insert(
            "has_screenshot".to_string(),
            manifest.state.screenshot_id.is_some().to_string(),
        );
        tags.insert(
            "has_console".to_string(),
            manifest.state.console_id.is_some().to_string(),
        );
        if let Some(dom) = &manifest.state.dom_id {
            tags.insert("dom_id".to_string(), dom.clone());
        }
        if let Some(sc) = &manifest.state.screenshot_id {
            tags.insert("screenshot_id".to_string(), sc.clone());
        }
        if let Some(c) = &manifest.state.console_id {
            tags.insert("console_id".to_string(), c.clone());
        }
        for tag in manifest.metadata.tags.iter().flatten() {
            tags.insert(format!("tag:{tag}"), "true".to_string());
        }
        tags
    }

    pub fn store(&self, manifest: CheckpointManifest) -> Result<StorageRef> {
        let id = self.base.generate_id();
        let path = self.base.item_path(&id, "json");
        let body =
            serde_json::to_vec(&manifest).map_err(|e| OracleError::json("checkpoint_store", e))?;
        let hash = self.base.write_body_atomic(&path, &body)?;

        let tags = Self::manifest_tags(&manifest);
        let ref_ = self
            .base
            .make_ref(id.clone(), path.display().to_string(), body.len() as u64, hash, tags);

        let mut index = MainIndex::load(&self.base)?;
        index.insert(ref_.clone());
        index.save(&self.base)?;

        let mut names = NameIndex::load(&self.base, NAME_INDEX_FILE)?;
        names.set(&manifest.name, id.clone());
        names.save(&self.base, NAME_INDEX_FILE)?;

        for tag in manifest.metadata.tags.iter().flatten() {
            let file = tag_index_file(tag);
            let mut list = IdList::load(&self.base, &file)?;
            list.push(id.clone());
            list.save(&self.base, &file)?;
        }

        tracing::info!(id = %ref_.id, name = %manifest.name, "stored checkpoint manifest");
        Ok(ref_)
    }

    fn load_manifest(&self, ref_: &StorageRef) -> Result<CheckpointManifest> {
        let path = Path::new(&ref_.path);
        let body = self.base.read_body(path)?;
        StoreBase::verify_integrity(path, &ref_.hash, &body)?;
        serde_json::from_slice(&body).map_err(|e| OracleError::json("checkpoint_read", e))
    }

    pub fn retrieve(&self, ref_: &StorageRef) -> Result<CheckpointManifest> {
        self.load_manifest(ref_)
    }

    pub fn update(&self, ref_: &StorageRef, partial: CheckpointUpdate) -> Result<()> {
        let mut manifest = self.load_manifest(ref_)?;
        let old_name = manifest.name.clone();
        let old_tags = manifest.metadata.tags.clone().unwrap_or_default();

        if let Some(name) = partial.name {
            manifest.name = name;
        }
        if let Some(url) = partial.url {
            manifest.url = url;
        }
        if let Some(state) = partial.state {
            if state.dom_id.is_some() {
                manifest.state.dom_id = state.dom_id;
            }
            if state.screenshot_id.is_some() {
                manifest.state.screenshot_id = state.screenshot_id;
            }
            if state.console_id.is_some() {
                manifest.state.console_id = state.console_id;
            }
            if state.network_id.is_some() {
                manifest.state.network_id = state.network_id;
            }
            if state.custom_data.is_some() {
                manifest.state.custom_data = state.custom_data;
            }
        }
        if let Some(metadata) = partial.metadata {
            if metadata.description.is_some() {
                manifest.metadata.description = metadata.description;
            }
            if metadata.tags.is_some() {
                manifest.metadata.tags = metadata.tags;
            }
            if metadata.viewport.is_some() {
                manifest.metadata.viewport = metadata.viewport;
            }
            if metadata.user_agent.is_some() {
                manifest.metadata.user_agent = metadata.user_agent;
            }
        }

        let path = Path::new(&ref_.path);
        let body =
            serde_json::to_vec(&manifest).map_err(|e| OracleError::json("checkpoint_update", e))?;
        let hash = self.base.write_body_atomic(path, &body)?;

        let tags = Self::manifest_tags(&manifest);
        let mut updated_ref = ref_.clone();
        updated_ref.hash = hash;
        updated_ref.size = body.len() as u64;
        updated_ref.tags = tags;

        let mut index = MainIndex::load(&self.base)?;
        index.insert(updated_ref.clone());
        index.save(&self.base)?;

        if manifest.name != old_name {
            let mut names = NameIndex::load(&self.base, NAME_INDEX_FILE)?;
            names.remove_if_owned_by(&old_name, &ref_.id);
            names.set(&manifest.name, ref_.id.clone());
            names.save(&self.base, NAME_INDEX_FILE)?;
        }

        let new_tags = manifest.metadata.tags.clone().unwrap_or_default();
        for tag in &new_tags {
            if !old_tags.contains(tag) {
                let file = tag_index_file(tag);
                let mut list = IdList::load(&self.base, &file)?;
                list.push(ref_.id.clone());
                list.save(&self.base, &file)?;
            }
        }

        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<StorageRef>> {
        let names = NameIndex::load(&self.base, NAME_INDEX_FILE)?;
        let Some(id) = names.get(name) else {
            return Ok(None);
        };
        let index = MainIndex::load(&self.base)?;
        Ok(index.get(id).cloned())
    }

    /// Number of stored manifests, read from the main index alone.
    pub fn count(&self) -> Result<usize> {
        let index = MainIndex::load(&self.base)?;
        Ok(if index.is_empty() { 0 } else { index.len() })
    }

    pub fn query(&self, filter: &CheckpointQueryFilter) -> Result<Vec<StorageRef>> {
        let index = MainIndex::load(&self.base)?;
        let mut refs: Vec<_> = index
            .iter()
            .filter(|r| match &filter.url {
                Some(u) => r.tag("url") == Some(u.as_str()),
                None => true,
            })
            .filter(|r| match &filter.name {
                Some(n) => r.tag("name") == Some(n.as_str()),
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

    pub fn query_by_tag(&self, tag: &str) -> Result<Vec<StorageRef>> {
        let index = MainIndex::load(&self.base)?;
        Ok(IdList::load(&self.base, &tag_index_file(tag))?.resolve(&index))
    }

    pub fn compare(&self, ref1: &StorageRef, ref2: &StorageRef) -> Result<CheckpointDiff> {
        let m1 = self.load_manifest(ref1)?;
        let m2 = self.load_manifest(ref2)?;

        let mut differing_state_keys = Vec::new();
        if m1.state.dom_id != m2.state.dom_id {
            differing_state_keys.push("dom_id".to_string());
        }
        if m1.state.screenshot_id != m2.state.screenshot_id {
            differing_state_keys.push("screenshot_id".to_string());
        }
        if m1.state.console_id != m2.state.console_id {
            differing_state_keys.push("console_id".to_string());
        }
        if m1.state.network_id != m2.state.network_id {
            differing_state_keys.push("network_id".to_string());
        }

        let mut differing_custom_keys = Vec::new();
        let empty = serde_json::Map::new();
        let c1 = m1.state.custom_data.as_ref().and_then(Value::as_object).unwrap_or(&empty);
        let c2 = m2.state.custom_data.as_ref().and_then(Value::as_object).unwrap_or(&empty);
        let mut keys: Vec<&String> = c1.keys().chain(c2.keys()).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            if c1.get(key) != c2.get(key) {
                differing_custom_keys.push(key.clone());
            }
        }

        Ok(CheckpointDiff {
            differing_state_keys,
            differing_custom_keys,
        })
    }

    pub fn clone_checkpoint(&self, ref_: &StorageRef, new_name: &str) -> Result<StorageRef> {
        let mut manifest = self.load_manifest(ref_)?;
        manifest.name = new_name.to_string();
        self.store(manifest)
    }

    pub fn history(&self, url: &str, limit: Option<usize>) -> Result<Vec<StorageRef>> {
        self.query(&CheckpointQueryFilter {
            url: Some(url.to_string()),
            limit,
            ..Default::default()
        })
    }

    pub fn all_tags(&self) -> Result<Vec<String>> {
        let index = MainIndex::load(&self.base)?;
        let mut tags: Vec<String> = index
            .iter()
            .flat_map(|r| r.tags.keys())
            .filter_map(|k| k.strip_prefix("tag:").map(str::to_string))
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    /// Drop stale entries from the name index and every tag index
    /// (lazy GC, callable from the manager's `cleanup()`).
    pub fn compact(&self) -> Result<()> {
        let main = MainIndex::load(&self.base)?;

        let mut names = NameIndex::load(&self.base, NAME_INDEX_FILE)?;
        names.compact(&main);
        names.save(&self.base, NAME_INDEX_FILE)?;

        for tag in self.all_tags()? {
            let file = tag_index_file(&tag);
            let mut list = IdList::load(&self.base, &file)?;
            list.compact(&main);
            list.save(&self.base, &file)?;
        }
        Ok(())
    }

    pub fn delete(&self, ref_: &StorageRef, delete_related_data: bool) -> Result<DeleteOutcome> {
        let sibling_ids = if delete_related_data {
            let manifest = self.load_manifest(ref_)?;
            [
                manifest.state.dom_id,
                manifest.state.screenshot_id,
                manifest.state.console_id,
                manifest.state.network_id,
            ]
            .into_iter()
            .flatten()
            .collect()
        } else {
            Vec::new()
        };

        let path = Path::new(&ref_.path);
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| OracleError::io("checkpoint_delete", e))?;
        }

        let mut index = MainIndex::load(&self.base)?;
        index.remove(&ref_.id);
        index.save(&self.base)?;

        Ok(DeleteOutcome {
            deleted_id: ref_.id.clone(),
            sibling_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> CheckpointManifest {
        CheckpointManifest {
            name: name.to_string(),
            url: "https://example.test".to_string(),
            timestamp: 1,
            state: CheckpointState::default(),
            metadata: CheckpointMetadata::default(),
        }
    }

    #[test]
    fn rename_frees_the_old_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let ref_ = store.store(manifest("home")).unwrap();

        store
            .update(
                &ref_,
                CheckpointUpdate {
                    name: Some("landing".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(store.get_by_name("landing").unwrap().is_some());
        assert!(store.get_by_name("home").unwrap().is_none());
    }

    #[test]
    fn get_by_name_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let ref_ = store.store(manifest("home")).unwrap();
        let found = store.get_by_name("home").unwrap().unwrap();
        assert_eq!(found.id, ref_.id);
    }

    #[test]
    fn compare_finds_differing_state_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut m1 = manifest("a");
        m1.state.dom_id = Some("dom1".to_string());
        let mut m2 = manifest("b");
        m2.state.dom_id = Some("dom2".to_string());

        let r1 = store.store(m1).unwrap();
        let r2 = store.store(m2).unwrap();
        let diff = store.compare(&r1, &r2).unwrap();
        assert!(diff.differing_state_keys.contains(&"dom_id".to_string()));
    }

    #[test]
    fn clone_checkpoint_creates_new_entry_with_new_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let ref_ = store.store(manifest("home")).unwrap();
        let cloned = store.clone_checkpoint(&ref_, "home-copy").unwrap();
        assert_ne!(cloned.id, ref_.id);
        assert!(store.get_by_name("home-copy").unwrap().is_some());
        assert!(store.get_by_name("home").unwrap().is_some());
    }

    #[test]
    fn query_by_tag_resolves_tagged_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut m = manifest("tagged");
        m.metadata.tags = Some(vec!["release".to_string()]);
        store.store(m).unwrap();

        let results = store.query_by_tag("release").unwrap();
        assert_eq!(results.len(), 1);
    }
}
