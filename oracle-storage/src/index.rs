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

//! The main index (id -> summary `StorageRef`) every store maintains,
//! plus a generic id-list helper for secondary indexes (per-level,
//! has-errors, per-tag, name). `query()` reads only these files, never
//! a payload.

use crate::store_base::StoreBase;
use oracle_core::{Result, StorageRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MAIN_INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainIndex {
    entries: HashMap<String, StorageRef>,
}

impl MainIndex {
    pub fn load(base: &StoreBase) -> Result<Self> {
        base.read_json(&base.index_path(MAIN_INDEX_FILE))
    }

    pub fn save(&self, base: &StoreBase) -> Result<()> {
        base.write_json_atomic(&base.index_path(MAIN_INDEX_FILE), self)
    }

    pub fn insert(&mut self, ref_: StorageRef) {
        self.entries.insert(ref_.id.clone(), ref_);
    }

    pub fn remove(&mut self, id: &str) -> Option<StorageRef> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&StorageRef> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StorageRef> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A list of ids backing a secondary index (per-level, has-errors,
/// per-tag, ...). Grows on write; `resolve` filters out ids whose
/// backing manifest/item no longer exists in `main` — lazy GC per §9.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdList {
    ids: Vec<String>,
}

impl IdList {
    pub fn load(base: &StoreBase, name: &str) -> Result<Self> {
        base.read_json(&base.index_path(name))
    }

    pub fn save(&self, base: &StoreBase, name: &str) -> Result<()> {
        base.write_json_atomic(&base.index_path(name), self)
    }

    pub fn push(&mut self, id: String) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    /// Ids still present in `main`, most recent first.
    pub fn resolve(&self, main: &MainIndex) -> Vec<StorageRef> {
        let mut refs: Vec<_> = self
            .ids
            .iter()
            .filter_map(|id| main.get(id).cloned())
            .collect();
        refs.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        refs
    }

    /// Drop ids no longer present in `main` (called from `cleanup()`).
    pub fn compact(&mut self, main: &MainIndex) {
        self.ids.retain(|id| main.get(id).is_some());
    }
}

/// A fingerprint (BLAKE3 hex) -> id map used to dedup byte-identical
/// payloads on store without paying for a SHA-256 pass twice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintIndex {
    by_fingerprint: HashMap<String, String>,
}

impl FingerprintIndex {
    pub fn load(base: &StoreBase) -> Result<Self> {
        base.read_json(&base.index_path(FINGERPRINT_INDEX_FILE))
    }

    pub fn save(&self, base: &StoreBase) -> Result<()> {
        base.write_json_atomic(&base.index_path(FINGERPRINT_INDEX_FILE), self)
    }

    pub fn get(&self, fingerprint: &str) -> Option<&str> {
        self.by_fingerprint.get(fingerprint).map(String::as_str)
    }

    pub fn set(&mut self, fingerprint: String, id: String) {
        self.by_fingerprint.insert(fingerprint, id);
    }
}

const FINGERPRINT_INDEX_FILE: &str = "fingerprints.json";

/// A name -> id map where a later `insert` for the same name displaces
/// the previous owner (§9 open question: the old name is freed, not
/// reassigned).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameIndex {
    by_name: HashMap<String, String>,
}

impl NameIndex {
    pub fn load(base: &StoreBase, file: &str) -> Result<Self> {
        base.read_json(&base.index_path(file))
    }

    pub fn save(&self, base: &StoreBase, file: &str) -> Result<()> {
        base.write_json_atomic(&base.index_path(file), self)
    }

    pub fn set(&mut self, name: &str, id: String) {
        self.by_name.insert(name.to_string(), id);
    }

    pub fn remove_name(&mut self, name: &str) {
        self.by_name.remove(name);
    }

    /// Remove `name` from the index only if it currently points at `id`
    /// (used when renaming away from `name` so we don't clobber a
    /// different manifest that has since claimed it).
    pub fn remove_if_owned_by(&mut self, name: &str, id: &str) {
        if self.by_name.get(name).map(String::as_str) == Some(id) {
            self.by_name.remove(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    /// Drop names whose id no longer resolves in `main`.
    pub fn compact(&mut self, main: &MainIndex) {
        let stale: Vec<String> = self
            .by_name
            .iter()
            .filter(|(_, id)| main.get(id).is_none())
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            self.remove_name(&name);
        }
    }
}
