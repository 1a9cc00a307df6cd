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

//! Console store: persists a browser's console-log stream and keeps
//! per-level, has-errors, and has-warnings secondary indexes so
//! `query()`/`query_by_level()` never touch a payload file.

use crate::index::{IdList, MainIndex};
use crate::store_base::StoreBase;
use oracle_core::{ArtifactCategory, OracleError, Result, StorageRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Log => "log",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleSource {
    pub url: Option<String>,
    pub line: Option<u32>,
    pub col: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub timestamp: i64,
    pub level: Level,
    pub message: String,
    pub source: Option<ConsoleSource>,
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleMetadata {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleSummary {
    pub total: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub by_level: HashMap<String, usize>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsoleCollection {
    entries: Vec<ConsoleEntry>,
    summary: ConsoleSummary,
}

#[derive(Debug, Clone, Default)]
pub struct ConsoleQueryFilter {
    pub level: Option<Vec<Level>>,
    pub search_text: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
    pub has_errors: Option<bool>,
    pub has_warnings: Option<bool>,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub storage_ref: StorageRef,
    pub entry: ConsoleEntry,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalConsoleStats {
    pub total_collections: usize,
    pub total_entries: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
}

fn summarize(entries: &[ConsoleEntry]) -> ConsoleSummary {
    let mut by_level: HashMap<String, usize> = HashMap::new();
    let mut error_count = 0;
    let mut warning_count = 0;
    for e in entries {
        *by_level.entry(e.level.as_str().to_string()).or_insert(0) += 1;
        match e.level {
            Level::Error => error_count += 1,
            Level::Warn => warning_count += 1,
            _ => {}
        }
    }
    ConsoleSummary {
        total: entries.len(),
        error_count,
        warning_count,
        by_level,
        start_time: entries.iter().map(|e| e.timestamp).min(),
        end_time: entries.iter().map(|e| e.timestamp).max(),
    }
}

const HAS_ERRORS_FILE: &str = "has_errors.json";
const HAS_WARNINGS_FILE: &str = "has_warnings.json";

fn level_index_file(level: Level) -> String {
    format!("level_index_{}.json", level.as_str())
}

pub struct ConsoleStore {
    base: StoreBase,
}

impl ConsoleStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            base: StoreBase::new(base_dir, ArtifactCategory::Console)?,
        })
    }

    pub fn store(
        &self,
        entries: Vec<ConsoleEntry>,
        metadata: Option<ConsoleMetadata>,
    ) -> Result<StorageRef> {
        let summary = summarize(&entries);
        let collection = ConsoleCollection {
            entries,
            summary: summary.clone(),
        };

        let id = self.base.generate_id();
        let path = self.base.item_path(&id, "json");
        let body = serde_json::to_vec(&collection)
            .map_err(|e| OracleError::json("console_store", e))?;
        let hash = self.base.write_body_atomic(&path, &body)?;

        let metadata = metadata.unwrap_or_default();
        let mut tags = HashMap::new();
        if let Some(u) = &metadata.url {
            tags.insert("url".to_string(), u.clone());
        }
        tags.insert("total".to_string(), summary.total.to_string());
        tags.insert("error_count".to_string(), summary.error_count.to_string());
        tags.insert("warning_count".to_string(), summary.warning_count.to_string());
        if let Some(start) = summary.start_time {
            tags.insert("start_time".to_string(), start.to_string());
        }
        if let Some(end) = summary.end_time {
            tags.insert("end_time".to_string(), end.to_string());
        }
        let levels_tag = [Level::Log, Level::Info, Level::Warn, Level::Error, Level::Debug]
            .into_iter()
            .filter(|l| collection.entries.iter().any(|e| e.level == *l))
            .map(Level::as_str)
            .collect::<Vec<_>>()
            .join(",");
        tags.insert("levels".to_string(), levels_tag);

        let ref_ = self
            .base
            .make_ref(id.clone(), path.display().to_string(), body.len() as u64, hash, tags);

        let mut index = MainIndex::load(&self.base)?;
        index.insert(ref_.clone());
        index.save(&self.base)?;

        let levels_present: Vec<Level> = [Level::Log, Level::Info, Level::Warn, Level::Error, Level::Debug]
            .into_iter()
            .filter(|l| collection.entries.iter().any(|e| e.level == *l))
            .collect();
        for level in levels_present {
            let file = level_index_file(level);
            let mut list = IdList::load(&self.base, &file)?;
            list.push(id.clone());
            list.save(&self.base, &file)?;
        }
        if summary.error_count > 0 {
            let mut list = IdList::load(&self.base, HAS_ERRORS_FILE)?;
            list.push(id.clone());
            list.save(&self.base, HAS_ERRORS_FILE)?;
        }
        if summary.warning_count > 0 {
            let mut list = IdList::load(&self.base, HAS_WARNINGS_FILE)?;
            list.push(id.clone());
            list.save(&self.base, HAS_WARNINGS_FILE)?;
        }

        tracing::info!(id = %ref_.id, total = summary.total, errors = summary.error_count, "stored console collection");
        Ok(ref_)
    }

    fn load_collection(&self, ref_: &StorageRef) -> Result<ConsoleCollection> {
        let path = Path::new(&ref_.path);
        let body = self.base.read_body(path)?;
        StoreBase::verify_integrity(path, &ref_.hash, &body)?;
        serde_json::from_slice(&body).map_err(|e| OracleError::json("console_read", e))
    }

    pub fn retrieve(&self, ref_: &StorageRef) -> Result<Vec<ConsoleEntry>> {
        Ok(self.load_collection(ref_)?.entries)
    }

    /// Look up a previously stored ref by id, without loading its payload.
    pub fn find(&self, id: &str) -> Result<Option<StorageRef>> {
        Ok(MainIndex::load(&self.base)?.get(id).cloned())
    }

    pub fn retrieve_filtered(&self, ref_: &StorageRef, filter: &ConsoleQueryFilter) -> Result<Vec<ConsoleEntry>> {
        let entries = self.retrieve(ref_)?;
        Ok(entries.into_iter().filter(|e| entry_matches(e, filter)).collect())
    }

    pub fn errors(&self, ref_: &StorageRef) -> Result<Vec<ConsoleEntry>> {
        Ok(self
            .retrieve(ref_)?
            .into_iter()
            .filter(|e| e.level == Level::Error)
            .collect())
    }

    pub fn warnings(&self, ref_: &StorageRef) -> Result<Vec<ConsoleEntry>> {
        Ok(self
            .retrieve(ref_)?
            .into_iter()
            .filter(|e| e.level == Level::Warn)
            .collect())
    }

    pub fn summary(&self, ref_: &StorageRef) -> Result<ConsoleSummary> {
        Ok(self.load_collection(ref_)?.summary)
    }

    /// Number of stored collections, read from the main index alone.
    pub fn count(&self) -> Result<usize> {
        let index = MainIndex::load(&self.base)?;
        Ok(if index.is_empty() { 0 } else { index.len() })
    }

    /// Resolves `filter` against the main index and secondary indexes
    /// only, never reading a payload. Every field combines (AND), not
    /// just the most recently added one.
    pub fn query(&self, filter: &ConsoleQueryFilter) -> Result<Vec<StorageRef>> {
        let index = MainIndex::load(&self.base)?;
        let mut candidates: Vec<StorageRef> = {
            let mut all: Vec<_> = index.iter().cloned().collect();
            all.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
            all
        };

        if filter.has_errors == Some(true) {
            let allowed = IdList::load(&self.base, HAS_ERRORS_FILE)?.resolve(&index);
            retain_in(&mut candidates, &allowed);
        } else if filter.has_errors == Some(false) {
            let excluded = IdList::load(&self.base, HAS_ERRORS_FILE)?.resolve(&index);
            remove_in(&mut candidates, &excluded);
        }
        if filter.has_warnings == Some(true) {
            let allowed = IdList::load(&self.base, HAS_WARNINGS_FILE)?.resolve(&index);
            retain_in(&mut candidates, &allowed);
        } else if filter.has_warnings == Some(false) {
            let excluded = IdList::load(&self.base, HAS_WARNINGS_FILE)?.resolve(&index);
            remove_in(&mut candidates, &excluded);
        }

        let mut refs: Vec<_> = candidates
            .into_iter()
            .filter(|r| match &filter.url {
                Some(u) => r.tag("url") == Some(u.as_str()),
                None => true,
            })
            .filter(|r| match &filter.level {
                Some(levels) => {
                    let present = r.tag("levels").unwrap_or("");
                    levels.iter().any(|l| present.split(',').any(|p| p == l.as_str()))
                }
                None => true,
            })
            .filter(|r| match filter.start_time {
                Some(start) => r.tag("end_time").and_then(|v| v.parse::<i64>().ok()).is_none_or(|end| end >= start),
                None => true,
            })
            .filter(|r| match filter.end_time {
                Some(end) => r.tag("start_time").and_then(|v| v.parse::<i64>().ok()).is_none_or(|start| start <= end),
                None => true,
            })
            .collect();
        if let Some(limit) = filter.limit {
            refs.truncate(limit);
        }
        Ok(refs)
    }

    pub fn query_by_level(&self, level: Level) -> Result<Vec<StorageRef>> {
        let index = MainIndex::load(&self.base)?;
        Ok(IdList::load(&self.base, &level_index_file(level))?.resolve(&index))
    }

    pub fn search(&self, text: &str, filter: Option<&ConsoleQueryFilter>) -> Result<Vec<SearchHit>> {
        let default_filter = ConsoleQueryFilter::default();
        let filter = filter.unwrap_or(&default_filter);
        let candidates = self.query(filter)?;
        let needle = text.to_lowercase();

        let mut hits = Vec::new();
        for ref_ in candidates {
            let entries = self.retrieve(&ref_)?;
            for entry in entries {
                if entry.message.to_lowercase().contains(&needle) && entry_matches(&entry, filter) {
                    hits.push(SearchHit {
                        storage_ref: ref_.clone(),
                        entry,
                    });
                }
            }
        }
        Ok(hits)
    }

    /// Drop stale ids from every secondary index (lazy GC, callable
    /// from the manager's `cleanup()`).
    pub fn compact(&self) -> Result<()> {
        let main = MainIndex::load(&self.base)?;
        for level in [Level::Log, Level::Info, Level::Warn, Level::Error, Level::Debug] {
            let file = level_index_file(level);
            let mut list = IdList::load(&self.base, &file)?;
            list.compact(&main);
            list.save(&self.base, &file)?;
        }
        for file in [HAS_ERRORS_FILE, HAS_WARNINGS_FILE] {
            let mut list = IdList::load(&self.base, file)?;
            list.compact(&main);
            list.save(&self.base, file)?;
        }
        Ok(())
    }

    pub fn global_stats(&self) -> Result<GlobalConsoleStats> {
        let index = MainIndex::load(&self.base)?;
        let mut stats = GlobalConsoleStats::default();
        for ref_ in index.iter() {
            stats.total_collections += 1;
            stats.total_entries += ref_.tag("total").and_then(|v| v.parse().ok()).unwrap_or(0);
            stats.total_errors += ref_.tag("error_count").and_then(|v| v.parse().ok()).unwrap_or(0);
            stats.total_warnings += ref_.tag("warning_count").and_then(|v| v.parse().ok()).unwrap_or(0);
        }
        Ok(stats)
    }
}

fn retain_in(candidates: &mut Vec<StorageRef>, allowed: &[StorageRef]) {
    candidates.retain(|r| allowed.iter().any(|a| a.id == r.id));
}

fn remove_in(candidates: &mut Vec<StorageRef>, excluded: &[StorageRef]) {
    candidates.retain(|r| !excluded.iter().any(|e| e.id == r.id));
}

fn entry_matches(entry: &ConsoleEntry, filter: &ConsoleQueryFilter) -> bool {
    if let Some(levels) = &filter.level {
        if !levels.contains(&entry.level) {
            return false;
        }
    }
    if let Some(text) = &filter.search_text {
        if !entry.message.to_lowercase().contains(&text.to_lowercase()) {
            return false;
        }
    }
    if let Some(start) = filter.start_time {
        if entry.timestamp < start {
            return false;
        }
    }
    if let Some(end) = filter.end_time {
        if entry.timestamp > end {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: Level, message: &str, ts: i64) -> ConsoleEntry {
        ConsoleEntry {
            timestamp: ts,
            level,
            message: message.to_string(),
            source: None,
            stack_trace: None,
        }
    }

    #[test]
    fn summary_error_count_matches_retrieve_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsoleStore::new(dir.path()).unwrap();
        let ref_ = store
            .store(vec![entry(Level::Log, "start", 1), entry(Level::Error, "boom", 2)], None)
            .unwrap();
        let summary = store.summary(&ref_).unwrap();
        assert_eq!(summary.error_count, 1);

        let errors = store.errors(&ref_).unwrap();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn query_has_errors_finds_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsoleStore::new(dir.path()).unwrap();
        store
            .store(vec![entry(Level::Log, "start", 1), entry(Level::Error, "boom", 2)], None)
            .unwrap();
        store.store(vec![entry(Level::Log, "clean", 1)], None).unwrap();

        let filter = ConsoleQueryFilter {
            has_errors: Some(true),
            ..Default::default()
        };
        let results = store.query(&filter).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn search_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsoleStore::new(dir.path()).unwrap();
        store
            .store(vec![entry(Level::Log, "start", 1), entry(Level::Error, "boom", 2)], None)
            .unwrap();
        let hits = store.search("BOOM", None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn query_by_level_resolves_only_matching_collections() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsoleStore::new(dir.path()).unwrap();
        store.store(vec![entry(Level::Warn, "careful", 1)], None).unwrap();
        store.store(vec![entry(Level::Log, "clean", 1)], None).unwrap();

        let results = store.query_by_level(Level::Warn).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn query_combines_has_errors_and_has_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsoleStore::new(dir.path()).unwrap();
        store
            .store(vec![entry(Level::Error, "boom", 1), entry(Level::Warn, "careful", 2)], None)
            .unwrap();
        store.store(vec![entry(Level::Error, "boom-only", 1)], None).unwrap();
        store.store(vec![entry(Level::Warn, "careful-only", 1)], None).unwrap();

        let filter = ConsoleQueryFilter {
            has_errors: Some(true),
            has_warnings: Some(true),
            ..Default::default()
        };
        let results = store.query(&filter).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn query_filters_by_level_and_time_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsoleStore::new(dir.path()).unwrap();
        store.store(vec![entry(Level::Error, "early", 10)], None).unwrap();
        store.store(vec![entry(Level::Warn, "late", 1000)], None).unwrap();

        let by_level = store
            .query(&ConsoleQueryFilter {
                level: Some(vec![Level::Warn]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_level.len(), 1);

        let by_range = store
            .query(&ConsoleQueryFilter {
                start_time: Some(500),
                end_time: Some(1500),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_range.len(), 1);
    }

    #[test]
    fn global_stats_aggregate_across_collections() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsoleStore::new(dir.path()).unwrap();
        store
            .store(vec![entry(Level::Error, "a", 1), entry(Level::Error, "b", 2)], None)
            .unwrap();
        store.store(vec![entry(Level::Warn, "c", 1)], None).unwrap();

        let stats = store.global_stats().unwrap();
        assert_eq!(stats.total_collections, 2);
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.total_warnings, 1);
    }
}
