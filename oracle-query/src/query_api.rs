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

//! Read-only composition across the four stores: filtering and global
//! stats. Built from a [`StorageManager`] but holds its own store
//! handles so it can be passed around independently of the manager.

use crate::manager::StorageManager;
use oracle_core::{Result, StorageRef};
use oracle_storage::checkpoint_store::CheckpointQueryFilter;
use oracle_storage::console_store::{ConsoleQueryFilter, GlobalConsoleStats, SearchHit};
use oracle_storage::dom_store::DomQueryFilter;
use oracle_storage::screenshot_store::ScreenshotQueryFilter;
use oracle_storage::{CheckpointStore, ConsoleStore, DomStore, ScreenshotStore};
use std::sync::Arc;

pub struct QueryApi {
    dom: Arc<DomStore>,
    screenshots: Arc<ScreenshotStore>,
    console: Arc<ConsoleStore>,
    checkpoints: Arc<CheckpointStore>,
}

impl QueryApi {
    pub fn from_manager(manager: &StorageManager) -> Self {
        Self {
            dom: manager.dom_handle(),
            screenshots: manager.screenshots_handle(),
            console: manager.console_handle(),
            checkpoints: manager.checkpoints_handle(),
        }
    }

    pub fn query_dom(&self, filter: &DomQueryFilter) -> Result<Vec<StorageRef>> {
        self.dom.query(filter)
    }

    pub fn query_screenshots(&self, filter: &ScreenshotQueryFilter) -> Result<Vec<StorageRef>> {
        self.screenshots.query(filter)
    }

    pub fn query_console(&self, filter: &ConsoleQueryFilter) -> Result<Vec<StorageRef>> {
        self.console.query(filter)
    }

    pub fn search_console(&self, text: &str, filter: Option<&ConsoleQueryFilter>) -> Result<Vec<SearchHit>> {
        self.console.search(text, filter)
    }

    pub fn query_checkpoints(&self, filter: &CheckpointQueryFilter) -> Result<Vec<StorageRef>> {
        self.checkpoints.query(filter)
    }

    pub fn query_checkpoints_by_tag(&self, tag: &str) -> Result<Vec<StorageRef>> {
        self.checkpoints.query_by_tag(tag)
    }

    pub fn console_stats(&self) -> Result<GlobalConsoleStats> {
        self.console.global_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::OracleConfig;

    #[test]
    fn query_api_reads_through_to_the_same_stores_the_manager_writes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(&OracleConfig::new(dir.path())).unwrap();
        manager.initialize().unwrap();
        manager.store_dom("<html><body><p>a</p></body></html>").unwrap();

        let api = QueryApi::from_manager(&manager);
        let results = api.query_dom(&DomQueryFilter::default()).unwrap();
        assert_eq!(results.len(), 1);
    }
}
