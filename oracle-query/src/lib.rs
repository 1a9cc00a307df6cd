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

//! The composing entry point over the whole storage engine:
//! `StorageManager` owns the four stores, `QueryApi` filters across
//! them, `AssertionEngine` evaluates DOM/console rules, and
//! `CheckpointValidator` orchestrates a full checkpoint validation
//! pass (DOM, console, visual, then custom).
//!
//! Install the recommended subscriber with
//! `oracle_core::config::init_tracing()`, which honors `ORACLE_LOG`
//! (default `info`) for filtering.

pub mod assertion;
pub mod manager;
pub mod query_api;
pub mod validator;

pub use assertion::AssertionEngine;
pub use manager::StorageManager;
pub use query_api::QueryApi;
pub use validator::CheckpointValidator;
