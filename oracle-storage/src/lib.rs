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

//! The four artifact stores (DOM, screenshot, console, checkpoint) and
//! the shared [`store_base`] machinery they embed.

pub mod checkpoint_store;
pub mod console_store;
pub mod dom_store;
mod index;
pub mod screenshot_store;
pub mod store_base;
pub mod visual_diff_store;

pub use checkpoint_store::CheckpointStore;
pub use console_store::ConsoleStore;
pub use dom_store::DomStore;
pub use screenshot_store::ScreenshotStore;
pub use visual_diff_store::VisualDiffStore;
