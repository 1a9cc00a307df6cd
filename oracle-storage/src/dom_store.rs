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

//! DOM store: parses captured HTML into node-count-bounded chunks and
//! supports lazy chunk retrieval plus selector queries without
//! reassembling the whole document.

use crate::index::MainIndex;
use crate::store_base::StoreBase;
use oracle_core::{ArtifactCategory, OracleError, Result};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomMetadata {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomChunk {
    pub index: usize,
    pub node_count: usize,
    /// Serialized HTML fragment for this chunk's top-level elements.
    pub fragment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomHeader {
    pub title: Option<String>,
    pub url: Option<String>,
    pub total_nodes: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct DomStats {
    pub total_nodes: usize,
    pub chunk_count: usize,
    pub title: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorMatch {
    pub tag: String,
    pub text: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct DomQueryFilter {
    pub url: Option<String>,
    pub limit: Option<usize>,
}

pub struct DomStore {
    base: StoreBase,
    chunk_size: usize,
}

impl DomStore {
    pub fn new(base_dir: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            base: StoreBase::new(base_dir, ArtifactCategory::Html)?,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn store(&self, html: &str, metadata: Option<DomMetadata>) -> Result<oracle_core::StorageRef> {
        let document = Html::parse_document(html);
        let title = document
            .select(&title_selector())
            .next()
            .map(|el| el.text().collect::<String>());

        let top_level = top_level_elements(&document);
        let chunks = chunk_elements(&top_level, self.chunk_size);
        let total_nodes: usize = chunks.iter().map(|c| c.node_count).sum();
        let chunk_count = chunks.len();

        let id = self.base.generate_id();
        for chunk in &chunks {
            let path = self.chunk_path(&id, chunk.index);
            self.base.write_body_atomic(&path, chunk.fragment.as_bytes())?;
        }

        let url = metadata.and_then(|m| m.url);
        let header = DomHeader {
            title: title.clone(),
            url: url.clone(),
            total_nodes,
            chunk_count,
        };
        let header_path = self.header_path(&id);
        let header_bytes =
            serde_json::to_vec(&header).map_err(|e| OracleError::json("dom_header", e))?;
        let hash = self.base.write_body_atomic(&header_path, &header_bytes)?;

        let mut tags = HashMap::new();
        if let Some(u) = &url {
            tags.insert("url".to_string(), u.clone());
        }
        if let Some(t) = &title {
            tags.insert("title".to_string(), t.clone());
        }
        tags.insert("total_nodes".to_string(), total_nodes.to_string());
        tags.insert("chunk_count".to_string(), chunk_count.to_string());

        let size = header_bytes.len() as u64
            + chunks.iter().map(|c| c.fragment.len() as u64).sum::<u64>();
        let ref_ = self
            .base
            .make_ref(id.clone(), header_path.display().to_string(), size, hash, tags);

        let mut index = MainIndex::load(&self.base)?;
        index.insert(ref_.clone());
        index.save(&self.base)?;

        tracing::info!(id = %ref_.id, total_nodes, chunk_count, "stored DOM snapshot");
        Ok(ref_)
    }

    fn header_path(&self, id: &str) -> std::path::PathBuf {
        self.base.item_path(id, "header.json")
    }

    fn chunk_path(&self, id: &str, index: usize) -> std::path::PathBuf {
        self.base.root().join(format!("{id}.chunk{index}.html"))
    }

    fn load_header(&self, ref_: &oracle_core::StorageRef) -> Result<DomHeader> {
        let path = self.header_path(&ref_.id);
        let body = self.base.read_body(&path)?;
        serde_json::from_slice(&body).map_err(|e| OracleError::json("dom_header_read", e))
    }

    pub fn retrieve(&self, ref_: &oracle_core::StorageRef) -> Result<String> {
        let header = self.load_header(ref_)?;
        let mut out = String::new();
        for i in 0..header.chunk_count {
            if let Some(chunk) = self.retrieve_chunk(ref_, i)? {
                out.push_str(&chunk.fragment);
            }
        }
        Ok(out)
    }

    pub fn retrieve_chunk(
        &self,
        ref_: &oracle_core::StorageRef,
        index: usize,
    ) -> Result<Option<DomChunk>> {
        let header = self.load_header(ref_)?;
        if index >= header.chunk_count {
            return Ok(None);
        }
        let path = self.chunk_path(&ref_.id, index);
        if !path.exists() {
            return Ok(None);
        }
        let fragment = String::from_utf8_lossy(&self.base.read_body(&path)?).into_owned();
        let node_count = count_fragment_nodes(&fragment);
        Ok(Some(DomChunk {
            index,
            node_count,
            fragment,
        }))
    }

    pub fn query_by_selector(
        &self,
        ref_: &oracle_core::StorageRef,
        css_selector: &str,
    ) -> Result<Vec<SelectorMatch>> {
        let selector = Selector::parse(css_selector).map_err(|e| OracleError::InvalidSelector {
            selector: css_selector.to_string(),
            reason: format!("{e:?}"),
        })?;

        let header = self.load_header(ref_)?;
        let mut matches = Vec::new();
        for i in 0..header.chunk_count {
            let Some(chunk) = self.retrieve_chunk(ref_, i)? else {
                continue;
            };
            let fragment = Html::parse_fragment(&chunk.fragment);
            for el in fragment.select(&selector) {
                let attributes = el
                    .value()
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                matches.push(SelectorMatch {
                    tag: el.value().name().to_string(),
                    text: el.text().collect::<String>(),
                    attributes,
                });
            }
        }
        Ok(matches)
    }

    /// Look up a previously stored ref by id, without loading its payload.
    pub fn find(&self, id: &str) -> Result<Option<oracle_core::StorageRef>> {
        Ok(MainIndex::load(&self.base)?.get(id).cloned())
    }

    pub fn stats(&self, ref_: &oracle_core::StorageRef) -> Result<DomStats> {
        let header = self.load_header(ref_)?;
        Ok(DomStats {
            total_nodes: header.total_nodes,
            chunk_count: header.chunk_count,
            title: header.title,
            url: header.url,
        })
    }

    /// Number of stored items, read from the main index alone.
    pub fn count(&self) -> Result<usize> {
        let index = MainIndex::load(&self.base)?;
        Ok(if index.is_empty() { 0 } else { index.len() })
    }

    pub fn query(&self, filter: &DomQueryFilter) -> Result<Vec<oracle_core::StorageRef>> {
        let index = MainIndex::load(&self.base)?;
        let mut refs: Vec<_> = index
            .iter()
            .filter(|r| match &filter.url {
                Some(u) => r.tag("url") == Some(u.as_str()),
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

    /// Removes a snapshot's header, every chunk file, and its main-index
    /// entry. Used by the manager's `cleanup()` to recover orphaned DOM
    /// artifacts left behind by a failed `capture_checkpoint`.
    pub fn delete(&self, ref_: &oracle_core::StorageRef) -> Result<()> {
        if let Ok(header) = self.load_header(ref_) {
            for i in 0..header.chunk_count {
                let path = self.chunk_path(&ref_.id, i);
                if path.exists() {
                    std::fs::remove_file(&path).map_err(|e| OracleError::io("dom_delete_chunk", e))?;
                }
            }
        }

        let header_path = self.header_path(&ref_.id);
        if header_path.exists() {
            std::fs::remove_file(&header_path).map_err(|e| OracleError::io("dom_delete_header", e))?;
        }

        let mut index = MainIndex::load(&self.base)?;
        index.remove(&ref_.id);
        index.save(&self.base)?;
        Ok(())
    }
}

fn title_selector() -> Selector {
    Selector::parse("title").expect("static selector")
}

/// Top-level elements to chunk: children of `<body>` if present,
/// otherwise the root element's own children.
fn top_level_elements(document: &Html) -> Vec<String> {
    let body_sel = Selector::parse("body").expect("static selector");
    if let Some(body) = document.select(&body_sel).next() {
        body.children()
            .filter_map(scraper::ElementRef::wrap)
            .map(|el| el.html())
            .collect()
    } else {
        document
            .root_element()
            .children()
            .filter_map(scraper::ElementRef::wrap)
            .map(|el| el.html())
            .collect()
    }
}

fn count_fragment_nodes(fragment: &str) -> usize {
    let doc = Html::parse_fragment(fragment);
    doc.tree.nodes().count().saturating_sub(1) // exclude the synthetic fragment root
}

struct ChunkBuilder {
    index: usize,
    node_count: usize,
    fragment: String,
}

fn chunk_elements(elements: &[String], chunk_size: usize) -> Vec<ChunkBuilder> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut index = 0usize;
    let mut has_pending = false;

    // `node_count` is always recomputed on the joined fragment right
    // before it's finalized, so it matches what `retrieve_chunk` sees
    // re-parsing the same string later — summing per-element counts
    // would drift from that since html5ever's fragment parser doesn't
    // produce one node per element independent of its siblings.
    for html in elements {
        let node_count = count_fragment_nodes(html);
        if has_pending && count_fragment_nodes(&current) + node_count > chunk_size {
            chunks.push(ChunkBuilder {
                index,
                node_count: count_fragment_nodes(&current),
                fragment: std::mem::take(&mut current),
            });
            index += 1;
        }
        current.push_str(html);
        has_pending = true;
    }
    if has_pending || chunks.is_empty() && !elements.is_empty() {
        chunks.push(ChunkBuilder {
            index,
            node_count: count_fragment_nodes(&current),
            fragment: current,
        });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_retrieve_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomStore::new(dir.path(), 75).unwrap();
        let html = "<html><head><title>T</title></head><body><p>A</p><p>B</p></body></html>";
        let ref_ = store.store(html, None).unwrap();

        let stats = store.stats(&ref_).unwrap();
        assert_eq!(stats.title.as_deref(), Some("T"));

        let matches = store.query_by_selector(&ref_, "p").unwrap();
        assert_eq!(matches.len(), 2);

        let retrieved = store.retrieve(&ref_).unwrap();
        assert!(retrieved.contains("<p>A</p>"));
        assert!(retrieved.contains("<p>B</p>"));
    }

    #[test]
    fn chunking_splits_on_node_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomStore::new(dir.path(), 2).unwrap();
        let html = "<html><body><p>A</p><p>B</p><p>C</p></body></html>";
        let ref_ = store.store(html, None).unwrap();
        let stats = store.stats(&ref_).unwrap();
        assert!(stats.chunk_count >= 2);

        let sum: usize = (0..stats.chunk_count)
            .map(|i| store.retrieve_chunk(&ref_, i).unwrap().unwrap().node_count)
            .sum();
        assert_eq!(sum, stats.total_nodes);
    }

    #[test]
    fn delete_removes_header_chunks_and_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomStore::new(dir.path(), 2).unwrap();
        let html = "<html><body><p>A</p><p>B</p><p>C</p></body></html>";
        let ref_ = store.store(html, None).unwrap();
        assert!(store.find(&ref_.id).unwrap().is_some());

        store.delete(&ref_).unwrap();

        assert!(store.find(&ref_.id).unwrap().is_none());
        assert!(store.retrieve(&ref_).is_err());
    }

    #[test]
    fn chunk_index_out_of_range_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomStore::new(dir.path(), 75).unwrap();
        let ref_ = store.store("<html><body><p>A</p></body></html>", None).unwrap();
        assert!(store.retrieve_chunk(&ref_, 999).unwrap().is_none());
    }

    #[test]
    fn invalid_selector_fails_the_query_not_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomStore::new(dir.path(), 75).unwrap();
        let ref_ = store.store("<html><body><p>A</p></body></html>", None).unwrap();
        let err = store.query_by_selector(&ref_, ":::bad:::").unwrap_err();
        assert!(matches!(err, OracleError::InvalidSelector { .. }));
    }

    proptest::proptest! {
        #[test]
        fn chunk_count_never_exceeds_paragraph_count_and_nodes_sum_to_total(
            paragraph_count in 1usize..40,
            chunk_size in 1usize..20,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let store = DomStore::new(dir.path(), chunk_size).unwrap();
            let body: String = (0..paragraph_count).map(|i| format!("<p>{i}</p>")).collect();
            let html = format!("<html><body>{body}</body></html>");
            let ref_ = store.store(&html, None).unwrap();
            let stats = store.stats(&ref_).unwrap();

            proptest::prop_assert!(stats.chunk_count <= paragraph_count);

            let sum: usize = (0..stats.chunk_count)
                .map(|i| store.retrieve_chunk(&ref_, i).unwrap().unwrap().node_count)
                .sum();
            proptest::prop_assert_eq!(sum, stats.total_nodes);

            let retrieved = store.retrieve(&ref_).unwrap();
            for i in 0..paragraph_count {
                let needle = format!("<p>{i}</p>");
                proptest::prop_assert!(retrieved.contains(&needle));
            }
        }
    }
}
