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

//! Shared contract every artifact store embeds: id generation, atomic
//! JSON index I/O, and content hashing. Composition over inheritance —
//! each store holds a `StoreBase`, it does not subclass one.

use chrono::Utc;
use oracle_core::{ArtifactCategory, OracleError, Result, StorageRef};
use parking_lot::Mutex;
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-index-file lock table. Writers to the *same* index file
/// serialize; writers to different index files never block each other.
#[derive(Default)]
pub struct IndexLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl IndexLocks {
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Shared, embeddable store machinery.
pub struct StoreBase {
    root: PathBuf,
    category: ArtifactCategory,
    counter: AtomicU64,
    index_locks: IndexLocks,
}

impl StoreBase {
    pub fn new(base_dir: impl AsRef<Path>, category: ArtifactCategory) -> Result<Self> {
        let root = base_dir.as_ref().join(category.namespace());
        fs::create_dir_all(&root).map_err(|e| OracleError::io("create_dir_all", e))?;
        Ok(Self {
            root,
            category,
            counter: AtomicU64::new(0),
            index_locks: IndexLocks::default(),
        })
    }

    pub fn category(&self) -> ArtifactCategory {
        self.category
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collision-free id: a monotonic per-process counter plus random
    /// suffix, hex-encoded. Not required to sort by creation time —
    /// `StorageRef::timestamp` carries that.
    pub fn generate_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::thread_rng().gen();
        format!("{:016x}{:08x}", seq, salt)
    }

    pub fn item_path(&self, id: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{id}.{ext}"))
    }

    pub fn exists(&self, id: &str, ext: &str) -> bool {
        self.item_path(id, ext).exists()
    }

    pub fn index_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// SHA-256 hex digest, used both for `StorageRef::hash` and the
    /// integrity check on retrieve.
    pub fn hash_bytes(body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    }

    /// BLAKE3 hex digest, used as a fast dedup key for content-addressed
    /// lookups where SHA-256's stronger guarantees aren't needed.
    pub fn fingerprint(body: &[u8]) -> String {
        blake3::hash(body).to_hex().to_string()
    }

    /// Write `body` to `path`, returning its hash. Uses atomic
    /// temp-file-then-rename so a crash never leaves a partial file at
    /// the final path.
    pub fn write_body_atomic(&self, path: &Path, body: &[u8]) -> Result<String> {
        self.write_bytes_atomic(path, body)?;
        Ok(Self::hash_bytes(body))
    }

    fn write_bytes_atomic(&self, path: &Path, body: &[u8]) -> Result<()> {
        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("bin")
        ));
        fs::write(&tmp, body).map_err(|e| OracleError::io("write_body", e))?;
        fs::rename(&tmp, path).map_err(|e| OracleError::io("rename_body", e))?;
        Ok(())
    }

    pub fn read_body(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                OracleError::not_found("artifact", path.display().to_string())
            }
            _ => OracleError::io("read_body", e),
        })
    }

    /// Verify `body`'s hash matches `expected` (the ref's recorded hash).
    pub fn verify_integrity(path: &Path, expected: &str, body: &[u8]) -> Result<()> {
        let actual = Self::hash_bytes(body);
        if actual != expected {
            return Err(OracleError::Integrity {
                id: path.display().to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Read a JSON index file, defaulting to `T::default()` if it does
    /// not exist yet.
    pub fn read_json<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let data = fs::read(path).map_err(|e| OracleError::io("read_json", e))?;
        serde_json::from_slice(&data).map_err(|e| OracleError::json("read_json", e))
    }

    /// Write a JSON index file atomically, serialized per-path so
    /// concurrent writers to the same index never interleave.
    pub fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let guard = self.index_locks.lock_for(path);
        let _held = guard.lock();

        let pretty =
            serde_json::to_vec_pretty(value).map_err(|e| OracleError::json("write_json", e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| OracleError::io("write_json_mkdir", e))?;
        }
        self.write_bytes_atomic(path, &pretty)
    }

    pub fn make_ref(
        &self,
        id: String,
        path: String,
        size: u64,
        hash: String,
        tags: HashMap<String, String>,
    ) -> StorageRef {
        StorageRef {
            id,
            category: self.category,
            path,
            size,
            hash,
            timestamp: Utc::now(),
            compressed: false,
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let base = StoreBase::new(dir.path(), ArtifactCategory::Html).unwrap();
        let a = base.generate_id();
        let b = base.generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn atomic_write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let base = StoreBase::new(dir.path(), ArtifactCategory::Html).unwrap();
        let path = base.item_path("abc", "txt");
        let hash = base.write_body_atomic(&path, b"hello").unwrap();
        let body = base.read_body(&path).unwrap();
        assert_eq!(body, b"hello");
        StoreBase::verify_integrity(&path, &hash, &body).unwrap();
    }

    #[test]
    fn integrity_check_fails_on_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let base = StoreBase::new(dir.path(), ArtifactCategory::Html).unwrap();
        let path = base.item_path("abc", "txt");
        let hash = base.write_body_atomic(&path, b"hello").unwrap();
        let err = StoreBase::verify_integrity(&path, &hash, b"tampered").unwrap_err();
        assert!(matches!(err, OracleError::Integrity { .. }));
    }

    #[test]
    fn json_index_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let base = StoreBase::new(dir.path(), ArtifactCategory::Html).unwrap();
        let path = base.index_path("index.json");
        let mut map: HashMap<String, String> = HashMap::new();
        map.insert("a".into(), "1".into());
        base.write_json_atomic(&path, &map).unwrap();
        let read: HashMap<String, String> = base.read_json(&path).unwrap();
        assert_eq!(read, map);
    }

    #[test]
    fn missing_index_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let base = StoreBase::new(dir.path(), ArtifactCategory::Html).unwrap();
        let path = base.index_path("missing.json");
        let read: HashMap<String, String> = base.read_json(&path).unwrap();
        assert!(read.is_empty());
    }
}
