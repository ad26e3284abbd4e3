//! Keyed blob storage for parked message content and provider state
//!
//! Values are arbitrary JSON. `get` never fails: a missing key, an unreadable
//! file or a corrupt payload are all reported as `None`.

use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Get/set store keyed by message id or provider key
pub trait BlobStore: Send + Sync {
    /// Fetch the value stored under `key`
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Store `value` under `key`, overwriting unconditionally
    fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Shared handle passed to the control loop and capability providers
pub type SharedBlobStore = Arc<dyn BlobStore>;

/// Fetch and deserialize a typed value. Shape mismatches count as not found.
pub fn get_typed<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, "stored blob has unexpected shape: {}", e);
            None
        }
    }
}

/// Serialize and store a typed value
pub fn set_typed<T: Serialize>(store: &dyn BlobStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?)
}

/// Durable store writing one JSON file per key
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(key, path = %path.display(), "failed to read blob: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, path = %path.display(), "corrupt blob: {}", e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(&value)?;

        // Write-then-rename keeps readers from seeing a half-written file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))
    }
}

/// In-process store for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Map an arbitrary key to a file-name-safe string.
/// ASCII alphanumerics, `-` and `_` pass through, every other byte becomes `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    if out.is_empty() {
        out.push_str("%00");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("steward-blob-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("abc-123_x"), "abc-123_x");
        assert_eq!(encode_key("../etc"), "%2E%2E%2Fetc");
        assert_eq!(encode_key("a b"), "a%20b");
        assert_eq!(encode_key(""), "%00");
    }

    #[test]
    fn test_file_store_missing_key_is_none() {
        let store = FileBlobStore::open(temp_dir()).unwrap();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_file_store_overwrites() {
        let store = FileBlobStore::open(temp_dir()).unwrap();
        store.set("k", json!({"v": 1})).unwrap();
        store.set("k", json!({"v": 2})).unwrap();
        assert_eq!(store.get("k"), Some(json!({"v": 2})));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = temp_dir();
        {
            let store = FileBlobStore::open(&dir).unwrap();
            store.set("msg/1", json!("parked content")).unwrap();
        }
        let reopened = FileBlobStore::open(&dir).unwrap();
        assert_eq!(reopened.get("msg/1"), Some(json!("parked content")));
    }

    #[test]
    fn test_file_store_corrupt_file_is_none() {
        let store = FileBlobStore::open(temp_dir()).unwrap();
        fs::write(store.path_for("bad"), "{not json").unwrap();
        assert!(store.get("bad").is_none());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        items: Vec<String>,
    }

    #[test]
    fn test_typed_helpers() {
        let store = MemoryBlobStore::new();
        let snap = Snapshot {
            items: vec!["a".into(), "b".into()],
        };
        set_typed(&store, "snap", &snap).unwrap();
        assert_eq!(get_typed::<Snapshot>(&store, "snap"), Some(snap));

        store.set("wrong", json!(42)).unwrap();
        assert_eq!(get_typed::<Snapshot>(&store, "wrong"), None);
    }
}
