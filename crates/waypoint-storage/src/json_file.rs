use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError, StorageResult, StorageSemantics};

/// One JSON file per key under `base`, loaded eagerly at construction and
/// kept in an in-memory map mirrored to disk on every write. Individually
/// addressable keys, since this runtime's key scheme (`run:{runId}`,
/// `task:{runId}:{taskId}`, ...) is per-entity rather than one snapshot.
pub struct JsonFileStorage {
    base: PathBuf,
    cache: RwLock<HashMap<String, Value>>,
}

impl JsonFileStorage {
    pub async fn new(base: impl Into<PathBuf>) -> StorageResult<Self> {
        let base = base.into();
        tokio::fs::create_dir_all(&base).await?;
        let mut cache = HashMap::new();

        let mut entries = tokio::fs::read_dir(&base).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path).await?;
            let value: Value = serde_json::from_str(&raw)?;
            if let Some(key) = decode_key(&path) {
                cache.insert(key, value);
            }
        }

        Ok(Self {
            base,
            cache: RwLock::new(cache),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(encode_key(key))
    }
}

fn encode_key(key: &str) -> String {
    format!("{}.json", key.replace([':', '/'], "__"))
}

fn decode_key(path: &std::path::Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    Some(stem.replace("__", ":"))
}

#[async_trait]
impl StorageBackend for JsonFileStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> StorageResult<()> {
        let raw = serde_json::to_string_pretty(&value)?;
        tokio::fs::write(self.path_for(key), raw).await?;
        self.cache.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }
        self.cache.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .cache
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn semantics(&self) -> StorageSemantics {
        StorageSemantics::Strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_survive_a_fresh_load() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = JsonFileStorage::new(dir.path()).await.unwrap();
            storage
                .put("run:abc", json!({"status": "CREATED"}))
                .await
                .unwrap();
        }

        let reloaded = JsonFileStorage::new(dir.path()).await.unwrap();
        let value = reloaded.get("run:abc").await.unwrap();
        assert_eq!(value, Some(json!({"status": "CREATED"})));
    }

    #[tokio::test]
    async fn delete_removes_file_and_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path()).await.unwrap();
        storage.put("task:r:1", json!(1)).await.unwrap();
        storage.delete("task:r:1").await.unwrap();

        assert_eq!(storage.get("task:r:1").await.unwrap(), None);
        let reloaded = JsonFileStorage::new(dir.path()).await.unwrap();
        assert_eq!(reloaded.get("task:r:1").await.unwrap(), None);
    }
}
