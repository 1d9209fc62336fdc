use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{StorageBackend, StorageResult, StorageSemantics};

/// Pure in-process KV store. No durability across restarts; tagged `Kv`
/// (not `Unknown`) because within a single process it still gives
/// consistent reads of completed writes. Useful for tests and the demo
/// CLI's default wiring.
#[derive(Default)]
pub struct InMemoryStorage {
    data: RwLock<HashMap<String, Value>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> StorageResult<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn semantics(&self) -> StorageSemantics {
        StorageSemantics::Kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let storage = InMemoryStorage::new();
        storage.put("run:1", json!({"status": "CREATED"})).await.unwrap();
        let back = storage.get("run:1").await.unwrap();
        assert_eq!(back, Some(json!({"status": "CREATED"})));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let storage = InMemoryStorage::new();
        storage.put("task:run-1:a", json!(1)).await.unwrap();
        storage.put("task:run-1:b", json!(2)).await.unwrap();
        storage.put("task:run-2:a", json!(3)).await.unwrap();

        let mut keys = storage.list("task:run-1:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["task:run-1:a", "task:run-1:b"]);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let storage = InMemoryStorage::new();
        storage.put("run:1", json!(1)).await.unwrap();
        storage.delete("run:1").await.unwrap();
        assert_eq!(storage.get("run:1").await.unwrap(), None);
    }
}
