/// Durable [`DocumentStore`] backed by a single [`redb`] file.
///
/// # Tables
///
/// | Name        | Key                  | Value                  |
/// |-------------|----------------------|------------------------|
/// | `documents` | `"<collection>/<id>"`| JSON-encoded document  |
///
/// Collections are key prefixes, so listing one is a range scan from
/// `"<collection>/"` up to `"<collection>0"` (`'0'` follows `'/'`).  Every
/// mutation runs inside one write transaction, which is what makes
/// [`DocumentStore::update`] and the counters built on it atomic.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use tracing::debug;

use crate::document::{DocumentMutation, DocumentStore};
use crate::error::{StoreError, StoreResult};

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

pub struct RedbDocumentStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbDocumentStore {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening redb store at {}", path.display()))?;

        // Ensure the table exists so read transactions never see it missing.
        {
            let tx = db.begin_write()?;
            tx.open_table(DOCUMENTS)?;
            tx.commit()?;
        }

        debug!(path = %path.display(), "document store opened");
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<R, F>(&self, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<R> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(StoreError::backend)?
    }
}

fn doc_key(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

fn collection_bounds(collection: &str) -> (String, String) {
    (format!("{collection}/"), format!("{collection}0"))
}

#[async_trait]
impl DocumentStore for RedbDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        let key = doc_key(collection, id);
        let bytes = serde_json::to_vec(&doc)?;
        self.blocking(move |db| {
            let tx = db.begin_write().map_err(StoreError::backend)?;
            {
                let mut tbl = tx.open_table(DOCUMENTS).map_err(StoreError::backend)?;
                tbl.insert(key.as_str(), bytes.as_slice())
                    .map_err(StoreError::backend)?;
            }
            tx.commit().map_err(StoreError::backend)
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let key = doc_key(collection, id);
        let bytes = self
            .blocking(move |db| {
                let tx = db.begin_read().map_err(StoreError::backend)?;
                let tbl = tx.open_table(DOCUMENTS).map_err(StoreError::backend)?;
                let bytes = tbl
                    .get(key.as_str())
                    .map_err(StoreError::backend)?
                    .map(|v| v.value().to_vec());
                Ok(bytes)
            })
            .await?;
        bytes
            .map(|b| serde_json::from_slice(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Value>> {
        let (start, end) = collection_bounds(collection);
        let raw = self
            .blocking(move |db| {
                let tx = db.begin_read().map_err(StoreError::backend)?;
                let tbl = tx.open_table(DOCUMENTS).map_err(StoreError::backend)?;
                let mut out = Vec::new();
                for item in tbl
                    .range(start.as_str()..end.as_str())
                    .map_err(StoreError::backend)?
                {
                    let (_, v) = item.map_err(StoreError::backend)?;
                    out.push(v.value().to_vec());
                }
                Ok(out)
            })
            .await?;
        raw.iter()
            .map(|b| serde_json::from_slice(b).map_err(StoreError::from))
            .collect()
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        mutation: DocumentMutation,
    ) -> StoreResult<Option<Value>> {
        let key = doc_key(collection, id);
        self.blocking(move |db| {
            let tx = db.begin_write().map_err(StoreError::backend)?;
            let result = {
                let mut tbl = tx.open_table(DOCUMENTS).map_err(StoreError::backend)?;
                let current = tbl
                    .get(key.as_str())
                    .map_err(StoreError::backend)?
                    .map(|v| serde_json::from_slice::<Value>(v.value()))
                    .transpose()?;
                match mutation(current.clone())? {
                    Some(next) => {
                        let bytes = serde_json::to_vec(&next)?;
                        tbl.insert(key.as_str(), bytes.as_slice())
                            .map_err(StoreError::backend)?;
                        Some(next)
                    }
                    None => current,
                }
            };
            // An error above drops `tx`, which aborts the transaction.
            tx.commit().map_err(StoreError::backend)?;
            Ok(result)
        })
        .await
    }

    async fn count(&self, collection: &str) -> StoreResult<usize> {
        let (start, end) = collection_bounds(collection);
        self.blocking(move |db| {
            let tx = db.begin_read().map_err(StoreError::backend)?;
            let tbl = tx.open_table(DOCUMENTS).map_err(StoreError::backend)?;
            let range = tbl
                .range(start.as_str()..end.as_str())
                .map_err(StoreError::backend)?;
            Ok(range.count())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Query;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn documents_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/store.redb");
        {
            let store = RedbDocumentStore::open(&path).unwrap();
            store.upsert("memories", "m1", json!({"id": "m1", "depth": 0.4})).await.unwrap();
        }
        let store = RedbDocumentStore::open(&path).unwrap();
        let doc = store.get("memories", "m1").await.unwrap().unwrap();
        assert_eq!(doc["depth"], 0.4);
    }

    #[tokio::test]
    async fn collections_are_isolated_by_prefix() {
        let dir = TempDir::new().unwrap();
        let store = RedbDocumentStore::open(dir.path().join("s.redb")).unwrap();
        store.upsert("mem", "1", json!({"id": "1"})).await.unwrap();
        store.upsert("memories", "2", json!({"id": "2"})).await.unwrap();
        store.upsert("memories", "3", json!({"id": "3"})).await.unwrap();
        assert_eq!(store.count("mem").await.unwrap(), 1);
        assert_eq!(store.count("memories").await.unwrap(), 2);
        assert_eq!(store.list("absent").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn find_and_increment_match_in_memory_semantics() {
        let dir = TempDir::new().unwrap();
        let store = RedbDocumentStore::open(dir.path().join("s.redb")).unwrap();
        for (id, depth) in [("a", 0.1), ("b", 0.65), ("c", 0.92)] {
            store.upsert("m", id, json!({"id": id, "depth": depth})).await.unwrap();
        }
        let docs = store
            .find("m", &Query::new().gte("depth", 0.6).desc("depth"))
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["c", "b"]);

        store.upsert("ledger", "state", json!({"metrics": {"n": 4}})).await.unwrap();
        assert_eq!(store.increment("ledger", "state", "metrics.n", 1).await.unwrap(), 5);
        assert!(store.increment("ledger", "nope", "metrics.n", 1).await.is_err());
    }

    #[tokio::test]
    async fn failed_mutation_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = RedbDocumentStore::open(dir.path().join("s.redb")).unwrap();
        store.upsert("t", "1", json!({"v": 1})).await.unwrap();
        let err = store
            .update("t", "1", Box::new(|_| Err(StoreError::Backend("boom".into()))))
            .await;
        assert!(err.is_err());
        assert_eq!(store.get("t", "1").await.unwrap(), Some(json!({"v": 1})));
    }
}
