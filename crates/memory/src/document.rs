//! Storage boundary for every durable collection.
//!
//! Documents are JSON values addressed by `(collection, id)`.  Backends only
//! have to provide keyed access, listing and an atomic read-modify-write;
//! filtering, sorting and counters are layered on top.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

pub const MEMORIES: &str = "memories";
pub const LEDGER: &str = "ledger";
pub const REFLECTIONS: &str = "reflections";
pub const INVOCATIONS: &str = "invocations";
pub const TRIGGERS: &str = "triggers";
pub const AGENT_TASKS: &str = "agent_tasks";

/// Read-modify-write step run atomically by [`DocumentStore::update`].
///
/// Receives the current document (if any).  Returning `Ok(None)` leaves the
/// store untouched.
pub type DocumentMutation = Box<dyn FnOnce(Option<Value>) -> StoreResult<Option<Value>> + Send>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()>;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Every document in `collection`, ordered by id.
    async fn list(&self, collection: &str) -> StoreResult<Vec<Value>>;

    /// Apply `mutation` to one document as a single atomic step and return
    /// the document as stored afterwards.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        mutation: DocumentMutation,
    ) -> StoreResult<Option<Value>>;

    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Value>> {
        let docs = self.list(collection).await?;
        Ok(query.apply(docs))
    }

    async fn count(&self, collection: &str) -> StoreResult<usize> {
        Ok(self.list(collection).await?.len())
    }

    /// Atomically add `delta` to the integer at dotted `path`.  A missing
    /// field counts as zero; a missing document is `NotFound`.
    async fn increment(&self, collection: &str, id: &str, path: &str, delta: i64) -> StoreResult<i64> {
        let field = path.to_string();
        let (coll, key) = (collection.to_string(), id.to_string());
        let updated = self
            .update(
                collection,
                id,
                Box::new(move |doc| {
                    let Some(mut doc) = doc else {
                        return Err(StoreError::NotFound { collection: coll, id: key });
                    };
                    let current = match lookup(&doc, &field) {
                        None | Some(Value::Null) => 0,
                        Some(v) => v
                            .as_i64()
                            .ok_or_else(|| StoreError::NotNumeric { path: field.clone() })?,
                    };
                    set_path(&mut doc, &field, Value::from(current + delta))?;
                    Ok(Some(doc))
                }),
            )
            .await?;

        Ok(updated
            .as_ref()
            .and_then(|doc| lookup(doc, path))
            .and_then(Value::as_i64)
            .unwrap_or_default())
    }
}

// ── Dotted paths ─────────────────────────────────────────────────────────────

/// Resolve a dotted path (`health_metrics.total_invocations`) inside `doc`.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, segment| node.get(segment))
}

/// Write `value` at a dotted path, creating intermediate objects.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> StoreResult<()> {
    let mut node = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Value::Object(map) = node else {
            return Err(StoreError::Backend(format!("`{path}` crosses a non-object value")));
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return Ok(());
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

// ── Query ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
enum Filter {
    Gte(String, f64),
    Gt(String, f64),
    Lte(String, f64),
    Eq(String, Value),
}

impl Filter {
    fn matches(&self, doc: &Value) -> bool {
        let number = |path: &str| lookup(doc, path).and_then(Value::as_f64);
        match self {
            Self::Gte(path, bound) => number(path).is_some_and(|v| v >= *bound),
            Self::Gt(path, bound) => number(path).is_some_and(|v| v > *bound),
            Self::Lte(path, bound) => number(path).is_some_and(|v| v <= *bound),
            Self::Eq(path, expected) => lookup(doc, path) == Some(expected),
        }
    }
}

/// Filter, multi-key sort and limit over one collection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<Filter>,
    sort: Vec<(String, SortOrder)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gte(mut self, path: &str, bound: f64) -> Self {
        self.filters.push(Filter::Gte(path.to_string(), bound));
        self
    }

    pub fn gt(mut self, path: &str, bound: f64) -> Self {
        self.filters.push(Filter::Gt(path.to_string(), bound));
        self
    }

    pub fn lte(mut self, path: &str, bound: f64) -> Self {
        self.filters.push(Filter::Lte(path.to_string(), bound));
        self
    }

    pub fn eq(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(path.to_string(), value.into()));
        self
    }

    pub fn asc(mut self, path: &str) -> Self {
        self.sort.push((path.to_string(), SortOrder::Asc));
        self
    }

    pub fn desc(mut self, path: &str) -> Self {
        self.sort.push((path.to_string(), SortOrder::Desc));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Run the query over an already-loaded collection.  The sort is stable,
    /// so ties keep the backend's id order.
    pub fn apply(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut out: Vec<Value> = docs.into_iter().filter(|d| self.matches(d)).collect();
        if !self.sort.is_empty() {
            out.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|(path, order)| {
                        let ord = compare_values(lookup(a, path), lookup(b, path));
                        match order {
                            SortOrder::Asc => ord,
                            SortOrder::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Numbers compare numerically, RFC 3339 strings chronologically, other
/// strings lexically.  Missing values sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x).map(|d| d.with_timezone(&Utc)),
                DateTime::parse_from_rfc3339(y).map(|d| d.with_timezone(&Utc)),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

// ── In-memory backend ────────────────────────────────────────────────────────

/// Volatile store for tests and `memory.backend = "memory"`.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collections<R>(&self, f: impl FnOnce(&mut HashMap<String, BTreeMap<String, Value>>) -> R) -> R {
        let mut guard = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        self.with_collections(|c| {
            c.entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), doc);
        });
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self.with_collections(|c| c.get(collection).and_then(|docs| docs.get(id)).cloned()))
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Value>> {
        Ok(self.with_collections(|c| {
            c.get(collection)
                .map(|docs| docs.values().cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        mutation: DocumentMutation,
    ) -> StoreResult<Option<Value>> {
        self.with_collections(|c| {
            let docs = c.entry(collection.to_string()).or_default();
            let current = docs.get(id).cloned();
            match mutation(current.clone())? {
                Some(next) => {
                    docs.insert(id.to_string(), next.clone());
                    Ok(Some(next))
                }
                None => Ok(current),
            }
        })
    }

    async fn count(&self, collection: &str) -> StoreResult<usize> {
        Ok(self.with_collections(|c| c.get(collection).map(BTreeMap::len).unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        for (id, depth, at) in [
            ("a", 0.2, "2025-01-01T08:00:00Z"),
            ("b", 0.7, "2025-01-02T08:00:00.5Z"),
            ("c", 0.7, "2025-01-03T08:00:00Z"),
            ("d", 0.95, "2025-01-01T09:00:00Z"),
        ] {
            store
                .upsert("docs", id, json!({"id": id, "depth": depth, "created_at": at}))
                .await
                .unwrap();
        }
        store
    }

    fn ids(docs: &[Value]) -> Vec<&str> {
        docs.iter().map(|d| d["id"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn range_filter_sort_and_limit() {
        let store = seeded().await;
        let q = Query::new().gte("depth", 0.6).lte("depth", 0.9).desc("depth").desc("created_at");
        assert_eq!(ids(&store.find("docs", &q).await.unwrap()), ["c", "b"]);

        let q = Query::new().desc("created_at").limit(2);
        assert_eq!(ids(&store.find("docs", &q).await.unwrap()), ["c", "b"]);
    }

    #[tokio::test]
    async fn timestamps_with_fractional_seconds_sort_chronologically() {
        let store = InMemoryDocumentStore::new();
        store.upsert("t", "x", json!({"id": "x", "at": "2025-01-01T00:00:00.5Z"})).await.unwrap();
        store.upsert("t", "y", json!({"id": "y", "at": "2025-01-01T00:00:01Z"})).await.unwrap();
        let docs = store.find("t", &Query::new().desc("at")).await.unwrap();
        assert_eq!(ids(&docs), ["y", "x"]);
    }

    #[tokio::test]
    async fn equality_filter_on_nested_path() {
        let store = InMemoryDocumentStore::new();
        store.upsert("t", "1", json!({"id": "1", "meta": {"on": true}})).await.unwrap();
        store.upsert("t", "2", json!({"id": "2", "meta": {"on": false}})).await.unwrap();
        let docs = store.find("t", &Query::new().eq("meta.on", true)).await.unwrap();
        assert_eq!(ids(&docs), ["1"]);
    }

    #[tokio::test]
    async fn increment_creates_missing_field_and_rejects_missing_doc() {
        let store = InMemoryDocumentStore::new();
        store.upsert("ledger", "state", json!({"health": {}})).await.unwrap();
        assert_eq!(store.increment("ledger", "state", "health.count", 1).await.unwrap(), 1);
        assert_eq!(store.increment("ledger", "state", "health.count", 2).await.unwrap(), 3);

        let err = store.increment("ledger", "absent", "health.count", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(InMemoryDocumentStore::new());
        store.upsert("ledger", "state", json!({"n": 0})).await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("ledger", "state", "n", 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let doc = store.get("ledger", "state").await.unwrap().unwrap();
        assert_eq!(doc["n"], 20);
    }

    #[tokio::test]
    async fn update_returning_none_leaves_document() {
        let store = InMemoryDocumentStore::new();
        store.upsert("t", "1", json!({"v": 1})).await.unwrap();
        let after = store.update("t", "1", Box::new(|_| Ok(None))).await.unwrap();
        assert_eq!(after, Some(json!({"v": 1})));
        assert_eq!(store.count("t").await.unwrap(), 1);
        assert_eq!(store.count("empty").await.unwrap(), 0);
    }
}
