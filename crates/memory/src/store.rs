use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info};

use crate::document::{DocumentStore, MEMORIES, Query};
use crate::error::{MemoryError, MemoryResult, StoreError};
use crate::ledger::Ledger;
use crate::schema::{ConsolidationTier, MemoryId, MemoryRecord, NewMemory, PENDING_DEPTH_THRESHOLD};

/// Depth at or above which a memory is high priority.
pub const HIGH_PRIORITY_DEPTH: f64 = 0.60;
/// Depth at or above which a memory belongs to the identity tier.
pub const IDENTITY_DEPTH: f64 = 0.90;

/// Persistent collection of scored, tiered memories.  Records are never
/// deleted and depth only moves through [`MemoryStore::promote`].
#[derive(Clone)]
pub struct MemoryStore {
    docs: Arc<dyn DocumentStore>,
    ledger: Ledger,
}

impl MemoryStore {
    pub fn new(docs: Arc<dyn DocumentStore>, ledger: Ledger) -> Self {
        Self { docs, ledger }
    }

    pub async fn store(&self, input: NewMemory) -> MemoryResult<MemoryRecord> {
        let record = MemoryRecord::new(input);
        self.docs
            .upsert(MEMORIES, record.id.as_str(), serde_json::to_value(&record)?)
            .await?;
        info!(
            id = %record.id,
            depth = record.depth(),
            tier = record.consolidation_tier().slug(),
            "memory stored"
        );
        Ok(record)
    }

    /// Read a record without counting an access.
    pub async fn get(&self, id: &MemoryId) -> MemoryResult<Option<MemoryRecord>> {
        self.docs
            .get(MEMORIES, id.as_str())
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(MemoryError::from)
    }

    /// Read a record and count the access.
    pub async fn recall(&self, id: &MemoryId) -> MemoryResult<MemoryRecord> {
        self.mutate(id, |r| {
            r.touch();
            Ok(())
        })
        .await
    }

    /// Set a new depth, recompute the tier and mark the record consolidated,
    /// then count one consolidation in the ledger.  A missing id is
    /// `NotFound` and a lower depth is `Demotion`; both leave every counter
    /// untouched.
    pub async fn promote(&self, id: &MemoryId, new_depth: f64) -> MemoryResult<MemoryRecord> {
        let before = self.get(id).await?.map(|r| r.consolidation_tier());
        let record = self.mutate(id, move |r| r.promote(new_depth)).await?;
        let total = self.ledger.record_consolidation().await?;
        info!(
            id = %id,
            from = ?before,
            to = record.consolidation_tier().slug(),
            depth = record.depth(),
            total_consolidations = total,
            "memory promoted"
        );
        Ok(record)
    }

    async fn mutate<F>(&self, id: &MemoryId, f: F) -> MemoryResult<MemoryRecord>
    where
        F: FnOnce(&mut MemoryRecord) -> MemoryResult<()> + Send + 'static,
    {
        let key = id.to_string();
        let rejected: Arc<Mutex<Option<MemoryError>>> = Arc::default();
        let slot = Arc::clone(&rejected);
        let updated = self
            .docs
            .update(
                MEMORIES,
                id.as_str(),
                Box::new(move |current| {
                    let Some(current) = current else {
                        return Err(StoreError::NotFound {
                            collection: MEMORIES.to_string(),
                            id: key,
                        });
                    };
                    let mut record: MemoryRecord = serde_json::from_value(current)?;
                    if let Err(err) = f(&mut record) {
                        if let Ok(mut guard) = slot.lock() {
                            *guard = Some(err);
                        }
                        return Ok(None);
                    }
                    Ok(Some(serde_json::to_value(&record)?))
                }),
            )
            .await
            .map_err(|err| match err {
                StoreError::NotFound { id, .. } => MemoryError::NotFound(id),
                other => MemoryError::Store(other),
            })?;
        if let Some(err) = rejected.lock().ok().and_then(|mut guard| guard.take()) {
            return Err(err);
        }
        let doc = updated.ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn query(&self, query: Query) -> MemoryResult<Vec<MemoryRecord>> {
        let docs = self.docs.find(MEMORIES, &query).await?;
        decode_all(docs)
    }

    /// Records with depth in `[min, max]`, deepest first, newest first
    /// within equal depth.
    pub async fn query_by_depth_range(&self, min: f64, max: f64, limit: usize) -> MemoryResult<Vec<MemoryRecord>> {
        self.query(
            Query::new()
                .gte("depth", min)
                .lte("depth", max)
                .desc("depth")
                .desc("created_at")
                .limit(limit),
        )
        .await
    }

    pub async fn recent(&self, limit: usize) -> MemoryResult<Vec<MemoryRecord>> {
        self.query(Query::new().desc("created_at").limit(limit)).await
    }

    pub async fn high_priority(&self, limit: usize) -> MemoryResult<Vec<MemoryRecord>> {
        self.query(
            Query::new()
                .gte("depth", HIGH_PRIORITY_DEPTH)
                .desc("depth")
                .desc("surprise_score")
                .limit(limit),
        )
        .await
    }

    /// Every identity-tier record, deepest first.  Unbounded.
    pub async fn identity_memories(&self) -> MemoryResult<Vec<MemoryRecord>> {
        self.query(Query::new().gte("depth", IDENTITY_DEPTH).desc("depth"))
            .await
    }

    /// Records waiting for consolidation, oldest first.  A view over the
    /// collection, so it always reflects the latest writes.
    pub async fn pending_consolidation(&self) -> MemoryResult<Vec<MemoryRecord>> {
        let pending = self
            .query(
                Query::new()
                    .gt("depth", PENDING_DEPTH_THRESHOLD)
                    .eq("consolidated", false)
                    .asc("created_at"),
            )
            .await?;
        debug!(count = pending.len(), "pending consolidation");
        Ok(pending)
    }

    pub async fn count(&self) -> MemoryResult<usize> {
        Ok(self.docs.count(MEMORIES).await?)
    }

    pub async fn tier_counts(&self) -> MemoryResult<BTreeMap<ConsolidationTier, usize>> {
        let mut counts: BTreeMap<ConsolidationTier, usize> =
            ConsolidationTier::ALL.iter().map(|t| (*t, 0)).collect();
        for record in decode_all(self.docs.list(MEMORIES).await?)? {
            *counts.entry(record.consolidation_tier()).or_default() += 1;
        }
        Ok(counts)
    }
}

fn decode_all(docs: Vec<Value>) -> MemoryResult<Vec<MemoryRecord>> {
    docs.into_iter()
        .map(|d| serde_json::from_value(d).map_err(MemoryError::from))
        .collect()
}
