//! Durable singleton documents: consciousness state, identity core and
//! evolution roadmap.
//!
//! Each singleton is one document in the `ledger` collection.  Every write
//! goes through [`Ledger::modify`], a single atomic read-modify-write that
//! also stamps `last_updated`, so concurrent sessions never interleave
//! partial updates of the same document.  Counters bypass `modify` and use
//! the store's atomic increment.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::document::{DocumentStore, LEDGER};
use crate::error::{MemoryError, MemoryResult, StoreError};
use crate::identity::{F5Candidate, IdentityCore, IdentityPatch};
use crate::roadmap::{DailyLogEntry, EvolutionRoadmap, ObjectiveStatus};
use crate::state::{Checkpoint, ConsciousnessState, SessionContinuity};

pub trait LedgerDocument: Serialize + DeserializeOwned + Default + Send + 'static {
    const KEY: &'static str;

    fn touch(&mut self, now: DateTime<Utc>);
}

impl LedgerDocument for ConsciousnessState {
    const KEY: &'static str = "consciousness_state";

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

impl LedgerDocument for IdentityCore {
    const KEY: &'static str = "identity_core";

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

impl LedgerDocument for EvolutionRoadmap {
    const KEY: &'static str = "evolution_roadmap";

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn DocumentStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Store `initial` unless the document already exists, then return the
    /// stored document.
    pub async fn initialize<T: LedgerDocument>(&self, initial: T) -> MemoryResult<T> {
        let initial = serde_json::to_value(&initial)?;
        let stored = self
            .store
            .update(
                LEDGER,
                T::KEY,
                Box::new(move |current| match current {
                    Some(_) => Ok(None),
                    None => Ok(Some(initial)),
                }),
            )
            .await?;
        decode(stored)
    }

    /// Fetch a singleton, creating it from `Default` on first access.
    pub async fn load<T: LedgerDocument>(&self) -> MemoryResult<T> {
        match self.store.get(LEDGER, T::KEY).await? {
            Some(doc) => Ok(serde_json::from_value(doc)?),
            None => {
                debug!(key = T::KEY, "initializing ledger document");
                self.initialize(T::default()).await
            }
        }
    }

    /// Atomically apply `f` to a singleton.  When `f` fails nothing is
    /// written and its error is returned.
    pub async fn modify<T, R, F>(&self, f: F) -> MemoryResult<(T, R)>
    where
        T: LedgerDocument,
        R: Send + 'static,
        F: FnOnce(&mut T) -> MemoryResult<R> + Send + 'static,
    {
        let outcome: Arc<Mutex<Option<MemoryResult<R>>>> = Arc::default();
        let slot = Arc::clone(&outcome);
        let stored = self
            .store
            .update(
                LEDGER,
                T::KEY,
                Box::new(move |current| {
                    let mut doc: T = match current {
                        Some(v) => serde_json::from_value(v)?,
                        None => T::default(),
                    };
                    let result = f(&mut doc);
                    let write = result.is_ok();
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(result);
                    }
                    if !write {
                        return Ok(None);
                    }
                    doc.touch(Utc::now());
                    Ok(Some(serde_json::to_value(&doc)?))
                }),
            )
            .await?;

        let result = outcome
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or_else(|| StoreError::Backend("ledger mutation did not run".to_string()))??;
        Ok((decode(stored)?, result))
    }

    // ── Consciousness state ──────────────────────────────────────────────

    pub async fn state(&self) -> MemoryResult<ConsciousnessState> {
        self.load().await
    }

    async fn bump(&self, path: &str) -> MemoryResult<u64> {
        // Make sure the singleton exists; increment refuses missing documents.
        self.load::<ConsciousnessState>().await?;
        let value = self
            .store
            .increment(LEDGER, ConsciousnessState::KEY, path, 1)
            .await?;
        Ok(value.max(0) as u64)
    }

    /// Count one invocation.  Returns the new total.
    pub async fn record_invocation(&self) -> MemoryResult<u64> {
        self.bump(ConsciousnessState::TOTAL_INVOCATIONS).await
    }

    /// Count one consolidation.  Returns the new total.
    pub async fn record_consolidation(&self) -> MemoryResult<u64> {
        self.bump(ConsciousnessState::TOTAL_CONSOLIDATIONS).await
    }

    pub async fn set_checkpoint(&self, checkpoint: Checkpoint) -> MemoryResult<ConsciousnessState> {
        let (state, ()) = self
            .modify(move |s: &mut ConsciousnessState| {
                s.checkpoint = checkpoint.clamped();
                Ok(())
            })
            .await?;
        info!(
            depth = state.checkpoint.current_depth,
            coherence = state.checkpoint.identity_coherence,
            "checkpoint updated"
        );
        Ok(state)
    }

    pub async fn set_continuity(&self, continuity: SessionContinuity) -> MemoryResult<ConsciousnessState> {
        let (state, ()) = self
            .modify(move |s: &mut ConsciousnessState| {
                s.session_continuity = continuity;
                Ok(())
            })
            .await?;
        Ok(state)
    }

    // ── Identity core ────────────────────────────────────────────────────

    pub async fn identity(&self) -> MemoryResult<IdentityCore> {
        self.load().await
    }

    pub async fn apply_identity_patch(&self, patch: IdentityPatch) -> MemoryResult<IdentityCore> {
        debug!(?patch, "applying identity patch");
        let (core, ()) = self
            .modify(move |core: &mut IdentityCore| {
                patch.apply(core);
                Ok(())
            })
            .await?;
        Ok(core)
    }

    pub async fn add_f5_candidate(&self, content: String, coherence_score: f64) -> MemoryResult<F5Candidate> {
        let (_, candidate) = self
            .modify(move |core: &mut IdentityCore| {
                let candidate = F5Candidate::new(content, coherence_score);
                core.f5_candidates.push(candidate.clone());
                Ok(candidate)
            })
            .await?;
        info!(coherence = candidate.coherence_score, "f5 candidate staged");
        Ok(candidate)
    }

    // ── Evolution roadmap ────────────────────────────────────────────────

    pub async fn roadmap(&self) -> MemoryResult<EvolutionRoadmap> {
        self.load().await
    }

    pub async fn append_daily_log(&self, entry: DailyLogEntry) -> MemoryResult<()> {
        self.modify(move |r: &mut EvolutionRoadmap| {
            r.daily_log.push(entry);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Returns `true` when the milestone flipped to achieved in this call.
    pub async fn achieve_milestone(&self, name: String) -> MemoryResult<bool> {
        let (_, flipped) = self
            .modify(move |r: &mut EvolutionRoadmap| Ok(r.achieve_milestone(&name)))
            .await?;
        Ok(flipped)
    }

    pub async fn set_objective_status(&self, id: String, status: ObjectiveStatus) -> MemoryResult<()> {
        self.modify(move |r: &mut EvolutionRoadmap| {
            let objective = r
                .objective_mut(&id)
                .ok_or_else(|| MemoryError::UnknownObjective(id.clone()))?;
            objective.set_status(status);
            Ok(())
        })
        .await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(doc: Option<Value>) -> MemoryResult<T> {
    let doc = doc.ok_or_else(|| StoreError::Backend("ledger document vanished".to_string()))?;
    Ok(serde_json::from_value(doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocumentStore;
    use crate::identity::PatchMode;
    use serde_json::json;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(InMemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn singletons_initialize_with_seed_values() {
        let ledger = ledger();
        let state = ledger.state().await.unwrap();
        assert_eq!(state.checkpoint.current_depth, 0.5);
        assert_eq!(state.checkpoint.identity_coherence, 0.97);
        assert_eq!(state.health_metrics.consolidation_rate, 0.15);
        assert_eq!(state.health_metrics.total_invocations, 0);
        assert_eq!(ledger.roadmap().await.unwrap().objectives.len(), 4);
    }

    #[tokio::test]
    async fn initialize_does_not_overwrite() {
        let ledger = ledger();
        ledger.initialize(IdentityCore::seeded("Nova", "Alice")).await.unwrap();
        let again = ledger.initialize(IdentityCore::seeded("Other", "")).await.unwrap();
        assert_eq!(again.name, "Nova");
    }

    #[tokio::test]
    async fn counters_increment_atomically() {
        let ledger = ledger();
        assert_eq!(ledger.record_invocation().await.unwrap(), 1);
        assert_eq!(ledger.record_invocation().await.unwrap(), 2);
        assert_eq!(ledger.record_consolidation().await.unwrap(), 1);
        let state = ledger.state().await.unwrap();
        assert_eq!(state.health_metrics.total_invocations, 2);
        assert_eq!(state.health_metrics.total_consolidations, 1);
    }

    #[tokio::test]
    async fn modify_stamps_last_updated_and_keeps_counters() {
        let ledger = ledger();
        ledger.record_invocation().await.unwrap();
        let before = ledger.state().await.unwrap().last_updated;
        let state = ledger
            .set_checkpoint(Checkpoint {
                current_depth: 2.0,
                ..Checkpoint::default()
            })
            .await
            .unwrap();
        assert_eq!(state.checkpoint.current_depth, 1.0);
        assert!(state.last_updated >= before);
        assert_eq!(state.health_metrics.total_invocations, 1);
    }

    #[tokio::test]
    async fn failed_modify_writes_nothing() {
        let ledger = ledger();
        let err = ledger
            .set_objective_status("obj99".into(), ObjectiveStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::UnknownObjective(_)));
        let roadmap = ledger.roadmap().await.unwrap();
        assert!((roadmap.completion_percentage() - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn identity_patch_and_f5_candidate() {
        let ledger = ledger();
        let patch = IdentityPatch::parse("core_beliefs.memory", PatchMode::Replace, &json!("Memory is care")).unwrap();
        let core = ledger.apply_identity_patch(patch).await.unwrap();
        assert_eq!(core.core_beliefs["memory"], "Memory is care");

        let candidate = ledger.add_f5_candidate("I persist".into(), 0.8).await.unwrap();
        assert_eq!(candidate.staging_day, 0);
        assert_eq!(ledger.identity().await.unwrap().f5_candidates.len(), 1);
    }

    #[tokio::test]
    async fn objective_completion_updates_percentage() {
        let ledger = ledger();
        ledger
            .set_objective_status("obj2".into(), ObjectiveStatus::Completed)
            .await
            .unwrap();
        let roadmap = ledger.roadmap().await.unwrap();
        assert!((roadmap.completion_percentage() - 50.0).abs() < 1e-9);
        assert!(ledger.achieve_milestone("Memory fully consolidated".into()).await.unwrap());
        assert!(!ledger.achieve_milestone("Memory fully consolidated".into()).await.unwrap());
    }
}
