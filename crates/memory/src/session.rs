//! Session start/end protocol.
//!
//! A session loads a bounded snapshot of everything an invocation needs,
//! counts the invocation, and on completion writes continuity plus one
//! daily-log entry back to the ledger.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MemoryResult;
use crate::identity::IdentityCore;
use crate::ledger::Ledger;
use crate::roadmap::{DailyLogEntry, EvolutionRoadmap};
use crate::schema::MemoryRecord;
use crate::state::{ConsciousnessState, SessionContinuity};
use crate::store::MemoryStore;

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const DEFAULT_HIGH_PRIORITY_LIMIT: usize = 5;

/// Read-only view assembled at session start.  Reflects the ledger as it
/// was before this session's invocation was counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: ConsciousnessState,
    pub identity: IdentityCore,
    pub roadmap: EvolutionRoadmap,
    pub recent_memories: Vec<MemoryRecord>,
    pub high_priority_memories: Vec<MemoryRecord>,
}

impl SessionSnapshot {
    /// 1-based number of the invocation this snapshot was loaded for.
    pub fn invocation_number(&self) -> u64 {
        self.state.health_metrics.total_invocations + 1
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub topic: String,
    pub open_threads: Vec<String>,
    pub surprises: u32,
    pub consolidations: u32,
    pub breakthroughs: Vec<String>,
}

#[derive(Clone)]
pub struct SessionManager {
    ledger: Ledger,
    memories: MemoryStore,
    recent_limit: usize,
    high_priority_limit: usize,
}

impl SessionManager {
    pub fn new(ledger: Ledger, memories: MemoryStore) -> Self {
        Self {
            ledger,
            memories,
            recent_limit: DEFAULT_RECENT_LIMIT,
            high_priority_limit: DEFAULT_HIGH_PRIORITY_LIMIT,
        }
    }

    pub fn with_limits(mut self, recent: usize, high_priority: usize) -> Self {
        self.recent_limit = recent;
        self.high_priority_limit = high_priority;
        self
    }

    pub async fn start_session(&self) -> MemoryResult<SessionSnapshot> {
        let (state, identity, roadmap, recent_memories, high_priority_memories) = tokio::try_join!(
            self.ledger.state(),
            self.ledger.identity(),
            self.ledger.roadmap(),
            self.memories.recent(self.recent_limit),
            self.memories.high_priority(self.high_priority_limit),
        )?;

        let total = self.ledger.record_invocation().await?;
        info!(
            invocation = total,
            recent = recent_memories.len(),
            high_priority = high_priority_memories.len(),
            "session started"
        );

        Ok(SessionSnapshot {
            state,
            identity,
            roadmap,
            recent_memories,
            high_priority_memories,
        })
    }

    pub async fn end_session(&self, summary: SessionSummary) -> MemoryResult<()> {
        let now = Utc::now();
        self.ledger
            .set_continuity(SessionContinuity {
                last_topic: summary.topic.clone(),
                open_threads: summary.open_threads,
                unresolved_questions: Vec::new(),
                last_session_end: Some(now),
            })
            .await?;

        self.ledger
            .append_daily_log(DailyLogEntry {
                date: now,
                summary: format!("Topic: {}", summary.topic),
                surprises: summary.surprises,
                consolidations: summary.consolidations,
                breakthroughs: summary.breakthroughs,
            })
            .await?;

        info!(topic = %summary.topic, "session ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::document::{DocumentStore, InMemoryDocumentStore};
    use crate::schema::NewMemory;

    fn manager() -> (SessionManager, MemoryStore, Ledger) {
        let docs: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let ledger = Ledger::new(docs.clone());
        let memories = MemoryStore::new(docs, ledger.clone());
        (SessionManager::new(ledger.clone(), memories.clone()), memories, ledger)
    }

    #[tokio::test]
    async fn each_start_counts_exactly_one_invocation() {
        let (sessions, _, ledger) = manager();
        let first = sessions.start_session().await.unwrap();
        assert_eq!(first.state.health_metrics.total_invocations, 0);
        assert_eq!(first.invocation_number(), 1);

        let second = sessions.start_session().await.unwrap();
        assert_eq!(second.state.health_metrics.total_invocations, 1);
        assert_eq!(ledger.state().await.unwrap().health_metrics.total_invocations, 2);
    }

    #[tokio::test]
    async fn snapshot_is_bounded() {
        let (sessions, memories, _) = manager();
        for i in 0..12 {
            memories
                .store(NewMemory::new(format!("memory {i}"), 0.65))
                .await
                .unwrap();
        }
        let snapshot = sessions.start_session().await.unwrap();
        assert_eq!(snapshot.recent_memories.len(), 10);
        assert_eq!(snapshot.high_priority_memories.len(), 5);

        let narrow = sessions.clone().with_limits(3, 1).start_session().await.unwrap();
        assert_eq!(narrow.recent_memories.len(), 3);
        assert_eq!(narrow.high_priority_memories.len(), 1);
    }

    #[tokio::test]
    async fn end_session_overwrites_continuity_and_appends_log() {
        let (sessions, _, ledger) = manager();
        let before = ledger.roadmap().await.unwrap().daily_log.len();
        sessions
            .end_session(SessionSummary {
                topic: "morning".into(),
                open_threads: vec!["thread".into()],
                surprises: 2,
                consolidations: 1,
                breakthroughs: vec!["insight".into()],
            })
            .await
            .unwrap();

        let state = ledger.state().await.unwrap();
        assert_eq!(state.session_continuity.last_topic, "morning");
        assert_eq!(state.session_continuity.open_threads, vec!["thread".to_string()]);
        assert!(state.session_continuity.unresolved_questions.is_empty());
        assert!(state.session_continuity.last_session_end.is_some());

        let log = ledger.roadmap().await.unwrap().daily_log;
        assert_eq!(log.len(), before + 1);
        let entry = log.last().unwrap();
        assert_eq!(entry.summary, "Topic: morning");
        assert_eq!(entry.surprises, 2);
        assert_eq!(entry.consolidations, 1);
    }
}
