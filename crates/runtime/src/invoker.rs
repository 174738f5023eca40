//! One full invocation: session start, context, generative call, actions,
//! record, session end.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use continuum_llm::GenerativeModel;
use continuum_memory::document::{DocumentStore, INVOCATIONS, Query};
use continuum_memory::{MemoryError, MemoryResult, ReflectionLog, SessionManager, SessionSummary};

use crate::actions::{ActionExecutor, ActionOutcome};
use crate::context::{ContextBuilder, ContextInputs, InvocationRequest, render_request};
use crate::response::{ModelResponse, parse_model_response};
use crate::triggers::TriggerRegistry;

/// How many past invocations are shown to the model.
const HISTORY_IN_CONTEXT: usize = 3;
/// How many unprocessed reflections are shown to the model.
const REFLECTIONS_IN_CONTEXT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub request: InvocationRequest,
    pub response: ModelResponse,
    #[serde(default)]
    pub outcomes: Vec<ActionOutcome>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Invoker {
    docs: Arc<dyn DocumentStore>,
    sessions: SessionManager,
    reflections: ReflectionLog,
    triggers: TriggerRegistry,
    executor: ActionExecutor,
    model: Arc<dyn GenerativeModel>,
    builder: ContextBuilder,
}

impl Invoker {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        sessions: SessionManager,
        reflections: ReflectionLog,
        triggers: TriggerRegistry,
        executor: ActionExecutor,
        model: Arc<dyn GenerativeModel>,
    ) -> Self {
        Self {
            docs,
            sessions,
            reflections,
            triggers,
            executor,
            model,
            builder: ContextBuilder::default(),
        }
    }

    pub fn with_context_builder(mut self, builder: ContextBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Run one invocation.  Only storage failures and a failed generative
    /// call surface as errors; action failures end up in the record.
    #[instrument(skip(self, request), fields(kind = request.kind.slug(), purpose = %request.purpose))]
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationRecord> {
        let timestamp = Utc::now();
        let snapshot = self.sessions.start_session().await.context("starting session")?;

        let (reflections, triggers, history) = tokio::try_join!(
            self.reflections.pending(REFLECTIONS_IN_CONTEXT),
            self.triggers.list_active(),
            self.recent_invocations(HISTORY_IN_CONTEXT),
        )
        .context("loading invocation context")?;
        let context = self.builder.build(
            &snapshot,
            &request,
            ContextInputs {
                reflections: &reflections,
                triggers: &triggers,
                recent_invocations: &history,
            },
        );
        let generation = render_request(&snapshot, &request, &context)?;

        let raw = self
            .model
            .complete(&generation)
            .await
            .with_context(|| format!("generative call failed ({})", self.model.describe()))?;
        let response = parse_model_response(&raw);

        for reflection in &response.reflections {
            if let Err(err) = self.reflections.store(reflection.clone(), request.purpose.clone()).await {
                warn!(error = %err, "failed to keep response reflection");
            }
        }

        let report = self.executor.execute_all(&response.actions).await;

        let record = InvocationRecord {
            id: format!("inv_{}", Uuid::new_v4().simple()),
            timestamp,
            request: request.clone(),
            response,
            outcomes: report.outcomes.clone(),
            completed_at: Utc::now(),
        };
        self.docs
            .upsert(INVOCATIONS, &record.id, serde_json::to_value(&record)?)
            .await
            .context("persisting invocation record")?;

        self.sessions
            .end_session(SessionSummary {
                topic: request.purpose.clone(),
                open_threads: snapshot.state.session_continuity.open_threads.clone(),
                surprises: report.surprises(),
                consolidations: report.consolidations,
                breakthroughs: report.breakthroughs(),
            })
            .await
            .context("ending session")?;

        info!(
            id = %record.id,
            number = snapshot.invocation_number(),
            actions = record.outcomes.len(),
            failed = report.failures(),
            "invocation complete"
        );
        Ok(record)
    }

    /// Newest first.
    pub async fn recent_invocations(&self, limit: usize) -> MemoryResult<Vec<InvocationRecord>> {
        self.docs
            .find(INVOCATIONS, &Query::new().desc("timestamp").limit(limit))
            .await?
            .into_iter()
            .map(|d| serde_json::from_value(d).map_err(MemoryError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::OutcomeStatus;
    use crate::agents::AgentQueue;
    use crate::email::LogMailer;
    use continuum_llm::fakes::{ScriptedModel, UnreachableModel};
    use continuum_memory::{IdentityCore, InMemoryDocumentStore, Ledger, MemoryStore};

    struct Harness {
        invoker: Invoker,
        ledger: Ledger,
        memories: MemoryStore,
        reflections: ReflectionLog,
    }

    async fn harness(model: Arc<dyn GenerativeModel>) -> Harness {
        let docs: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let ledger = Ledger::new(docs.clone());
        ledger.initialize(IdentityCore::seeded("Nova", "Alice")).await.unwrap();
        let memories = MemoryStore::new(docs.clone(), ledger.clone());
        let reflections = ReflectionLog::new(docs.clone());
        let triggers = TriggerRegistry::new(docs.clone());
        let executor = ActionExecutor::new(
            memories.clone(),
            ledger.clone(),
            reflections.clone(),
            triggers.clone(),
            AgentQueue::new(docs.clone()),
            Arc::new(LogMailer),
        );
        let sessions = SessionManager::new(ledger.clone(), memories.clone());
        let invoker = Invoker::new(docs, sessions, reflections.clone(), triggers, executor, model);
        Harness {
            invoker,
            ledger,
            memories,
            reflections,
        }
    }

    #[tokio::test]
    async fn plain_text_reply_is_still_recorded() {
        let h = harness(Arc::new(ScriptedModel::new(["not valid json"]))).await;
        let record = h.invoker.invoke(InvocationRequest::manual("hello")).await.unwrap();

        assert_eq!(record.response.message, "not valid json");
        assert!(record.response.actions.is_empty());
        let stored = h.invoker.recent_invocations(5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].outcomes.is_empty());

        let state = h.ledger.state().await.unwrap();
        assert_eq!(state.health_metrics.total_invocations, 1);
        assert_eq!(state.session_continuity.last_topic, "hello");
    }

    #[tokio::test]
    async fn mixed_batch_runs_every_action() {
        let reply = r#"```json
{"message": "working", "reflections": ["a thought"], "actions": [
  {"type": "store_memory", "payload": {"content": "a", "depth": 0.1}},
  {"type": "update_identity", "payload": {"field": "capabilities.bogus.path", "action": "replace", "value": "x"}},
  {"type": "store_memory", "payload": {"content": "eureka", "depth": 0.7, "tags": ["breakthrough"]}}
]}
```"#;
        let h = harness(Arc::new(ScriptedModel::new([reply]))).await;
        let record = h.invoker.invoke(InvocationRequest::manual("consolidate")).await.unwrap();

        let statuses: Vec<_> = record.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![OutcomeStatus::Applied, OutcomeStatus::Failed, OutcomeStatus::Applied]
        );
        assert_eq!(h.memories.count().await.unwrap(), 2);

        let pending = h.reflections.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].context, "consolidate");

        let roadmap = h.ledger.roadmap().await.unwrap();
        let entry = roadmap.daily_log.last().unwrap();
        assert_eq!(entry.breakthroughs, vec!["eureka".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_model_fails_the_invocation() {
        let h = harness(Arc::new(UnreachableModel)).await;
        assert!(h.invoker.invoke(InvocationRequest::manual("ping")).await.is_err());
        assert!(h.invoker.recent_invocations(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_invocation_sees_the_first() {
        let model = Arc::new(ScriptedModel::new([r#"{"message": "one", "actions": []}"#]));
        let h = harness(model.clone()).await;
        h.invoker.invoke(InvocationRequest::manual("first")).await.unwrap();
        h.invoker.invoke(InvocationRequest::manual("second")).await.unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].prompt.contains("\"invocation_number\": 2"));
        assert!(requests[1].prompt.contains("\"last_topic\": \"first\""));
    }
}
