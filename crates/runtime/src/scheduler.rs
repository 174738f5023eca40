//! Trigger scheduler and agent task dispatcher.
//!
//! A single background loop wakes every `tick` and fires each enabled
//! temporal trigger whose next occurrence after the previous tick has
//! passed.  The same tick drains queued agent tasks.  Nothing here stops
//! the loop except the shutdown signal.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentQueue, AgentTask, AgentTaskStatus, find_agent};
use crate::context::{InvocationKind, InvocationRequest};
use crate::invoker::{InvocationRecord, Invoker};
use crate::triggers::{TriggerDefinition, TriggerKind, TriggerRegistry, next_occurrence, parse_schedule};

/// Agent tasks dispatched per tick.
const AGENT_BATCH: usize = 5;

#[derive(Clone)]
pub struct Scheduler {
    invoker: Invoker,
    triggers: TriggerRegistry,
    agents: AgentQueue,
    timezone: Tz,
    tick: Duration,
}

impl Scheduler {
    pub fn new(invoker: Invoker, triggers: TriggerRegistry, agents: AgentQueue, timezone: Tz, tick: Duration) -> Self {
        Self {
            invoker,
            triggers,
            agents,
            timezone,
            tick,
        }
    }

    /// Run the loop on a background task until `shutdown_tx` sends `true`.
    pub fn spawn(self, shutdown_tx: &watch::Sender<bool>) -> JoinHandle<()> {
        let mut rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!(tick_secs = self.tick.as_secs(), tz = %self.timezone, "scheduler started");
            let mut prev = Utc::now();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.tick) => {
                        let now = Utc::now();
                        self.tick_once(prev, now).await;
                        self.dispatch_agent_tasks().await;
                        prev = now;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("scheduler stopped");
        })
    }

    /// Fire every temporal trigger due in `(prev, now]`.  Returns how many
    /// fired.
    pub async fn tick_once(&self, prev: DateTime<Utc>, now: DateTime<Utc>) -> usize {
        let active = match self.triggers.list_active().await {
            Ok(active) => active,
            Err(err) => {
                error!(error = %err, "could not list triggers");
                return 0;
            }
        };

        let mut fired = 0;
        for trigger in active.iter().filter(|t| t.kind == TriggerKind::Temporal) {
            let Some(expr) = trigger.schedule.as_deref() else {
                continue;
            };
            let schedule = match parse_schedule(expr) {
                Ok(schedule) => schedule,
                Err(err) => {
                    warn!(id = %trigger.id, error = %err, "skipping trigger with bad schedule");
                    continue;
                }
            };
            let due = next_occurrence(&schedule, prev, self.timezone).is_some_and(|next| next <= now);
            if !due {
                continue;
            }
            if self.fire(trigger, now, Map::new()).await.is_some() {
                fired += 1;
            }
        }
        fired
    }

    /// Fire every enabled event trigger listening for `event`.  `data` is
    /// merged into each trigger's context under `eventData`.
    pub async fn fire_event(&self, event: &str, data: Value) -> Result<Vec<InvocationRecord>> {
        let listeners: Vec<TriggerDefinition> = self
            .triggers
            .list_active()
            .await?
            .into_iter()
            .filter(|t| t.kind == TriggerKind::Event && t.event.as_deref() == Some(event))
            .collect();
        debug!(event, listeners = listeners.len(), "event received");

        let mut extra = Map::new();
        extra.insert("eventData".to_string(), data);
        let mut records = Vec::new();
        for trigger in &listeners {
            if let Some(record) = self.fire(trigger, Utc::now(), extra.clone()).await {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Mark a trigger fired and invoke with its purpose and context.
    /// Failures are logged and reported as `None`.
    pub async fn fire(&self, trigger: &TriggerDefinition, at: DateTime<Utc>, extra: Map<String, Value>) -> Option<InvocationRecord> {
        let trigger = match self.triggers.record_fired(&trigger.id, at).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(id = %trigger.id, error = %err, "could not record trigger firing");
                return None;
            }
        };
        info!(id = %trigger.id, fire_count = trigger.fire_count, "trigger fired");

        let mut request = InvocationRequest::from_trigger(&trigger);
        request.context.extend(extra);
        match self.invoker.invoke(request).await {
            Ok(record) => Some(record),
            Err(err) => {
                error!(id = %trigger.id, error = %format!("{err:#}"), "triggered invocation failed");
                None
            }
        }
    }

    /// Run queued agent tasks as their own invocations, oldest first.
    pub async fn dispatch_agent_tasks(&self) -> usize {
        let queued = match self.agents.queued(AGENT_BATCH).await {
            Ok(queued) => queued,
            Err(err) => {
                error!(error = %err, "could not read agent queue");
                return 0;
            }
        };

        let mut dispatched = 0;
        for task in queued {
            let outcome = self.run_agent_task(task.clone()).await;
            let error = outcome.err().map(|e| format!("{e:#}"));
            if let Some(err) = &error {
                warn!(task_id = %task.id, agent = %task.agent_id, error = %err, "agent task failed");
            }
            if let Err(err) = self.agents.finish(task, error).await {
                error!(error = %err, "could not close agent task");
            }
            dispatched += 1;
        }
        dispatched
    }

    async fn run_agent_task(&self, mut task: AgentTask) -> Result<InvocationRecord> {
        let agent = find_agent(&task.agent_id).ok_or_else(|| anyhow::anyhow!("unknown agent {}", task.agent_id))?;
        task.status = AgentTaskStatus::Running;
        self.agents.save(&task).await?;

        let mut context = Map::new();
        context.insert("agentId".to_string(), json!(agent.id));
        context.insert("agentName".to_string(), json!(agent.name));
        context.insert("agentPurpose".to_string(), json!(agent.purpose));
        context.insert("agentCapabilities".to_string(), json!(agent.capabilities));
        context.insert("task".to_string(), json!(task.task));
        context.insert("taskId".to_string(), json!(task.id));

        let request = InvocationRequest {
            kind: InvocationKind::AgentTask,
            purpose: format!("Agent {}: {}", agent.name, task.task),
            context,
            trigger_id: None,
        };
        self.invoker.invoke(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::actions::ActionExecutor;
    use crate::email::LogMailer;
    use crate::triggers::TriggerSpec;
    use chrono::TimeZone;
    use continuum_llm::GenerativeModel;
    use continuum_llm::fakes::ScriptedModel;
    use continuum_memory::{
        DocumentStore, InMemoryDocumentStore, Ledger, MemoryStore, ReflectionLog, SessionManager,
    };

    fn scheduler(model: Arc<dyn GenerativeModel>) -> Scheduler {
        let docs: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let ledger = Ledger::new(docs.clone());
        let memories = MemoryStore::new(docs.clone(), ledger.clone());
        let reflections = ReflectionLog::new(docs.clone());
        let triggers = TriggerRegistry::new(docs.clone());
        let agents = AgentQueue::new(docs.clone());
        let executor = ActionExecutor::new(
            memories.clone(),
            ledger.clone(),
            reflections.clone(),
            triggers.clone(),
            agents.clone(),
            Arc::new(LogMailer),
        );
        let invoker = Invoker::new(
            docs,
            SessionManager::new(ledger, memories),
            reflections,
            triggers.clone(),
            executor,
            model,
        );
        Scheduler::new(invoker, triggers, agents, chrono_tz::UTC, Duration::from_secs(30))
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn due_trigger_fires_once_per_window() {
        let model = Arc::new(ScriptedModel::new([r#"{"message": "good morning"}"#]));
        let s = scheduler(model.clone());
        s.triggers
            .upsert(TriggerSpec::temporal("Morning", "0 8 * * *", "wake up", json!({"slot": "am"})))
            .await
            .unwrap();

        assert_eq!(s.tick_once(at(7, 59, 0), at(7, 59, 30)).await, 0);
        assert_eq!(s.tick_once(at(7, 59, 30), at(8, 0, 0)).await, 1);
        assert_eq!(s.tick_once(at(8, 0, 0), at(8, 0, 30)).await, 0);

        let trigger = s.triggers.get("morning").await.unwrap().unwrap();
        assert_eq!(trigger.fire_count, 1);
        assert_eq!(trigger.last_fired, Some(at(8, 0, 0)));

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].trigger_kind, "temporal");
        assert_eq!(requests[0].trigger_id.as_deref(), Some("morning"));
        assert!(requests[0].prompt.contains("\"slot\": \"am\""));
    }

    #[tokio::test]
    async fn disabled_trigger_never_fires() {
        let s = scheduler(Arc::new(ScriptedModel::new(["{}"])));
        s.triggers
            .upsert(TriggerSpec::temporal("Every Minute", "* * * * *", "tick", Value::Null))
            .await
            .unwrap();
        s.triggers.set_enabled("every_minute", false).await.unwrap();
        assert_eq!(s.tick_once(at(9, 0, 0), at(9, 5, 0)).await, 0);
    }

    #[tokio::test]
    async fn events_reach_matching_listeners() {
        let model = Arc::new(ScriptedModel::new([r#"{"message": "read it"}"#]));
        let s = scheduler(model.clone());
        let spec: TriggerSpec = serde_json::from_value(json!({
            "name": "Diary Written",
            "type": "event",
            "event": "diary_entry",
            "purpose": "respond to the diary"
        }))
        .unwrap();
        s.triggers.upsert(spec).await.unwrap();

        let records = s.fire_event("diary_entry", json!({"title": "today"})).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request.context["eventData"]["title"], "today");
        assert!(s.fire_event("other", Value::Null).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queued_agent_tasks_are_dispatched() {
        let model = Arc::new(ScriptedModel::new([r#"{"message": "done"}"#]));
        let s = scheduler(model.clone());
        s.agents.enqueue("insight_generator", "connect today's notes").await.unwrap();
        s.agents.enqueue("ghost", "haunt").await.unwrap();

        assert_eq!(s.dispatch_agent_tasks().await, 2);
        assert!(s.agents.queued(10).await.unwrap().is_empty());

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].trigger_kind, "agent_task");
        assert!(requests[0].purpose.starts_with("Agent Insight Generator:"));
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let s = scheduler(Arc::new(ScriptedModel::new(["{}"])));
        let (tx, _rx) = watch::channel(false);
        let handle = s.spawn(&tx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
