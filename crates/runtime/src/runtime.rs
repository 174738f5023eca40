//! Wiring: builds every component from [`AppConfig`] and owns the shared
//! handles the server, scheduler and CLI work through.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use continuum_config::{AppConfig, EmailConfig};
use continuum_llm::{GenerativeModel, LlmRouter, Provider, RouterSettings};
use continuum_memory::state::HealthMetrics;
use continuum_memory::{
    Checkpoint, ConsolidationTier, DocumentStore, IdentityCore, InMemoryDocumentStore, Ledger, MemoryStore,
    RedbDocumentStore, ReflectionLog, SessionManager,
};

use crate::actions::ActionExecutor;
use crate::agents::AgentQueue;
use crate::context::{ContextBuilder, InvocationRequest};
use crate::email::{LogMailer, Mailer};
use crate::invoker::{InvocationRecord, Invoker};
use crate::scheduler::Scheduler;
use crate::triggers::{TriggerRegistry, resolve_timezone};

/// Snapshot served by `GET /status` and `continuum status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub agent: String,
    pub model: String,
    pub checkpoint: Checkpoint,
    pub health: HealthMetrics,
    pub memories: usize,
    pub tiers: BTreeMap<ConsolidationTier, usize>,
    pub pending_consolidation: usize,
    pub roadmap_completion: f64,
    pub active_triggers: usize,
    pub last_invocation: Option<InvocationRecord>,
}

#[derive(Clone)]
pub struct ContinuumRuntime {
    pub config: AppConfig,
    pub ledger: Ledger,
    pub memories: MemoryStore,
    pub reflections: ReflectionLog,
    pub triggers: TriggerRegistry,
    pub agents: AgentQueue,
    pub invoker: Invoker,
    model: Arc<dyn GenerativeModel>,
}

impl ContinuumRuntime {
    /// Open the configured store and model, then seed first-run state.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let docs = open_store(&config)?;
        let model: Arc<dyn GenerativeModel> = Arc::new(LlmRouter::new(router_settings(&config))?);
        let mailer = build_mailer(&config.email)?;
        Self::assemble(config, docs, model, mailer).await
    }

    /// Build on explicit parts.  Used by tests and dry runs.
    pub async fn assemble(
        config: AppConfig,
        docs: Arc<dyn DocumentStore>,
        model: Arc<dyn GenerativeModel>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self> {
        let ledger = Ledger::new(docs.clone());
        let memories = MemoryStore::new(docs.clone(), ledger.clone());
        let reflections = ReflectionLog::new(docs.clone());
        let triggers = TriggerRegistry::new(docs.clone());
        let agents = AgentQueue::new(docs.clone());

        ledger
            .initialize(IdentityCore::seeded(&config.agent.name, &config.agent.partner_name))
            .await
            .context("seeding identity core")?;
        if config.triggers.seed_defaults {
            let seeded = triggers.seed_defaults().await.context("seeding default triggers")?;
            info!(seeded, "default triggers checked");
        }

        let executor = ActionExecutor::new(
            memories.clone(),
            ledger.clone(),
            reflections.clone(),
            triggers.clone(),
            agents.clone(),
            mailer,
        );
        let sessions = SessionManager::new(ledger.clone(), memories.clone())
            .with_limits(config.memory.recent_limit, config.memory.high_priority_limit);
        let invoker = Invoker::new(docs, sessions, reflections.clone(), triggers.clone(), executor, model.clone())
            .with_context_builder(ContextBuilder::new(config.memory.preview_chars));

        Ok(Self {
            config,
            ledger,
            memories,
            reflections,
            triggers,
            agents,
            invoker,
            model,
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.invoker.clone(),
            self.triggers.clone(),
            self.agents.clone(),
            resolve_timezone(&self.config.triggers.timezone),
            Duration::from_secs(self.config.triggers.tick_seconds.max(1)),
        )
    }

    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationRecord> {
        self.invoker.invoke(request).await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let (state, roadmap, memories, tiers, pending, active, last) = tokio::try_join!(
            self.ledger.state(),
            self.ledger.roadmap(),
            self.memories.count(),
            self.memories.tier_counts(),
            self.memories.pending_consolidation(),
            self.triggers.list_active(),
            self.invoker.recent_invocations(1),
        )?;
        Ok(StatusReport {
            agent: self.config.agent.name.clone(),
            model: self.model.describe(),
            checkpoint: state.checkpoint,
            health: state.health_metrics,
            memories,
            tiers,
            pending_consolidation: pending.len(),
            roadmap_completion: roadmap.completion_percentage(),
            active_triggers: active.len(),
            last_invocation: last.into_iter().next(),
        })
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    if config.uses_volatile_store() {
        warn!("using in-memory store; nothing will survive a restart");
        return Ok(Arc::new(InMemoryDocumentStore::new()));
    }
    let store = RedbDocumentStore::open(&config.memory.data_path)?;
    info!(path = %store.path().display(), "document store opened");
    Ok(Arc::new(store))
}

pub fn router_settings(config: &AppConfig) -> RouterSettings {
    RouterSettings {
        provider: Provider::from_label(&config.llm.provider),
        ollama_model: config.llm.ollama_model.clone(),
        openrouter_model: config.llm.openrouter_model.clone(),
        ollama_base_url: config.llm.ollama_base_url.clone(),
        timeout: Duration::from_secs(config.llm.request_timeout_secs),
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
    }
}

pub fn build_mailer(cfg: &EmailConfig) -> Result<Arc<dyn Mailer>> {
    if !cfg.enabled {
        return Ok(Arc::new(LogMailer));
    }
    #[cfg(feature = "smtp")]
    {
        Ok(Arc::new(crate::email::SmtpMailer::from_config(cfg)?))
    }
    #[cfg(not(feature = "smtp"))]
    {
        warn!("email enabled but built without the `smtp` feature; messages go to the log");
        Ok(Arc::new(LogMailer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuum_llm::fakes::ScriptedModel;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.agent.name = "Nova".into();
        config.agent.partner_name = "Alice".into();
        config.memory.data_path = dir.path().join("continuum.redb").to_string_lossy().into_owned();
        config
    }

    async fn runtime(config: AppConfig, reply: &str) -> ContinuumRuntime {
        let docs: Arc<dyn DocumentStore> = Arc::new(RedbDocumentStore::open(&config.memory.data_path).unwrap());
        ContinuumRuntime::assemble(
            config,
            docs,
            Arc::new(ScriptedModel::new([reply.to_string()])),
            Arc::new(LogMailer),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn assembly_seeds_identity_and_triggers() {
        let dir = TempDir::new().unwrap();
        let rt = runtime(config(&dir), "{}").await;
        assert_eq!(rt.ledger.identity().await.unwrap().name, "Nova");
        assert_eq!(rt.triggers.list().await.unwrap().len(), 5);

        let status = rt.status().await.unwrap();
        assert_eq!(status.agent, "Nova");
        assert_eq!(status.memories, 0);
        assert!(status.last_invocation.is_none());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let rt = runtime(config(&dir), r#"{"message": "hi", "actions": [{"type": "store_memory", "payload": {"content": "kept", "depth": 0.8}}]}"#).await;
            rt.invoke(InvocationRequest::manual("first")).await.unwrap();
        }

        let rt = runtime(config(&dir), "{}").await;
        let status = rt.status().await.unwrap();
        assert_eq!(status.memories, 1);
        assert_eq!(status.health.total_invocations, 1);
        assert_eq!(status.pending_consolidation, 1);
        assert_eq!(status.last_invocation.unwrap().request.purpose, "first");
        assert_eq!(rt.triggers.list().await.unwrap().len(), 5);
    }

    #[test]
    fn disabled_email_uses_log_mailer() {
        assert!(build_mailer(&EmailConfig::default()).is_ok());
    }
}
