//! Action executor.
//!
//! Actions arrive as an ordered list of `{type, payload}` objects.  Each is
//! decoded into a typed [`Action`] and applied on its own: a failure is
//! logged and recorded in the report, and the batch moves on.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use continuum_memory::{
    Checkpoint, IdentityPatch, Ledger, MemoryError, MemoryId, MemoryRecord, MemoryStore, NewMemory,
    ObjectiveStatus, PatchMode, ReflectionLog, SurpriseFeatures, clamp_unit, score,
};

use crate::agents::AgentQueue;
use crate::email::{Email, Mailer};
use crate::response::RawAction;
use crate::triggers::{TriggerRegistry, TriggerSpec};

/// Stored memories at or above this surprise count as surprises for the
/// daily log.
pub const SURPRISE_THRESHOLD: f64 = 0.5;

const BREAKTHROUGH_TAG: &str = "breakthrough";

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid payload for {action}: {reason}")]
    InvalidPayload { action: &'static str, reason: String },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("mail delivery failed: {0}")]
    Mail(String),
    #[error("action entry has no `type`")]
    Untyped,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailPayload {
    #[serde(default)]
    pub subject: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreMemoryPayload {
    pub content: String,
    #[serde(default = "default_depth")]
    pub depth: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub connections: Vec<MemoryId>,
    #[serde(default, alias = "emotionalValence")]
    pub emotional_valence: f64,
    /// Precomputed score; wins over `surprise` when both are present.
    #[serde(default, alias = "surpriseScore")]
    pub surprise_score: Option<f64>,
    #[serde(default)]
    pub surprise: Option<SurpriseFeatures>,
}

impl StoreMemoryPayload {
    fn surprise(&self) -> f64 {
        match (self.surprise_score, &self.surprise) {
            (Some(direct), _) => clamp_unit(direct),
            (None, Some(features)) => score(features).total,
            (None, None) => 0.0,
        }
    }
}

fn default_depth() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReflectionPayload {
    pub content: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentPayload {
    #[serde(alias = "agentId")]
    pub agent_id: String,
    pub task: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityPayload {
    pub field: String,
    #[serde(default = "default_mode")]
    pub action: String,
    pub value: Value,
}

fn default_mode() -> String {
    "replace".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct F5Payload {
    pub content: String,
    #[serde(default, alias = "coherenceScore")]
    pub coherence_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidatePayload {
    #[serde(alias = "memoryId", alias = "id")]
    pub memory_id: MemoryId,
    #[serde(alias = "newDepth", alias = "new_depth")]
    pub depth: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectivePayload {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MilestonePayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogPayload {
    pub message: String,
}

/// A decoded action.
#[derive(Debug, Clone)]
pub enum Action {
    SendEmail(EmailPayload),
    CreateTrigger(TriggerSpec),
    StoreMemory(StoreMemoryPayload),
    StoreReflection(ReflectionPayload),
    InvokeAgent(AgentPayload),
    UpdateIdentity(IdentityPayload),
    AddF5Candidate(F5Payload),
    UpdateCheckpoint(Checkpoint),
    ConsolidateMemory(ConsolidatePayload),
    UpdateObjective(ObjectivePayload),
    AchieveMilestone(MilestonePayload),
    Log(LogPayload),
}

fn payload<T: DeserializeOwned>(action: &'static str, value: &Value) -> Result<T, ActionError> {
    serde_json::from_value(value.clone()).map_err(|e| ActionError::InvalidPayload {
        action,
        reason: e.to_string(),
    })
}

impl Action {
    /// `Ok(None)` for action types this executor does not know.
    pub fn decode(raw: &RawAction) -> Result<Option<Self>, ActionError> {
        let p = &raw.payload;
        let action = match raw.kind.as_str() {
            "" => return Err(ActionError::Untyped),
            "send_email" => Self::SendEmail(payload("send_email", p)?),
            "create_trigger" => Self::CreateTrigger(payload("create_trigger", p)?),
            "store_memory" => Self::StoreMemory(payload("store_memory", p)?),
            "store_reflection" => Self::StoreReflection(payload("store_reflection", p)?),
            "invoke_agent" => Self::InvokeAgent(payload("invoke_agent", p)?),
            "update_identity" => Self::UpdateIdentity(payload("update_identity", p)?),
            "add_f5_candidate" => Self::AddF5Candidate(payload("add_f5_candidate", p)?),
            "update_checkpoint" => Self::UpdateCheckpoint(payload("update_checkpoint", p)?),
            "consolidate_memory" => Self::ConsolidateMemory(payload("consolidate_memory", p)?),
            "update_objective" => Self::UpdateObjective(payload("update_objective", p)?),
            "achieve_milestone" => Self::AchieveMilestone(payload("achieve_milestone", p)?),
            "log" => Self::Log(payload("log", p)?),
            _ => return Ok(None),
        };
        Ok(Some(action))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Applied,
    Ignored,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What one batch did.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<ActionOutcome>,
    pub stored: Vec<MemoryRecord>,
    pub consolidations: u32,
    breakthrough_flags: Vec<bool>,
}

impl ExecutionReport {
    pub fn surprises(&self) -> u32 {
        self.stored
            .iter()
            .filter(|m| m.surprise_score >= SURPRISE_THRESHOLD)
            .count() as u32
    }

    pub fn breakthroughs(&self) -> Vec<String> {
        self.stored
            .iter()
            .zip(self.breakthrough_flags.iter().copied())
            .filter(|(m, flagged)| *flagged || m.tags.contains(BREAKTHROUGH_TAG))
            .map(|(m, _)| m.content.clone())
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .count()
    }
}

enum Effect {
    Done(Option<String>),
    Stored { record: MemoryRecord, breakthrough: bool },
    Consolidated(MemoryRecord),
}

#[derive(Clone)]
pub struct ActionExecutor {
    memories: MemoryStore,
    ledger: Ledger,
    reflections: ReflectionLog,
    triggers: TriggerRegistry,
    agents: AgentQueue,
    mailer: Arc<dyn Mailer>,
}

impl ActionExecutor {
    pub fn new(
        memories: MemoryStore,
        ledger: Ledger,
        reflections: ReflectionLog,
        triggers: TriggerRegistry,
        agents: AgentQueue,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            memories,
            ledger,
            reflections,
            triggers,
            agents,
            mailer,
        }
    }

    /// Apply every action in order.  Never fails as a whole.
    pub async fn execute_all(&self, actions: &[RawAction]) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for raw in actions {
            let outcome = match Action::decode(raw) {
                Ok(None) => {
                    debug!(action = %raw.kind, "ignoring unknown action");
                    ActionOutcome {
                        kind: raw.kind.clone(),
                        status: OutcomeStatus::Ignored,
                        detail: None,
                    }
                }
                Ok(Some(action)) => match self.apply(action).await {
                    Ok(effect) => {
                        let detail = match effect {
                            Effect::Done(detail) => detail,
                            Effect::Stored { record, breakthrough } => {
                                let id = record.id.to_string();
                                report.stored.push(record);
                                report.breakthrough_flags.push(breakthrough);
                                Some(id)
                            }
                            Effect::Consolidated(record) => {
                                report.consolidations += 1;
                                Some(format!("{} -> {}", record.id, record.consolidation_tier()))
                            }
                        };
                        ActionOutcome {
                            kind: raw.kind.clone(),
                            status: OutcomeStatus::Applied,
                            detail,
                        }
                    }
                    Err(err) => failed(raw, err),
                },
                Err(err) => failed(raw, err),
            };
            report.outcomes.push(outcome);
        }
        report
    }

    async fn apply(&self, action: Action) -> Result<Effect, ActionError> {
        match action {
            Action::SendEmail(p) => {
                let email = Email {
                    subject: p.subject,
                    content: p.content,
                };
                self.mailer
                    .send(&email)
                    .await
                    .map_err(|e| ActionError::Mail(format!("{e:#}")))?;
                Ok(Effect::Done(Some(email.subject)))
            }
            Action::CreateTrigger(spec) => {
                let trigger = self.triggers.upsert(spec).await?;
                Ok(Effect::Done(Some(trigger.id)))
            }
            Action::StoreMemory(p) => {
                let breakthrough = p.surprise.is_some_and(|f| f.is_breakthrough);
                let surprise = p.surprise();
                let input = NewMemory {
                    content: p.content,
                    depth: p.depth,
                    surprise_score: surprise,
                    emotional_valence: p.emotional_valence,
                    tags: p.tags,
                    connections: p.connections,
                };
                let record = self.memories.store(input).await?;
                Ok(Effect::Stored { record, breakthrough })
            }
            Action::StoreReflection(p) => {
                let reflection = self.reflections.store(p.content, p.context).await?;
                Ok(Effect::Done(Some(reflection.id)))
            }
            Action::InvokeAgent(p) => {
                let task = self.agents.enqueue(&p.agent_id, &p.task).await?;
                info!(agent = %p.agent_id, task_id = %task.id, "agent task queued");
                Ok(Effect::Done(Some(task.id)))
            }
            Action::UpdateIdentity(p) => {
                let mode = PatchMode::from_label(&p.action).ok_or_else(|| ActionError::InvalidPayload {
                    action: "update_identity",
                    reason: format!("unknown mode {:?}", p.action),
                })?;
                let patch = IdentityPatch::parse(&p.field, mode, &p.value)?;
                self.ledger.apply_identity_patch(patch).await?;
                Ok(Effect::Done(Some(p.field)))
            }
            Action::AddF5Candidate(p) => {
                self.ledger.add_f5_candidate(p.content, p.coherence_score).await?;
                Ok(Effect::Done(None))
            }
            Action::UpdateCheckpoint(checkpoint) => {
                self.ledger.set_checkpoint(checkpoint).await?;
                Ok(Effect::Done(None))
            }
            Action::ConsolidateMemory(p) => {
                let record = self.memories.promote(&p.memory_id, p.depth).await?;
                Ok(Effect::Consolidated(record))
            }
            Action::UpdateObjective(p) => {
                let status = ObjectiveStatus::from_label(&p.status).ok_or_else(|| ActionError::InvalidPayload {
                    action: "update_objective",
                    reason: format!("unknown status {:?}", p.status),
                })?;
                self.ledger.set_objective_status(p.id.clone(), status).await?;
                Ok(Effect::Done(Some(p.id)))
            }
            Action::AchieveMilestone(p) => {
                let flipped = self.ledger.achieve_milestone(p.name.clone()).await?;
                let detail = if flipped { p.name } else { format!("{} (unchanged)", p.name) };
                Ok(Effect::Done(Some(detail)))
            }
            Action::Log(p) => {
                info!(target: "continuum::agent", "{}", p.message);
                Ok(Effect::Done(None))
            }
        }
    }
}

fn failed(raw: &RawAction, err: ActionError) -> ActionOutcome {
    warn!(action = %raw.kind, error = %err, "action failed; continuing");
    ActionOutcome {
        kind: raw.kind.clone(),
        status: OutcomeStatus::Failed,
        detail: Some(err.to_string()),
    }
}
