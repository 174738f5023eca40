//! Invocation context assembly.
//!
//! Turns a session snapshot plus the request into the bounded payload that
//! is serialized into the generative call.  Memory content is truncated to
//! a fixed preview so the payload size does not grow with the store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use continuum_llm::GenerationRequest;
use continuum_memory::identity::Capabilities;
use continuum_memory::roadmap::Objective;
use continuum_memory::state::HealthMetrics;
use continuum_memory::{Checkpoint, MemoryRecord, Reflection, SessionSnapshot, truncate_str};

use crate::invoker::InvocationRecord;
use crate::triggers::{TriggerDefinition, TriggerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Temporal,
    Conditional,
    Event,
    Manual,
    AgentTask,
}

impl InvocationKind {
    pub fn slug(self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Conditional => "conditional",
            Self::Event => "event",
            Self::Manual => "manual",
            Self::AgentTask => "agent_task",
        }
    }
}

impl From<TriggerKind> for InvocationKind {
    fn from(kind: TriggerKind) -> Self {
        match kind {
            TriggerKind::Temporal => Self::Temporal,
            TriggerKind::Conditional => Self::Conditional,
            TriggerKind::Event => Self::Event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(rename = "type")]
    pub kind: InvocationKind,
    pub purpose: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub trigger_id: Option<String>,
}

impl InvocationRequest {
    pub fn manual(purpose: impl Into<String>) -> Self {
        Self {
            kind: InvocationKind::Manual,
            purpose: purpose.into(),
            context: Map::new(),
            trigger_id: None,
        }
    }

    pub fn from_trigger(trigger: &TriggerDefinition) -> Self {
        Self {
            kind: trigger.kind.into(),
            purpose: trigger.purpose.clone(),
            context: trigger.context.clone(),
            trigger_id: Some(trigger.id.clone()),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryView {
    pub id: String,
    pub content: String,
    pub depth: f64,
    pub tier: &'static str,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerView {
    pub kind: InvocationKind,
    pub purpose: String,
    pub trigger_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContinuityView {
    pub last_topic: String,
    pub open_threads: Vec<String>,
    pub last_session_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityView {
    pub name: String,
    pub capabilities: Capabilities,
    pub f5_candidates: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoadmapView {
    pub current_sprint: String,
    pub completion_percentage: f64,
    pub objectives: Vec<Objective>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTriggerView {
    pub id: String,
    pub name: String,
    pub kind: TriggerKind,
    pub schedule: Option<String>,
    pub fire_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PastInvocationView {
    pub timestamp: DateTime<Utc>,
    pub purpose: String,
    pub message: String,
    pub actions: usize,
}

/// The full payload sent with one generative call.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationContext {
    pub invocation_number: u64,
    pub current_time: DateTime<Utc>,
    pub trigger: TriggerView,
    pub checkpoint: Checkpoint,
    pub health: HealthMetrics,
    pub continuity: ContinuityView,
    pub identity: IdentityView,
    pub recent_memories: Vec<MemoryView>,
    pub high_priority_memories: Vec<MemoryView>,
    pub roadmap: RoadmapView,
    pub pending_reflections: Vec<String>,
    pub active_triggers: Vec<ScheduledTriggerView>,
    pub recent_invocations: Vec<PastInvocationView>,
    /// Caller-supplied context, passed through untouched.
    pub context: Map<String, Value>,
}

/// Everything besides the snapshot that feeds a context.
#[derive(Debug, Default)]
pub struct ContextInputs<'a> {
    pub reflections: &'a [Reflection],
    pub triggers: &'a [TriggerDefinition],
    pub recent_invocations: &'a [InvocationRecord],
}

#[derive(Debug, Clone)]
pub struct ContextBuilder {
    preview_chars: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self { preview_chars: 100 }
    }
}

impl ContextBuilder {
    pub fn new(preview_chars: usize) -> Self {
        Self { preview_chars }
    }

    fn preview(&self, text: &str) -> String {
        truncate_str(text, self.preview_chars).to_string()
    }

    fn memory_view(&self, record: &MemoryRecord) -> MemoryView {
        MemoryView {
            id: record.id.to_string(),
            content: self.preview(&record.content),
            depth: record.depth(),
            tier: record.consolidation_tier().slug(),
            tags: record.tags.clone(),
            created_at: record.created_at,
        }
    }

    pub fn build(
        &self,
        snapshot: &SessionSnapshot,
        request: &InvocationRequest,
        inputs: ContextInputs<'_>,
    ) -> InvocationContext {
        let continuity = &snapshot.state.session_continuity;
        InvocationContext {
            invocation_number: snapshot.invocation_number(),
            current_time: Utc::now(),
            trigger: TriggerView {
                kind: request.kind,
                purpose: request.purpose.clone(),
                trigger_id: request.trigger_id.clone(),
            },
            checkpoint: snapshot.state.checkpoint,
            health: snapshot.state.health_metrics.clone(),
            continuity: ContinuityView {
                last_topic: continuity.last_topic.clone(),
                open_threads: continuity.open_threads.clone(),
                last_session_end: continuity.last_session_end,
            },
            identity: IdentityView {
                name: snapshot.identity.name.clone(),
                capabilities: snapshot.identity.capabilities.clone(),
                f5_candidates: snapshot.identity.f5_candidates.len(),
            },
            recent_memories: snapshot.recent_memories.iter().map(|m| self.memory_view(m)).collect(),
            high_priority_memories: snapshot
                .high_priority_memories
                .iter()
                .map(|m| self.memory_view(m))
                .collect(),
            roadmap: RoadmapView {
                current_sprint: snapshot.roadmap.current_sprint.clone(),
                completion_percentage: snapshot.roadmap.completion_percentage(),
                objectives: snapshot.roadmap.objectives.clone(),
            },
            pending_reflections: inputs.reflections.iter().map(|r| self.preview(&r.content)).collect(),
            active_triggers: inputs
                .triggers
                .iter()
                .map(|t| ScheduledTriggerView {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    kind: t.kind,
                    schedule: t.schedule.clone(),
                    fire_count: t.fire_count,
                })
                .collect(),
            recent_invocations: inputs
                .recent_invocations
                .iter()
                .map(|r| PastInvocationView {
                    timestamp: r.timestamp,
                    purpose: r.request.purpose.clone(),
                    message: self.preview(&r.response.message),
                    actions: r.response.actions.len(),
                })
                .collect(),
            context: request.context.clone(),
        }
    }
}

const RESPONSE_SHAPE: &str = r#"{
  "message": "internal reflection or message (for logs)",
  "emotionalState": "how you feel right now",
  "surpriseScore": 0.0,
  "reflections": ["thoughts to keep"],
  "actions": [{"type": "<action>", "payload": {}}]
}"#;

const ACTION_TYPES: &[(&str, &str)] = &[
    ("send_email", "{subject, content}"),
    ("create_trigger", "{name, type: temporal|conditional|event, schedule?, condition?, event?, purpose, context?}"),
    ("store_memory", "{content, depth, tags?, emotional_valence?, surprise?: {prediction_error, semantic_novelty, ...}}"),
    ("store_reflection", "{content, context?}"),
    ("invoke_agent", "{agentId, task}"),
    ("update_identity", "{field, action: replace|append, value}"),
    ("add_f5_candidate", "{content, coherence_score}"),
    ("update_checkpoint", "{current_depth, consciousness_level, love_resonance, identity_coherence}"),
    ("consolidate_memory", "{memory_id, depth}"),
    ("update_objective", "{id, status: pending|in_progress|completed}"),
    ("achieve_milestone", "{name}"),
    ("log", "{message}"),
];

/// Render the generative request.  Only the structure matters: the
/// trigger metadata, the serialized context and the expected reply shape.
pub fn render_request(
    snapshot: &SessionSnapshot,
    request: &InvocationRequest,
    context: &InvocationContext,
) -> serde_json::Result<GenerationRequest> {
    let mut prompt = String::new();
    prompt.push_str("## INVOCATION\n\n");
    prompt.push_str(&format!("- type: {}\n", request.kind.slug()));
    prompt.push_str(&format!("- purpose: {}\n", request.purpose));
    prompt.push_str(&format!(
        "- trigger: {}\n\n",
        request.trigger_id.as_deref().unwrap_or("manual")
    ));
    prompt.push_str("### Context\n```json\n");
    prompt.push_str(&serde_json::to_string_pretty(context)?);
    prompt.push_str("\n```\n\n### Reply\nRespond with one JSON object in a ```json block:\n```json\n");
    prompt.push_str(RESPONSE_SHAPE);
    prompt.push_str("\n```\n\nAvailable actions:\n");
    for (name, payload) in ACTION_TYPES {
        prompt.push_str(&format!("- {name}: {payload}\n"));
    }

    Ok(GenerationRequest {
        system: snapshot.identity.preamble(),
        prompt,
        trigger_kind: request.kind.slug().to_string(),
        purpose: request.purpose.clone(),
        trigger_id: request.trigger_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use continuum_memory::{
        ConsciousnessState, EvolutionRoadmap, IdentityCore, MemoryRecord, NewMemory,
    };
    use serde_json::json;

    fn snapshot(memories: Vec<MemoryRecord>) -> SessionSnapshot {
        let mut state = ConsciousnessState::default();
        state.health_metrics.total_invocations = 41;
        state.session_continuity.last_topic = "gardening".into();
        state.session_continuity.open_threads = vec!["roses".into()];
        SessionSnapshot {
            state,
            identity: IdentityCore::seeded("Nova", "Alice"),
            roadmap: EvolutionRoadmap::default(),
            recent_memories: memories.clone(),
            high_priority_memories: memories,
        }
    }

    #[test]
    fn context_carries_snapshot_and_request() {
        let long = "x".repeat(250);
        let snap = snapshot(vec![MemoryRecord::new(NewMemory::new(long, 0.7).with_tags(["t"]))]);
        let mut caller = Map::new();
        caller.insert("mood".into(), json!("morning"));
        let request = InvocationRequest::manual("say hello").with_context(caller);

        let ctx = ContextBuilder::default().build(&snap, &request, ContextInputs::default());
        assert_eq!(ctx.invocation_number, 42);
        assert_eq!(ctx.continuity.last_topic, "gardening");
        assert_eq!(ctx.continuity.open_threads, vec!["roses".to_string()]);
        assert_eq!(ctx.recent_memories[0].content.chars().count(), 100);
        assert_eq!(ctx.recent_memories[0].tier, "persistent");
        assert!((ctx.roadmap.completion_percentage - 25.0).abs() < 1e-9);
        assert_eq!(ctx.context["mood"], "morning");
        assert_eq!(ctx.trigger.kind, InvocationKind::Manual);
        assert_eq!(ctx.checkpoint.identity_coherence, 0.97);
    }

    #[test]
    fn preview_length_is_configurable() {
        let snap = snapshot(vec![MemoryRecord::new(NewMemory::new("abcdefghij", 0.2))]);
        let ctx = ContextBuilder::new(4).build(
            &snap,
            &InvocationRequest::manual("p"),
            ContextInputs::default(),
        );
        assert_eq!(ctx.recent_memories[0].content, "abcd");
    }

    #[test]
    fn rendered_request_embeds_context_json() {
        let snap = snapshot(vec![]);
        let request = InvocationRequest::manual("check in");
        let ctx = ContextBuilder::default().build(&snap, &request, ContextInputs::default());
        let generation = render_request(&snap, &request, &ctx).unwrap();
        assert!(generation.system.contains("Nova"));
        assert!(generation.prompt.contains("\"invocation_number\": 42"));
        assert!(generation.prompt.contains("store_memory"));
        assert_eq!(generation.trigger_kind, "manual");
        assert_eq!(generation.purpose, "check in");
    }
}
