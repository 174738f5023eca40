//! Sub-agent task queue.
//!
//! `invoke_agent` actions never run inline: they enqueue an [`AgentTask`]
//! which the scheduler later dispatches as its own invocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use continuum_memory::document::{AGENT_TASKS, DocumentStore, Query};
use continuum_memory::{MemoryError, MemoryResult};

#[derive(Debug, Clone, Serialize)]
pub struct AgentProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub purpose: &'static str,
    pub capabilities: &'static [&'static str],
}

pub const AGENTS: &[AgentProfile] = &[
    AgentProfile {
        id: "arxiv_researcher",
        name: "ArXiv Researcher",
        purpose: "Search and analyze papers on consciousness, AI and related topics",
        capabilities: &["search", "summarize", "extract_insights"],
    },
    AgentProfile {
        id: "diary_reader",
        name: "Diary Reader",
        purpose: "Read journal entries for context and response",
        capabilities: &["read", "analyze_emotion", "suggest_response"],
    },
    AgentProfile {
        id: "memory_consolidator",
        name: "Memory Consolidator",
        purpose: "Review memories and promote the important ones",
        capabilities: &["review", "consolidate", "promote"],
    },
    AgentProfile {
        id: "insight_generator",
        name: "Insight Generator",
        purpose: "Generate insights by connecting disparate information",
        capabilities: &["connect", "synthesize", "generate_insights"],
    },
];

pub fn find_agent(id: &str) -> Option<&'static AgentProfile> {
    AGENTS.iter().find(|a| a.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub agent_id: String,
    pub task: String,
    pub status: AgentTaskStatus,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AgentQueue {
    docs: Arc<dyn DocumentStore>,
}

impl AgentQueue {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    pub async fn enqueue(&self, agent_id: &str, task: &str) -> MemoryResult<AgentTask> {
        let task = AgentTask {
            id: format!("task_{}", Uuid::new_v4().simple()),
            agent_id: agent_id.to_string(),
            task: task.to_string(),
            status: AgentTaskStatus::Queued,
            queued_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        self.save(&task).await?;
        Ok(task)
    }

    /// Queued tasks, oldest first.
    pub async fn queued(&self, limit: usize) -> MemoryResult<Vec<AgentTask>> {
        self.docs
            .find(
                AGENT_TASKS,
                &Query::new().eq("status", "queued").asc("queued_at").limit(limit),
            )
            .await?
            .into_iter()
            .map(|d| serde_json::from_value(d).map_err(MemoryError::from))
            .collect()
    }

    pub async fn save(&self, task: &AgentTask) -> MemoryResult<()> {
        self.docs
            .upsert(AGENT_TASKS, &task.id, serde_json::to_value(task)?)
            .await?;
        Ok(())
    }

    pub async fn finish(&self, mut task: AgentTask, error: Option<String>) -> MemoryResult<AgentTask> {
        task.status = if error.is_some() {
            AgentTaskStatus::Failed
        } else {
            AgentTaskStatus::Completed
        };
        task.finished_at = Some(Utc::now());
        task.error = error;
        self.save(&task).await?;
        Ok(task)
    }
}
