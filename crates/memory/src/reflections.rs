use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::document::{DocumentStore, Query, REFLECTIONS};
use crate::error::{MemoryError, MemoryResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
}

#[derive(Clone)]
pub struct ReflectionLog {
    docs: Arc<dyn DocumentStore>,
}

impl ReflectionLog {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    pub async fn store(&self, content: impl Into<String>, context: impl Into<String>) -> MemoryResult<Reflection> {
        let reflection = Reflection {
            id: format!("ref_{}", Uuid::new_v4().simple()),
            content: content.into(),
            context: context.into(),
            created_at: Utc::now(),
            processed: false,
        };
        self.docs
            .upsert(REFLECTIONS, &reflection.id, serde_json::to_value(&reflection)?)
            .await?;
        debug!(id = %reflection.id, "reflection stored");
        Ok(reflection)
    }

    /// Unprocessed reflections, oldest first.
    pub async fn pending(&self, limit: usize) -> MemoryResult<Vec<Reflection>> {
        let docs = self
            .docs
            .find(
                REFLECTIONS,
                &Query::new().eq("processed", false).asc("created_at").limit(limit),
            )
            .await?;
        docs.into_iter()
            .map(|d| serde_json::from_value(d).map_err(MemoryError::from))
            .collect()
    }
}
