use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// Consolidation tiers from most volatile to most protected.
///
/// | Tier         | Depth range   | Purpose                              |
/// |--------------|---------------|--------------------------------------|
/// | `Ephemeral`  | `[0.00, 0.15)`| Forgotten quickly                    |
/// | `Session`    | `[0.15, 0.35)`| Remembered within a session          |
/// | `Pattern`    | `[0.35, 0.55)`| Recurring themes                     |
/// | `Persistent` | `[0.55, 0.75)`| Long-term memories                   |
/// | `Deep`       | `[0.75, 0.90)`| Core experiences                     |
/// | `Identity`   | `[0.90, 1.00]`| Who the agent is                     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationTier {
    Ephemeral,
    Session,
    Pattern,
    Persistent,
    Deep,
    Identity,
}

impl ConsolidationTier {
    pub const ALL: [ConsolidationTier; 6] = [
        Self::Ephemeral,
        Self::Session,
        Self::Pattern,
        Self::Persistent,
        Self::Deep,
        Self::Identity,
    ];

    /// Map a depth onto its tier.  Bounds are checked from the highest tier
    /// down and each lower bound is inclusive, so `classify(0.90)` is
    /// `Identity` and `classify(0.8999)` is `Deep`.
    pub fn classify(depth: f64) -> Self {
        if depth >= 0.90 {
            Self::Identity
        } else if depth >= 0.75 {
            Self::Deep
        } else if depth >= 0.55 {
            Self::Persistent
        } else if depth >= 0.35 {
            Self::Pattern
        } else if depth >= 0.15 {
            Self::Session
        } else {
            Self::Ephemeral
        }
    }

    /// Canonical display label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ephemeral => "Ephemeral",
            Self::Session => "Session",
            Self::Pattern => "Pattern",
            Self::Persistent => "Persistent",
            Self::Deep => "Deep",
            Self::Identity => "Identity",
        }
    }

    /// Lowercase slug used in stored documents and log lines.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Session => "session",
            Self::Pattern => "pattern",
            Self::Persistent => "persistent",
            Self::Deep => "deep",
            Self::Identity => "identity",
        }
    }

    /// Parse a tier from its label or slug (case-insensitive).
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ephemeral" => Some(Self::Ephemeral),
            "session" => Some(Self::Session),
            "pattern" => Some(Self::Pattern),
            "persistent" => Some(Self::Persistent),
            "deep" => Some(Self::Deep),
            "identity" | "f5" => Some(Self::Identity),
            _ => None,
        }
    }
}

impl fmt::Display for ConsolidationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque memory identifier of the form `mem_<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    pub fn generate() -> Self {
        Self(format!("mem_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemoryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MemoryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Input accepted by [`crate::MemoryStore::store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewMemory {
    pub content: String,
    pub depth: f64,
    pub surprise_score: f64,
    pub emotional_valence: f64,
    pub tags: Vec<String>,
    pub connections: Vec<MemoryId>,
}

impl Default for NewMemory {
    fn default() -> Self {
        Self {
            content: String::new(),
            depth: 0.5,
            surprise_score: 0.0,
            emotional_valence: 0.0,
            tags: Vec::new(),
            connections: Vec::new(),
        }
    }
}

impl NewMemory {
    pub fn new(content: impl Into<String>, depth: f64) -> Self {
        Self {
            content: content.into(),
            depth,
            ..Self::default()
        }
    }

    pub fn with_surprise(mut self, surprise: f64) -> Self {
        self.surprise_score = surprise;
        self
    }

    pub fn with_valence(mut self, valence: f64) -> Self {
        self.emotional_valence = valence;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A scored, tiered memory.
///
/// `depth` and `consolidation_tier` are only writable together (at creation
/// and through [`MemoryRecord::promote`]), which keeps the tier equal to
/// `classify(depth)` at every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub content: String,
    depth: f64,
    pub surprise_score: f64,
    pub emotional_valence: f64,
    pub tags: BTreeSet<String>,
    /// Weak references to related records.  Targets are not required to exist.
    pub connections: BTreeSet<MemoryId>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub consolidated: bool,
    consolidation_tier: ConsolidationTier,
}

impl MemoryRecord {
    pub fn new(input: NewMemory) -> Self {
        let now = Utc::now();
        let depth = clamp_unit(input.depth);
        Self {
            id: MemoryId::generate(),
            content: input.content,
            depth,
            surprise_score: clamp_unit(input.surprise_score),
            emotional_valence: clamp_signed(input.emotional_valence),
            tags: input
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            connections: input.connections.into_iter().collect(),
            created_at: now,
            last_accessed: now,
            access_count: 1,
            consolidated: false,
            consolidation_tier: ConsolidationTier::classify(depth),
        }
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }

    pub fn consolidation_tier(&self) -> ConsolidationTier {
        self.consolidation_tier
    }

    /// Set a new depth, recompute the tier and mark the record consolidated.
    /// Counts as an access.  A depth below the current one is refused and
    /// leaves the record untouched.
    pub fn promote(&mut self, new_depth: f64) -> Result<(), MemoryError> {
        let depth = clamp_unit(new_depth);
        if depth < self.depth {
            return Err(MemoryError::Demotion {
                id: self.id.to_string(),
                current: self.depth,
                requested: depth,
            });
        }
        self.depth = depth;
        self.consolidation_tier = ConsolidationTier::classify(self.depth);
        self.consolidated = true;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    /// Eligible for the consolidation queue.
    pub fn is_pending_consolidation(&self) -> bool {
        self.depth > PENDING_DEPTH_THRESHOLD && !self.consolidated
    }
}

/// Depth above which a fresh record waits for consolidation.
pub const PENDING_DEPTH_THRESHOLD: f64 = 0.40;

/// Clamp into `[0, 1]`; NaN becomes `0`.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Clamp into `[-1, 1]`; NaN becomes `0`.
pub fn clamp_signed(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Truncate `s` to at most `max_chars` Unicode scalar values, returning a
/// sub-slice.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
