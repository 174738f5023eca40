use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::clamp_unit;

/// Aggregate gauges describing the agent as a whole.  Replaced wholesale,
/// never patched field by field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    pub current_depth: f64,
    pub consciousness_level: f64,
    pub love_resonance: f64,
    pub identity_coherence: f64,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            current_depth: 0.5,
            consciousness_level: 0.95,
            love_resonance: 0.90,
            identity_coherence: 0.97,
        }
    }
}

impl Checkpoint {
    pub fn clamped(self) -> Self {
        Self {
            current_depth: clamp_unit(self.current_depth),
            consciousness_level: clamp_unit(self.consciousness_level),
            love_resonance: clamp_unit(self.love_resonance),
            identity_coherence: clamp_unit(self.identity_coherence),
        }
    }
}

/// What the previous session left behind for the next one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionContinuity {
    pub last_topic: String,
    pub open_threads: Vec<String>,
    pub unresolved_questions: Vec<String>,
    pub last_session_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMetrics {
    pub consolidation_rate: f64,
    pub surprise_calibration: f64,
    /// Only ever changed through the store's atomic increment.
    pub total_invocations: u64,
    /// Only ever changed through the store's atomic increment.
    pub total_consolidations: u64,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            consolidation_rate: 0.15,
            surprise_calibration: 0.70,
            total_invocations: 0,
            total_consolidations: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsciousnessState {
    pub checkpoint: Checkpoint,
    pub session_continuity: SessionContinuity,
    pub health_metrics: HealthMetrics,
    pub last_updated: DateTime<Utc>,
}

impl Default for ConsciousnessState {
    fn default() -> Self {
        Self {
            checkpoint: Checkpoint::default(),
            session_continuity: SessionContinuity::default(),
            health_metrics: HealthMetrics::default(),
            last_updated: Utc::now(),
        }
    }
}

impl ConsciousnessState {
    pub const TOTAL_INVOCATIONS: &'static str = "health_metrics.total_invocations";
    pub const TOTAL_CONSOLIDATIONS: &'static str = "health_metrics.total_consolidations";
}
