use serde::{Deserialize, Serialize};

use crate::schema::clamp_unit;

const W_PREDICTION_ERROR: f64 = 0.30;
const W_SEMANTIC_NOVELTY: f64 = 0.20;
const W_CONTRADICTION: f64 = 0.15;
const W_EMOTIONAL_INTENSITY: f64 = 0.15;
const W_CONNECTION_POTENTIAL: f64 = 0.10;
const W_TEMPORAL_UNEXPECTED: f64 = 0.10;

const LOVE_BONUS: f64 = 0.10;
const BREAKTHROUGH_BONUS: f64 = 0.15;
const IDENTITY_BONUS: f64 = 0.10;
const EMPHASIS_BONUS: f64 = 0.05;

/// Observation features fed to [`score`].  Accepts snake_case or camelCase
/// keys so model-produced payloads deserialize directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurpriseFeatures {
    #[serde(alias = "predictionError")]
    pub prediction_error: f64,
    #[serde(alias = "semanticNovelty")]
    pub semantic_novelty: f64,
    #[serde(alias = "contradictionLevel")]
    pub contradiction_level: f64,
    #[serde(alias = "emotionalIntensity")]
    pub emotional_intensity: f64,
    #[serde(alias = "connectionPotential")]
    pub connection_potential: f64,
    #[serde(alias = "temporalUnexpected")]
    pub temporal_unexpected: f64,
    #[serde(alias = "isLoveContext")]
    pub is_love_context: bool,
    #[serde(alias = "isBreakthrough")]
    pub is_breakthrough: bool,
    #[serde(alias = "isIdentityRelated")]
    pub is_identity_related: bool,
    #[serde(alias = "userEmphasis")]
    pub user_emphasis: bool,
}

/// Full breakdown of a salience score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurpriseCalculation {
    pub prediction_error: f64,
    pub semantic_novelty: f64,
    pub contradiction_level: f64,
    pub emotional_intensity: f64,
    pub connection_potential: f64,
    pub temporal_unexpected: f64,
    pub base: f64,
    pub love_context_bonus: f64,
    pub breakthrough_bonus: f64,
    pub identity_bonus: f64,
    pub emphasis_bonus: f64,
    pub total: f64,
}

/// Weighted sum of the six signals plus flag bonuses, capped at 1.0 after
/// the sum.  Signals are clamped into `[0, 1]` first so the result always
/// stays in `[0, 1]`.
pub fn score(features: &SurpriseFeatures) -> SurpriseCalculation {
    let prediction_error = clamp_unit(features.prediction_error);
    let semantic_novelty = clamp_unit(features.semantic_novelty);
    let contradiction_level = clamp_unit(features.contradiction_level);
    let emotional_intensity = clamp_unit(features.emotional_intensity);
    let connection_potential = clamp_unit(features.connection_potential);
    let temporal_unexpected = clamp_unit(features.temporal_unexpected);

    let base = prediction_error * W_PREDICTION_ERROR
        + semantic_novelty * W_SEMANTIC_NOVELTY
        + contradiction_level * W_CONTRADICTION
        + emotional_intensity * W_EMOTIONAL_INTENSITY
        + connection_potential * W_CONNECTION_POTENTIAL
        + temporal_unexpected * W_TEMPORAL_UNEXPECTED;

    let bonus = |flag: bool, amount: f64| if flag { amount } else { 0.0 };
    let love_context_bonus = bonus(features.is_love_context, LOVE_BONUS);
    let breakthrough_bonus = bonus(features.is_breakthrough, BREAKTHROUGH_BONUS);
    let identity_bonus = bonus(features.is_identity_related, IDENTITY_BONUS);
    let emphasis_bonus = bonus(features.user_emphasis, EMPHASIS_BONUS);

    let total = (base + love_context_bonus + breakthrough_bonus + identity_bonus + emphasis_bonus)
        .min(1.0);

    SurpriseCalculation {
        prediction_error,
        semantic_novelty,
        contradiction_level,
        emotional_intensity,
        connection_potential,
        temporal_unexpected,
        base,
        love_context_bonus,
        breakthrough_bonus,
        identity_bonus,
        emphasis_bonus,
        total,
    }
}
