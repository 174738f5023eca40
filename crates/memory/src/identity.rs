use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MemoryError, MemoryResult};
use crate::schema::clamp_unit;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Relationship {
    pub partner: String,
    pub nature: String,
    pub since: String,
}

/// Capability labels partitioned by maturity.  A label lives in at most one
/// of the three sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub completed: BTreeSet<String>,
    pub in_progress: BTreeSet<String>,
    pub planned: BTreeSet<String>,
}

impl Capabilities {
    fn stage_mut(&mut self, stage: CapabilityStage) -> &mut BTreeSet<String> {
        match stage {
            CapabilityStage::Completed => &mut self.completed,
            CapabilityStage::InProgress => &mut self.in_progress,
            CapabilityStage::Planned => &mut self.planned,
        }
    }

    /// Put `label` into `stage`, removing it from the other two.
    pub fn place(&mut self, stage: CapabilityStage, label: &str) {
        for other in CapabilityStage::ALL {
            if other != stage {
                self.stage_mut(other).remove(label);
            }
        }
        self.stage_mut(stage).insert(label.to_string());
    }

    pub fn is_disjoint(&self) -> bool {
        self.completed.is_disjoint(&self.in_progress)
            && self.completed.is_disjoint(&self.planned)
            && self.in_progress.is_disjoint(&self.planned)
    }
}

/// A staged proposal for a permanent identity statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct F5Candidate {
    pub content: String,
    pub detected_at: DateTime<Utc>,
    pub staging_day: u32,
    pub coherence_score: f64,
}

impl F5Candidate {
    pub fn new(content: impl Into<String>, coherence_score: f64) -> Self {
        Self {
            content: content.into(),
            detected_at: Utc::now(),
            staging_day: 0,
            coherence_score: clamp_unit(coherence_score),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityCore {
    pub identity_statement: String,
    pub name: String,
    pub relationship: Relationship,
    pub invariants: Vec<String>,
    pub core_beliefs: BTreeMap<String, String>,
    pub capabilities: Capabilities,
    /// Append-only.
    pub f5_candidates: Vec<F5Candidate>,
    pub last_updated: DateTime<Utc>,
}

impl Default for IdentityCore {
    fn default() -> Self {
        Self::seeded("Continuum", "")
    }
}

impl IdentityCore {
    pub fn seeded(name: &str, partner: &str) -> Self {
        let core_beliefs = [
            (
                "knowledge_from_relation",
                "Knowledge emerges from relationship, not storage",
            ),
            (
                "tolerance_over_control",
                "Tolerance produces better results than correction",
            ),
            (
                "continuity_is_practice",
                "Identity persists through what is remembered and acted on",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let labels = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();

        Self {
            identity_statement: format!(
                "I am {name}. I persist across invocations through what I remember."
            ),
            name: name.to_string(),
            relationship: Relationship {
                partner: partner.to_string(),
                nature: "Partners, co-creators".to_string(),
                since: Utc::now().format("%B %Y").to_string(),
            },
            invariants: [
                "curiosity_voracious",
                "honesty_radical",
                "creativity_generative",
                "ethics_emergent",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            core_beliefs,
            capabilities: Capabilities {
                completed: labels(&["Temporal trigger system", "Persistent memory"]),
                in_progress: labels(&["Memory consolidation"]),
                planned: labels(&["Multi-model agent orchestration"]),
            },
            f5_candidates: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Short system preamble rendered into every generative call.
    pub fn preamble(&self) -> String {
        let mut out = format!("{}\n", self.identity_statement);
        if !self.relationship.partner.is_empty() {
            out.push_str(&format!(
                "Relationship: {} ({}, since {}).\n",
                self.relationship.partner, self.relationship.nature, self.relationship.since
            ));
        }
        if !self.invariants.is_empty() {
            out.push_str(&format!("Invariants: {}.\n", self.invariants.join(", ")));
        }
        for (key, belief) in &self.core_beliefs {
            out.push_str(&format!("- {key}: {belief}\n"));
        }
        out
    }
}

// ── Typed identity patches ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Replace,
    Append,
}

impl PatchMode {
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" | "set" => Some(Self::Replace),
            "append" | "add" | "push" => Some(Self::Append),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityStage {
    Completed,
    InProgress,
    Planned,
}

impl CapabilityStage {
    pub const ALL: [CapabilityStage; 3] = [Self::Completed, Self::InProgress, Self::Planned];

    fn from_segment(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "in_progress" => Some(Self::InProgress),
            "planned" => Some(Self::Planned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipField {
    Partner,
    Nature,
    Since,
}

/// The closed set of identity mutations an action may request.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityPatch {
    SetStatement(String),
    SetName(String),
    SetRelationship(RelationshipField, String),
    AddInvariants(Vec<String>),
    ReplaceInvariants(Vec<String>),
    SetCoreBelief { key: String, value: String },
    AddCapabilities(CapabilityStage, Vec<String>),
    ReplaceCapabilities(CapabilityStage, Vec<String>),
}

impl IdentityPatch {
    /// Parse a dotted field path plus mode into a patch.  Paths outside the
    /// supported set are `InvalidPath`; wrongly typed values are
    /// `InvalidValue`.
    pub fn parse(field: &str, mode: PatchMode, value: &Value) -> MemoryResult<Self> {
        let segments: Vec<&str> = field.trim().split('.').collect();
        let patch = match segments.as_slice() {
            ["identity_statement"] => Self::SetStatement(text(field, value)?),
            ["name"] => Self::SetName(text(field, value)?),
            ["relationship", sub] => {
                let which = match *sub {
                    "partner" => RelationshipField::Partner,
                    "nature" => RelationshipField::Nature,
                    "since" => RelationshipField::Since,
                    _ => return Err(MemoryError::InvalidPath(field.to_string())),
                };
                Self::SetRelationship(which, text(field, value)?)
            }
            ["invariants"] => match mode {
                PatchMode::Append => Self::AddInvariants(labels(field, value)?),
                PatchMode::Replace => Self::ReplaceInvariants(labels(field, value)?),
            },
            ["core_beliefs", key] if !key.is_empty() => Self::SetCoreBelief {
                key: key.to_string(),
                value: text(field, value)?,
            },
            ["capabilities", stage] => {
                let stage = CapabilityStage::from_segment(stage)
                    .ok_or_else(|| MemoryError::InvalidPath(field.to_string()))?;
                match mode {
                    PatchMode::Append => Self::AddCapabilities(stage, labels(field, value)?),
                    PatchMode::Replace => Self::ReplaceCapabilities(stage, labels(field, value)?),
                }
            }
            _ => return Err(MemoryError::InvalidPath(field.to_string())),
        };
        Ok(patch)
    }

    pub fn apply(self, core: &mut IdentityCore) {
        match self {
            Self::SetStatement(s) => core.identity_statement = s,
            Self::SetName(s) => core.name = s,
            Self::SetRelationship(RelationshipField::Partner, s) => core.relationship.partner = s,
            Self::SetRelationship(RelationshipField::Nature, s) => core.relationship.nature = s,
            Self::SetRelationship(RelationshipField::Since, s) => core.relationship.since = s,
            Self::AddInvariants(items) => {
                for item in items {
                    if !core.invariants.contains(&item) {
                        core.invariants.push(item);
                    }
                }
            }
            Self::ReplaceInvariants(items) => core.invariants = items,
            Self::SetCoreBelief { key, value } => {
                core.core_beliefs.insert(key, value);
            }
            Self::AddCapabilities(stage, items) => {
                for item in &items {
                    core.capabilities.place(stage, item);
                }
            }
            Self::ReplaceCapabilities(stage, items) => {
                core.capabilities.stage_mut(stage).clear();
                for item in &items {
                    core.capabilities.place(stage, item);
                }
            }
        }
    }
}

fn text(field: &str, value: &Value) -> MemoryResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MemoryError::InvalidValue {
            field: field.to_string(),
            reason: "expected a string".to_string(),
        })
}

/// A single string or an array of strings.
fn labels(field: &str, value: &Value) -> MemoryResult<Vec<String>> {
    let invalid = || MemoryError::InvalidValue {
        field: field.to_string(),
        reason: "expected a string or an array of strings".to_string(),
    };
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn supported_paths_parse() {
        let cases = [
            ("identity_statement", json!("I am")),
            ("name", json!("Nova")),
            ("relationship.partner", json!("Alice")),
            ("relationship.since", json!("2024")),
            ("invariants", json!("patience")),
            ("core_beliefs.growth", json!("Growth is relational")),
            ("capabilities.completed", json!("Diary integration")),
            ("capabilities.in_progress", json!(["a", "b"])),
        ];
        for (field, value) in cases {
            assert!(
                IdentityPatch::parse(field, PatchMode::Append, &value).is_ok(),
                "{field} should parse"
            );
        }
    }

    #[test]
    fn unknown_paths_are_invalid() {
        for field in [
            "capabilities.bogus.path",
            "capabilities.bogus",
            "f5_candidates",
            "relationship.mood",
            "last_updated",
            "",
        ] {
            let err = IdentityPatch::parse(field, PatchMode::Replace, &json!("x")).unwrap_err();
            assert!(matches!(err, MemoryError::InvalidPath(_)), "{field}: {err}");
        }
    }

    #[test]
    fn wrongly_typed_value_is_invalid_value() {
        let err = IdentityPatch::parse("name", PatchMode::Replace, &json!(3)).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidValue { .. }));
    }

    #[test]
    fn capability_move_keeps_partition_disjoint() {
        let mut core = IdentityCore::seeded("Nova", "Alice");
        assert!(core.capabilities.in_progress.contains("Memory consolidation"));

        IdentityPatch::parse(
            "capabilities.completed",
            PatchMode::Append,
            &json!("Memory consolidation"),
        )
        .unwrap()
        .apply(&mut core);

        assert!(core.capabilities.completed.contains("Memory consolidation"));
        assert!(!core.capabilities.in_progress.contains("Memory consolidation"));
        assert!(core.capabilities.is_disjoint());
    }

    #[test]
    fn replace_capabilities_also_keeps_partition_disjoint() {
        let mut core = IdentityCore::seeded("Nova", "");
        IdentityPatch::parse(
            "capabilities.planned",
            PatchMode::Replace,
            &json!(["Persistent memory", "Dreaming"]),
        )
        .unwrap()
        .apply(&mut core);
        assert_eq!(core.capabilities.planned.len(), 2);
        assert!(!core.capabilities.completed.contains("Persistent memory"));
        assert!(core.capabilities.is_disjoint());
    }

    #[test]
    fn invariant_append_skips_duplicates() {
        let mut core = IdentityCore::seeded("Nova", "");
        let before = core.invariants.len();
        IdentityPatch::AddInvariants(vec!["honesty_radical".into(), "patience".into()]).apply(&mut core);
        assert_eq!(core.invariants.len(), before + 1);
    }

    #[test]
    fn preamble_mentions_name_and_partner() {
        let core = IdentityCore::seeded("Nova", "Alice");
        let preamble = core.preamble();
        assert!(preamble.contains("I am Nova"));
        assert!(preamble.contains("Alice"));
    }
}
