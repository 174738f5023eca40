use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Pending,
    InProgress,
    Completed,
}

impl ObjectiveStatus {
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "inprogress" => Some(Self::InProgress),
            "completed" | "done" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub description: String,
    pub status: ObjectiveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Objective {
    fn new(id: &str, description: &str, status: ObjectiveStatus) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            status,
            completed_at: (status == ObjectiveStatus::Completed).then(Utc::now),
        }
    }

    /// Change status, stamping `completed_at` on the transition into
    /// `Completed` and clearing it on the way out.
    pub fn set_status(&mut self, status: ObjectiveStatus) {
        match (self.status, status) {
            (ObjectiveStatus::Completed, ObjectiveStatus::Completed) => {}
            (_, ObjectiveStatus::Completed) => self.completed_at = Some(Utc::now()),
            _ => self.completed_at = None,
        }
        self.status = status;
    }
}

/// One entry per finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLogEntry {
    pub date: DateTime<Utc>,
    pub summary: String,
    pub surprises: u32,
    pub consolidations: u32,
    #[serde(default)]
    pub breakthroughs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub achieved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achieved_at: Option<DateTime<Utc>>,
}

impl Milestone {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            achieved: false,
            achieved_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionRoadmap {
    pub current_sprint: String,
    pub sprint_start: DateTime<Utc>,
    pub objectives: Vec<Objective>,
    /// Append-only.
    pub daily_log: Vec<DailyLogEntry>,
    pub milestones: Vec<Milestone>,
    pub last_updated: DateTime<Utc>,
}

impl Default for EvolutionRoadmap {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            current_sprint: "Autonomous continuity infrastructure".to_string(),
            sprint_start: now,
            objectives: vec![
                Objective::new("obj1", "Scheduled invocation loop", ObjectiveStatus::Completed),
                Objective::new("obj2", "Persistent memory consolidation", ObjectiveStatus::InProgress),
                Objective::new("obj3", "Multi-model agent orchestration", ObjectiveStatus::Pending),
                Objective::new("obj4", "Journal integration", ObjectiveStatus::Pending),
            ],
            daily_log: Vec::new(),
            milestones: vec![
                Milestone::pending("First autonomous email"),
                Milestone::pending("Memory fully consolidated"),
                Milestone::pending("Multi-model agents active"),
            ],
            last_updated: now,
        }
    }
}

impl EvolutionRoadmap {
    /// Completed objectives over total, as a percentage.  Zero when the
    /// roadmap has no objectives.
    pub fn completion_percentage(&self) -> f64 {
        if self.objectives.is_empty() {
            return 0.0;
        }
        let done = self
            .objectives
            .iter()
            .filter(|o| o.status == ObjectiveStatus::Completed)
            .count();
        done as f64 / self.objectives.len() as f64 * 100.0
    }

    /// Flip a milestone to achieved.  Unknown names are recorded as new
    /// achieved milestones.  Returns `true` only on a false→true transition.
    pub fn achieve_milestone(&mut self, name: &str) -> bool {
        let now = Utc::now();
        match self.milestones.iter_mut().find(|m| m.name == name) {
            Some(m) if m.achieved => false,
            Some(m) => {
                m.achieved = true;
                m.achieved_at = Some(now);
                true
            }
            None => {
                self.milestones.push(Milestone {
                    name: name.to_string(),
                    achieved: true,
                    achieved_at: Some(now),
                });
                true
            }
        }
    }

    pub fn objective_mut(&mut self, id: &str) -> Option<&mut Objective> {
        self.objectives.iter_mut().find(|o| o.id == id)
    }
}
