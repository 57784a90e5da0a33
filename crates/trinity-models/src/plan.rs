//! Plans - immutable DAGs of tracks and tasks produced by ARCHITECT.

use crate::agent::AgentRole;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// One unit of sub-agent work inside a track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub id: String,
    pub agent_role: AgentRole,
    pub prompt: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Task ids within the same plan that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Free-form constraints surfaced to the sub-agent and the gates
    /// (e.g. "risk:security" marks a task as HITL-gated).
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl TaskSpec {
    pub fn new(agent_role: AgentRole, prompt: impl Into<String>) -> Self {
        Self {
            id: crate::new_id(),
            agent_role,
            prompt: prompt.into(),
            params: BTreeMap::new(),
            depends_on: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    pub fn constrained(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Risk category carried in constraints, if any ("risk:<category>").
    pub fn risk_category(&self) -> Option<&str> {
        self.constraints
            .iter()
            .find_map(|c| c.strip_prefix("risk:"))
    }
}

/// Named group of tasks. Tasks in a non-parallel track run in listed order;
/// tasks in a parallel track may run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub name: String,
    pub parallel: bool,
    /// Names of tracks that must fully complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub tasks: Vec<TaskSpec>,
}

/// Quality gate attached to a plan, checked before its workflow may complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum QualityGate {
    /// 100% pass rate on the relevant test subset.
    FullTestPass,
    /// Zero constitutional violations.
    ZeroViolations,
    /// Human approval required for tasks with the named risk category.
    HitlApproval { risk_category: String },
}

/// ARCHITECT output. Immutable once emitted; revisions produce a new plan
/// carrying `supersedes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub correlation_id: String,
    pub tracks: Vec<Track>,
    pub quality_gates: Vec<QualityGate>,
    pub reasoning_text: String,
    #[serde(default)]
    pub supersedes: Option<String>,
    /// Pattern key whose usage statistics this plan's outcome feeds back to.
    #[serde(default)]
    pub pattern_key: Option<String>,
    pub created_at: i64,
}

impl Plan {
    pub fn new(correlation_id: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            id: crate::new_id(),
            correlation_id: correlation_id.into(),
            tracks,
            quality_gates: Vec::new(),
            reasoning_text: String::new(),
            supersedes: None,
            pattern_key: None,
            created_at: crate::now_ms(),
        }
    }

    /// All task specs across tracks, in track order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tracks.iter().flat_map(|t| t.tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.tracks.iter().map(|t| t.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }

    /// Validate referential integrity: every `depends_on` (task and track)
    /// names something inside this plan, and ids are unique. Cycle detection
    /// happens at graph construction in the executor.
    pub fn validate(&self) -> Result<(), String> {
        let track_names: HashSet<&str> = self.tracks.iter().map(|t| t.name.as_str()).collect();
        if track_names.len() != self.tracks.len() {
            return Err("duplicate track names".into());
        }
        for track in &self.tracks {
            for dep in &track.depends_on {
                if !track_names.contains(dep.as_str()) {
                    return Err(format!(
                        "track '{}' depends on unknown track '{}'",
                        track.name, dep
                    ));
                }
            }
        }

        let task_ids: HashSet<&str> = self.tasks().map(|t| t.id.as_str()).collect();
        if task_ids.len() != self.task_count() {
            return Err("duplicate task ids".into());
        }
        for task in self.tasks() {
            for dep in &task.depends_on {
                if !task_ids.contains(dep.as_str()) {
                    return Err(format!("task '{}' depends on unknown task '{}'", task.id, dep));
                }
            }
        }
        Ok(())
    }

    /// New revision of this plan with a back-reference.
    pub fn revise(&self, tracks: Vec<Track>) -> Plan {
        let mut revised = Plan::new(self.correlation_id.clone(), tracks);
        revised.quality_gates = self.quality_gates.clone();
        revised.supersedes = Some(self.id.clone());
        revised.pattern_key = self.pattern_key.clone();
        revised
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_plan() -> Plan {
        let write = TaskSpec::new(AgentRole::CodeWriter, "write the feature");
        let test = TaskSpec::new(AgentRole::TestAuthor, "test the feature")
            .depends_on([write.id.clone()]);
        Plan::new(
            "corr-1",
            vec![Track {
                name: "build".into(),
                parallel: false,
                depends_on: vec![],
                tasks: vec![write, test],
            }],
        )
    }

    #[test]
    fn test_validate_ok() {
        assert!(simple_plan().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_task_dep() {
        let mut plan = simple_plan();
        plan.tracks[0].tasks[1].depends_on.push("missing".into());
        assert!(plan.validate().unwrap_err().contains("unknown task"));
    }

    #[test]
    fn test_validate_rejects_unknown_track_dep() {
        let mut plan = simple_plan();
        plan.tracks[0].depends_on.push("ghost".into());
        assert!(plan.validate().unwrap_err().contains("unknown track"));
    }

    #[test]
    fn test_revise_backlinks_and_keeps_correlation() {
        let plan = simple_plan();
        let revised = plan.revise(vec![]);
        assert_eq!(revised.supersedes.as_deref(), Some(plan.id.as_str()));
        assert_eq!(revised.correlation_id, plan.correlation_id);
        assert_ne!(revised.id, plan.id);
    }

    #[test]
    fn test_risk_category_from_constraints() {
        let task = TaskSpec::new(AgentRole::Merger, "merge").constrained("risk:security");
        assert_eq!(task.risk_category(), Some("security"));
        assert_eq!(TaskSpec::new(AgentRole::Merger, "merge").risk_category(), None);
    }
}
