//! Plan records as the workflow engine writes them.
//!
//! Field names are PascalCase so plan definitions authored for the engine
//! (`UniqueName`, `Actions`, `ParentInstanceId`) load without translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// StatusType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StatusType {
    #[default]
    None,
    New,
    Initializing,
    Running,
    Waiting,
    Cancelling,
    Complete,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl StatusType {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusType::None => "None",
            StatusType::New => "New",
            StatusType::Initializing => "Initializing",
            StatusType::Running => "Running",
            StatusType::Waiting => "Waiting",
            StatusType::Cancelling => "Cancelling",
            StatusType::Complete => "Complete",
            StatusType::CompletedWithErrors => "CompletedWithErrors",
            StatusType::Failed => "Failed",
            StatusType::Cancelled => "Cancelled",
        }
    }

}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExecuteResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExecuteResult {
    pub status: StatusType,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub pid: Option<i64>,
}

// ---------------------------------------------------------------------------
// ActionItem
// ---------------------------------------------------------------------------

/// A node in a plan's execution tree.
///
/// Within one plan instance a node is addressed by `(Name, ParentInstanceId)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ActionItem {
    pub name: String,
    pub description: Option<String>,
    pub handler: Option<String>,
    pub parameters: Option<serde_yaml::Value>,
    pub instance_id: i64,
    pub parent_instance_id: i64,
    pub result: ExecuteResult,
    pub actions: Vec<ActionItem>,
}

impl ActionItem {
    pub fn new(name: impl Into<String>, parent_instance_id: i64) -> Self {
        Self {
            name: name.into(),
            parent_instance_id,
            ..Default::default()
        }
    }

    /// Same tree position as `other`.
    pub fn same_node(&self, other: &ActionItem) -> bool {
        self.name == other.name && self.parent_instance_id == other.parent_instance_id
    }

    pub fn with_status(mut self, status: StatusType) -> Self {
        self.result.status = status;
        self
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A plan definition, or, once `InstanceId` is stamped, one execution of it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Plan {
    pub name: String,
    pub unique_name: String,
    pub description: Option<String>,
    pub instance_id: i64,
    pub result: ExecuteResult,
    pub actions: Vec<ActionItem>,
}

impl Plan {
    pub fn new(unique_name: impl Into<String>) -> Self {
        let unique_name = unique_name.into();
        Self {
            name: unique_name.clone(),
            unique_name,
            ..Default::default()
        }
    }

    /// Number of tree nodes occupying `delta`'s position.
    pub fn count_matching_actions(&self, delta: &ActionItem) -> usize {
        fn walk(actions: &[ActionItem], delta: &ActionItem) -> usize {
            actions
                .iter()
                .map(|a| usize::from(a.same_node(delta)) + walk(&a.actions, delta))
                .sum()
        }
        walk(&self.actions, delta)
    }

    /// Replace the node at `delta`'s position. Returns false when no node
    /// matches.
    ///
    /// A delta without children keeps the stored subtree; child statuses
    /// arrive as their own updates.
    pub fn replace_action(&mut self, delta: &ActionItem) -> bool {
        fn walk(actions: &mut [ActionItem], delta: &ActionItem) -> bool {
            for action in actions.iter_mut() {
                if action.same_node(delta) {
                    let children = std::mem::take(&mut action.actions);
                    *action = delta.clone();
                    if action.actions.is_empty() {
                        action.actions = children;
                    }
                    return true;
                }
                if walk(&mut action.actions, delta) {
                    return true;
                }
            }
            false
        }
        walk(&mut self.actions, delta)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Plan {
        let mut plan = Plan::new("deploy");
        let mut build = ActionItem::new("build", 0);
        build.instance_id = 10;
        build.actions.push(ActionItem::new("compile", 10));
        build.actions.push(ActionItem::new("test", 10));
        plan.actions.push(build);
        plan.actions.push(ActionItem::new("notify", 0));
        plan
    }

    #[test]
    fn plan_yaml_uses_pascal_case() {
        let yaml = serde_yaml::to_string(&tree()).unwrap();
        assert!(yaml.contains("UniqueName: deploy"));
        assert!(yaml.contains("ParentInstanceId: 10"));
        assert!(yaml.contains("Status: None"));
    }

    #[test]
    fn sparse_definition_fills_defaults() {
        let yaml = "Name: nightly\nActions:\n- Name: step1\n";
        let plan: Plan = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(plan.name, "nightly");
        assert!(plan.unique_name.is_empty());
        assert_eq!(plan.instance_id, 0);
        assert_eq!(plan.actions[0].result.status, StatusType::None);
    }

    #[test]
    fn replace_nested_action_by_position() {
        let mut plan = tree();
        let delta = ActionItem::new("test", 10).with_status(StatusType::Failed);
        assert_eq!(plan.count_matching_actions(&delta), 1);
        assert!(plan.replace_action(&delta));
        assert_eq!(plan.actions[0].actions[1].result.status, StatusType::Failed);
        assert_eq!(plan.actions[0].actions[0].result.status, StatusType::None);
    }

    #[test]
    fn childless_delta_keeps_stored_subtree() {
        let mut plan = tree();
        let mut delta = ActionItem::new("build", 0).with_status(StatusType::Running);
        delta.instance_id = 10;
        assert!(plan.replace_action(&delta));
        assert_eq!(plan.actions[0].result.status, StatusType::Running);
        assert_eq!(plan.actions[0].actions.len(), 2);
    }

    #[test]
    fn unknown_position_is_not_replaced() {
        let mut plan = tree();
        let before = plan.clone();
        let delta = ActionItem::new("test", 99);
        assert_eq!(plan.count_matching_actions(&delta), 0);
        assert!(!plan.replace_action(&delta));
        assert_eq!(plan, before);
    }

    #[test]
    fn status_display_names() {
        assert_eq!(StatusType::default().to_string(), "None");
        assert_eq!(StatusType::CompletedWithErrors.to_string(), "CompletedWithErrors");
    }
}
