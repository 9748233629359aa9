//! Issue tracker entities consumed by the engine (read-only).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse workflow bucket for an issue status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    /// Not started
    #[default]
    ToDo,
    /// Work under way
    InProgress,
    /// Finished (done, closed, resolved)
    Done,
}

/// Tracked work item as delivered by the issue tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Unique identifier
    pub id: String,
    /// Human-readable key (e.g., "TEST-123")
    pub key: String,
    /// Project key (e.g., "TEST")
    pub project_key: String,
    /// Issue type name (Story, Bug, Task, ...)
    pub issue_type: String,
    /// Workflow status name
    pub status: String,
    /// Workflow status bucket
    #[serde(default)]
    pub status_category: StatusCategory,
    /// Issue title
    #[serde(default)]
    pub summary: String,
    /// Assignee account ID
    #[serde(default)]
    pub assignee_id: Option<String>,
    /// Reporter account ID
    #[serde(default)]
    pub reporter_id: Option<String>,
    /// Priority name
    #[serde(default)]
    pub priority: Option<String>,
    /// Labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Components
    #[serde(default)]
    pub components: Vec<String>,
    /// Story points estimate
    #[serde(default)]
    pub story_points: Option<f64>,
    /// Original time estimate in seconds
    #[serde(default)]
    pub original_estimate_seconds: Option<i64>,
    /// Logged time in seconds
    #[serde(default)]
    pub time_spent_seconds: Option<i64>,
    /// Remaining estimate in seconds
    #[serde(default)]
    pub remaining_estimate_seconds: Option<i64>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
    /// When the status last changed
    #[serde(default)]
    pub status_changed_at: Option<DateTime<Utc>>,
    /// When the issue was resolved
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Whether the issue reached a terminal status.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status_category == StatusCategory::Done
    }

    /// Whether the issue is being worked on.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.status_category == StatusCategory::InProgress
    }

    /// Whether any estimate (story points or original time estimate) is present.
    #[must_use]
    pub fn has_estimate(&self) -> bool {
        self.story_points.is_some_and(|p| p > 0.0)
            || self.original_estimate_seconds.is_some_and(|s| s > 0)
    }

    /// Logged time in seconds, treating absent as zero.
    #[must_use]
    pub fn time_spent(&self) -> i64 {
        self.time_spent_seconds.unwrap_or(0)
    }

    /// Whether the issue has an assignee.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.assignee_id.as_deref().is_some_and(|a| !a.is_empty())
    }
}

/// Kind of change carried by a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Entity created
    Created,
    /// Entity updated
    Updated,
    /// Entity deleted
    Deleted,
}

impl ChangeType {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// A single field change in a changelog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogItem {
    /// Field name (e.g., "status")
    pub field: String,
    /// Previous value
    #[serde(default)]
    pub from: Option<String>,
    /// New value
    #[serde(default)]
    pub to: Option<String>,
}

/// Field changes delivered alongside an update event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changelog {
    /// When the change happened
    pub created_at: DateTime<Utc>,
    /// Changed fields
    #[serde(default)]
    pub items: Vec<ChangelogItem>,
}

impl Changelog {
    /// Timestamp of a status change in this changelog, if any.
    #[must_use]
    pub fn status_changed_at(&self) -> Option<DateTime<Utc>> {
        self.items
            .iter()
            .any(|item| item.field.eq_ignore_ascii_case("status"))
            .then_some(self.created_at)
    }
}

/// Sprint lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintState {
    /// Planned, not started
    Future,
    /// Running
    Active,
    /// Finished
    Closed,
}

/// Time-boxed iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    /// Unique identifier
    pub id: String,
    /// Sprint name
    pub name: String,
    /// Lifecycle state
    pub state: SprintState,
    /// Start date
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// End date
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl Sprint {
    /// Whether the sprint is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SprintState::Active
    }

    /// Fractional days until the sprint ends, negative once it has ended.
    #[must_use]
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<f64> {
        self.end_date
            .map(|end| (end - now).num_seconds() as f64 / 86_400.0)
    }
}
