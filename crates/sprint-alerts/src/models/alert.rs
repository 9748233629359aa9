//! Detected alerts and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::issue::{Issue, Sprint};
use super::rule::{AlertRule, AlertType, RuleSeverity};

/// Alert lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Condition detected, awaiting action
    Active,
    /// Seen by a person
    Acknowledged,
    /// Closed; terminal for this alert
    Resolved,
    /// Muted until a suppression window ends
    Suppressed,
}

impl AlertStatus {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Suppressed => "suppressed",
        }
    }

    /// Whether the alert still occupies its natural-key slot.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }

    /// Whether `self -> to` is an allowed lifecycle move.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Acknowledged | Self::Resolved | Self::Suppressed)
                | (Self::Acknowledged, Self::Resolved | Self::Active)
                | (Self::Suppressed, Self::Active)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key: at most one open alert per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NaturalKey {
    /// Organization
    pub organization_id: String,
    /// Rule
    pub rule_id: String,
    /// Issue
    pub issue_id: String,
}

impl NaturalKey {
    /// Build the key for a rule and issue.
    #[must_use]
    pub fn new(rule: &AlertRule, issue: &Issue) -> Self {
        Self {
            organization_id: rule.organization_id.clone(),
            rule_id: rule.id.clone(),
            issue_id: issue.id.clone(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.organization_id, self.rule_id, self.issue_id)
    }
}

/// Issue fields captured when an alert is raised or refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSnapshot {
    /// Issue key
    pub key: String,
    /// Issue title
    pub summary: String,
    /// Status name
    pub status: String,
    /// Project key
    pub project_key: String,
    /// Assignee account ID
    pub assignee_id: Option<String>,
}

impl From<&Issue> for IssueSnapshot {
    fn from(issue: &Issue) -> Self {
        Self {
            key: issue.key.clone(),
            summary: issue.summary.clone(),
            status: issue.status.clone(),
            project_key: issue.project_key.clone(),
            assignee_id: issue.assignee_id.clone(),
        }
    }
}

/// Sprint fields captured for sprint-scoped alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintSnapshot {
    /// Sprint ID
    pub id: String,
    /// Sprint name
    pub name: String,
    /// Sprint end date
    pub end_date: Option<DateTime<Utc>>,
    /// Fractional days left at evaluation time
    pub days_remaining: Option<f64>,
}

impl SprintSnapshot {
    /// Capture a sprint as of `now`.
    #[must_use]
    pub fn capture(sprint: &Sprint, now: DateTime<Utc>) -> Self {
        Self {
            id: sprint.id.clone(),
            name: sprint.name.clone(),
            end_date: sprint.end_date,
            days_remaining: sprint.days_remaining(now),
        }
    }
}

/// Detector-specific snapshot of the triggering condition.
///
/// Maps are ordered so identical inputs serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMetadata {
    /// Issue fields
    pub issue: IssueSnapshot,
    /// Sprint fields, for sprint-scoped detectors
    #[serde(default)]
    pub sprint: Option<SprintSnapshot>,
    /// Threshold values used in the decision
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    /// Measured values that crossed the thresholds
    #[serde(default)]
    pub trigger: BTreeMap<String, Value>,
    /// Evaluation clock
    pub evaluated_at: DateTime<Utc>,
}

impl AlertMetadata {
    /// Start a snapshot for an issue.
    #[must_use]
    pub fn new(issue: &Issue, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            issue: IssueSnapshot::from(issue),
            sprint: None,
            thresholds: BTreeMap::new(),
            trigger: BTreeMap::new(),
            evaluated_at,
        }
    }

    /// Attach a sprint snapshot.
    #[must_use]
    pub fn with_sprint(mut self, sprint: SprintSnapshot) -> Self {
        self.sprint = Some(sprint);
        self
    }

    /// Record a threshold value.
    #[must_use]
    pub fn threshold(mut self, name: &str, value: f64) -> Self {
        self.thresholds.insert(name.to_string(), value);
        self
    }

    /// Record a measured value.
    #[must_use]
    pub fn measured(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.trigger.insert(name.to_string(), value.into());
        self
    }
}

/// A persisted alert raised by a rule for an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedAlert {
    /// Unique identifier, never reused
    pub id: String,
    /// Organization
    pub organization_id: String,
    /// Rule that raised the alert
    pub rule_id: String,
    /// Issue ID
    pub issue_id: String,
    /// Issue key
    pub issue_key: String,
    /// Alert type
    pub alert_type: AlertType,
    /// Severity copied from the rule
    pub severity: RuleSeverity,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Lifecycle status
    pub status: AlertStatus,
    /// Trigger snapshot
    pub metadata: AlertMetadata,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Resolved timestamp
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Why the alert was resolved
    #[serde(default)]
    pub resolution_reason: Option<String>,
    /// Who acknowledged the alert
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    /// End of the suppression window
    #[serde(default)]
    pub suppressed_until: Option<DateTime<Utc>>,
    /// When the detector last reported the condition gone without resolving
    #[serde(default)]
    pub condition_cleared_at: Option<DateTime<Utc>>,
}

impl DetectedAlert {
    /// Create a new active alert with a fresh ID.
    #[must_use]
    pub fn new(
        rule: &AlertRule,
        issue: &Issue,
        title: String,
        description: String,
        metadata: AlertMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id: rule.organization_id.clone(),
            rule_id: rule.id.clone(),
            issue_id: issue.id.clone(),
            issue_key: issue.key.clone(),
            alert_type: rule.alert_type,
            severity: rule.severity,
            title,
            description,
            status: AlertStatus::Active,
            metadata,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            resolution_reason: None,
            acknowledged_by: None,
            suppressed_until: None,
            condition_cleared_at: None,
        }
    }

    /// The alert's natural key.
    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            organization_id: self.organization_id.clone(),
            rule_id: self.rule_id.clone(),
            issue_id: self.issue_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use AlertStatus::{Acknowledged, Active, Resolved, Suppressed};

        assert!(Active.can_transition_to(Acknowledged));
        assert!(Active.can_transition_to(Resolved));
        assert!(Active.can_transition_to(Suppressed));
        assert!(Acknowledged.can_transition_to(Resolved));
        assert!(Acknowledged.can_transition_to(Active));
        assert!(Suppressed.can_transition_to(Active));

        assert!(!Suppressed.can_transition_to(Resolved));
        assert!(!Acknowledged.can_transition_to(Suppressed));
        for to in [Active, Acknowledged, Resolved, Suppressed] {
            assert!(!Resolved.can_transition_to(to));
        }
    }

    #[test]
    fn test_only_resolved_frees_the_slot() {
        assert!(AlertStatus::Active.is_open());
        assert!(AlertStatus::Acknowledged.is_open());
        assert!(AlertStatus::Suppressed.is_open());
        assert!(!AlertStatus::Resolved.is_open());
    }
}
