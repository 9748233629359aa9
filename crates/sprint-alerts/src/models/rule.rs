//! Organization-scoped alert rule configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The eight sprint-health alert kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// No story points or time estimate
    MissingEstimate,
    /// In progress without logged time
    MissingTimeTracking,
    /// In progress without commits
    MissingCode,
    /// Work started without an open pull request
    MissingPr,
    /// Pull request open for too long
    UnmergedPr,
    /// Sprint about to end with the issue unfinished
    RunningOutOfTime,
    /// Finished well ahead of the sprint or estimate
    EarlyCompletion,
    /// Mention left without a reply
    UnansweredMention,
}

impl AlertType {
    /// All alert types, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::MissingEstimate,
        Self::MissingTimeTracking,
        Self::MissingCode,
        Self::MissingPr,
        Self::UnmergedPr,
        Self::RunningOutOfTime,
        Self::EarlyCompletion,
        Self::UnansweredMention,
    ];

    /// Stable snake_case identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingEstimate => "missing_estimate",
            Self::MissingTimeTracking => "missing_time_tracking",
            Self::MissingCode => "missing_code",
            Self::MissingPr => "missing_pr",
            Self::UnmergedPr => "unmerged_pr",
            Self::RunningOutOfTime => "running_out_of_time",
            Self::EarlyCompletion => "early_completion",
            Self::UnansweredMention => "unanswered_mention",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule severity, copied onto the alerts it raises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    /// Low
    Low,
    /// Medium
    #[default]
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

/// Allow-lists. An empty list does not restrict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConditions {
    /// Project keys
    #[serde(default)]
    pub project_keys: Vec<String>,
    /// Issue type names
    #[serde(default)]
    pub issue_types: Vec<String>,
    /// Status names
    #[serde(default)]
    pub statuses: Vec<String>,
    /// Assignee account IDs
    #[serde(default)]
    pub assignee_ids: Vec<String>,
}

/// Numeric knobs. Unset values fall back to per-detector defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleThresholds {
    /// Hours after creation before an estimate is required
    #[serde(default)]
    pub estimate_required_after_hours: Option<f64>,
    /// Hours in progress before time must be logged
    #[serde(default)]
    pub time_tracking_required_after_hours: Option<f64>,
    /// Hours in progress before commits are expected
    #[serde(default)]
    pub code_expected_after_hours: Option<f64>,
    /// Hours of started work before a pull request is expected
    #[serde(default)]
    pub pr_expected_after_hours: Option<f64>,
    /// Hours a pull request may stay open
    #[serde(default)]
    pub pr_stale_after_hours: Option<f64>,
    /// Days before sprint end that count as running out of time
    #[serde(default)]
    pub sprint_time_remaining_days: Option<f64>,
    /// Days left in the sprint that make a completion early
    #[serde(default)]
    pub early_completion_days: Option<f64>,
    /// Percentage under the original estimate that makes a completion early
    #[serde(default)]
    pub estimate_variance_percent: Option<f64>,
    /// Hours a mention may stay unanswered
    #[serde(default)]
    pub mention_response_hours: Option<f64>,
    /// Days of comment history to scan for mentions
    #[serde(default)]
    pub mention_lookback_days: Option<f64>,
}

/// Deny-lists and policy flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFilters {
    /// Status names that never match
    #[serde(default)]
    pub exclude_statuses: Vec<String>,
    /// Issue type names that never match
    #[serde(default)]
    pub exclude_issue_types: Vec<String>,
    /// Labels that exclude an issue
    #[serde(default)]
    pub exclude_labels: Vec<String>,
    /// Only match assigned issues
    #[serde(default)]
    pub only_if_assigned: bool,
    /// Count elapsed time on weekdays only
    #[serde(default)]
    pub working_days_only: bool,
}

/// Delivery channel for the external notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    /// Email
    Email,
    /// Team chat
    Chat,
    /// Text message
    Sms,
    /// In-app
    InApp,
}

/// How often the external notifier delivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationFrequency {
    /// As soon as the alert is raised
    #[default]
    Immediate,
    /// Hourly digest
    Hourly,
    /// Daily digest
    Daily,
}

/// Escalation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationPolicy {
    /// Minutes without acknowledgement before escalating
    pub after_minutes: u32,
    /// Account IDs to escalate to
    #[serde(default)]
    pub escalate_to: Vec<String>,
}

/// Quiet hours, in the organization's local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    /// Start, "HH:MM"
    pub start: String,
    /// End, "HH:MM"
    pub end: String,
    /// IANA timezone name
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Delivery preferences. Passed through to the notifier untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    /// Channels to deliver on
    #[serde(default)]
    pub channels: Vec<DeliveryChannel>,
    /// Delivery frequency
    #[serde(default)]
    pub frequency: NotificationFrequency,
    /// Escalation policy
    #[serde(default)]
    pub escalation: Option<EscalationPolicy>,
    /// Quiet hours
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
}

/// Organization-defined alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    /// Unique identifier
    pub id: String,
    /// Owning organization
    pub organization_id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Detector this rule drives
    pub alert_type: AlertType,
    /// Whether the rule is evaluated at all
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Severity of raised alerts
    #[serde(default)]
    pub severity: RuleSeverity,
    /// Allow-lists
    #[serde(default)]
    pub conditions: RuleConditions,
    /// Numeric thresholds
    #[serde(default)]
    pub thresholds: RuleThresholds,
    /// Deny-lists and flags
    #[serde(default)]
    pub filters: RuleFilters,
    /// Delivery preferences
    #[serde(default)]
    pub notification_settings: NotificationSettings,
}

const fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Create an enabled rule with no conditions, filters or thresholds.
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        alert_type: AlertType,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            name: alert_type.as_str().to_string(),
            alert_type,
            is_enabled: true,
            severity: RuleSeverity::default(),
            conditions: RuleConditions::default(),
            thresholds: RuleThresholds::default(),
            filters: RuleFilters::default(),
            notification_settings: NotificationSettings::default(),
        }
    }
}
