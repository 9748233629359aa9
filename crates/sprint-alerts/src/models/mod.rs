//! Entity type definitions.

mod alert;
mod issue;
mod rule;

pub use alert::{
    AlertMetadata, AlertStatus, DetectedAlert, IssueSnapshot, NaturalKey, SprintSnapshot,
};
pub use issue::{
    ChangeType, Changelog, ChangelogItem, Issue, Sprint, SprintState, StatusCategory,
};
pub use rule::{
    AlertRule, AlertType, DeliveryChannel, EscalationPolicy, NotificationFrequency,
    NotificationSettings, QuietHours, RuleConditions, RuleFilters, RuleSeverity, RuleThresholds,
};
