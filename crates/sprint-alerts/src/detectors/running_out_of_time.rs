//! Unfinished issues in a sprint that is about to end.

use async_trait::async_trait;

use super::{threshold, DetectionContext, Detector};
use crate::error::Result;
use crate::models::{
    AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint, SprintSnapshot,
};

/// Days left in the sprint at which unfinished work is flagged.
pub const DEFAULT_SPRINT_TIME_REMAINING_DAYS: f64 = 2.0;

/// Sprint-scoped detector for work that will not make the sprint end.
///
/// Only the sprint scan raises this alert. Single-issue events can still
/// resolve it once the issue is done.
pub struct RunningOutOfTimeDetector;

impl RunningOutOfTimeDetector {
    fn threshold_days(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.sprint_time_remaining_days,
            DEFAULT_SPRINT_TIME_REMAINING_DAYS,
        )
    }
}

#[async_trait]
impl Detector for RunningOutOfTimeDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::RunningOutOfTime
    }

    async fn should_trigger(
        &self,
        _issue: &Issue,
        _rule: &AlertRule,
        _changelog: Option<&Changelog>,
        _ctx: &DetectionContext,
    ) -> Result<bool> {
        Ok(false)
    }

    async fn should_resolve(
        &self,
        issue: &Issue,
        _rule: &AlertRule,
        _ctx: &DetectionContext,
    ) -> Result<bool> {
        Ok(issue.is_done())
    }

    fn generate_title(&self, issue: &Issue) -> String {
        format!("Running Out of Time: {}", issue.key)
    }

    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String {
        match &metadata.sprint {
            Some(sprint) => format!(
                "{} is not done and sprint \"{}\" ends in {:.1} days.",
                issue.key,
                sprint.name,
                sprint.days_remaining.unwrap_or_default()
            ),
            None => format!("{} is not done and its sprint is ending.", issue.key),
        }
    }

    async fn generate_metadata(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        sprint: Option<&Sprint>,
        _changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<AlertMetadata> {
        let mut metadata = AlertMetadata::new(issue, ctx.now)
            .threshold("sprintTimeRemainingDays", Self::threshold_days(rule))
            .measured("status", issue.status.clone());
        if let Some(sprint) = sprint {
            metadata = metadata
                .measured("daysRemaining", sprint.days_remaining(ctx.now))
                .with_sprint(SprintSnapshot::capture(sprint, ctx.now));
        }
        Ok(metadata)
    }

    fn sprint_scoped(&self) -> bool {
        true
    }

    async fn should_trigger_sprint(
        &self,
        issue: &Issue,
        sprint: &Sprint,
        rule: &AlertRule,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if !sprint.is_active() || issue.is_done() {
            return Ok(false);
        }
        Ok(sprint
            .days_remaining(ctx.now)
            .is_some_and(|days| days > 0.0 && days <= Self::threshold_days(rule)))
    }

    async fn should_resolve_sprint(
        &self,
        issue: &Issue,
        sprint: &Sprint,
        _rule: &AlertRule,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if issue.is_done() || !sprint.is_active() {
            return Ok(true);
        }
        Ok(!matches!(sprint.days_remaining(ctx.now), Some(days) if days > 0.0))
    }
}
