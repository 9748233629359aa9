//! Work finished well ahead of the sprint end or well under its estimate.

use async_trait::async_trait;

use super::{threshold, DetectionContext, Detector};
use crate::error::Result;
use crate::models::{
    AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint, SprintSnapshot,
};

/// Days left in the sprint at which a finished issue counts as early.
pub const DEFAULT_EARLY_COMPLETION_DAYS: f64 = 3.0;

/// Percent under the original estimate at which a finished issue counts as early.
pub const DEFAULT_ESTIMATE_VARIANCE_PERCENT: f64 = 50.0;

/// Flags finished issues that suggest spare capacity or a padded estimate.
pub struct EarlyCompletionDetector;

impl EarlyCompletionDetector {
    fn threshold_days(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.early_completion_days,
            DEFAULT_EARLY_COMPLETION_DAYS,
        )
    }

    fn variance_percent(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.estimate_variance_percent,
            DEFAULT_ESTIMATE_VARIANCE_PERCENT,
        )
    }

    /// Time spent allowed before the issue stops counting as early.
    fn under_estimate_limit(issue: &Issue, rule: &AlertRule) -> Option<f64> {
        let estimate = issue.original_estimate_seconds.filter(|e| *e > 0)?;
        Some(estimate as f64 * (1.0 - Self::variance_percent(rule) / 100.0))
    }
}

#[async_trait]
impl Detector for EarlyCompletionDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::EarlyCompletion
    }

    async fn should_trigger(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        _changelog: Option<&Changelog>,
        _ctx: &DetectionContext,
    ) -> Result<bool> {
        if !issue.is_done() {
            return Ok(false);
        }
        Ok(Self::under_estimate_limit(issue, rule)
            .is_some_and(|limit| issue.time_spent() as f64 <= limit))
    }

    async fn should_resolve(
        &self,
        issue: &Issue,
        _rule: &AlertRule,
        _ctx: &DetectionContext,
    ) -> Result<bool> {
        Ok(!issue.is_done())
    }

    fn generate_title(&self, issue: &Issue) -> String {
        format!("Early Completion: {}", issue.key)
    }

    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String {
        if let Some(sprint) = &metadata.sprint {
            return format!(
                "{} was completed with {:.1} days left in sprint \"{}\".",
                issue.key,
                sprint.days_remaining.unwrap_or_default(),
                sprint.name
            );
        }
        let hours = issue.time_spent() as f64 / 3600.0;
        let estimate = issue.original_estimate_seconds.unwrap_or_default() as f64 / 3600.0;
        format!(
            "{} was completed in {hours:.1} hours against an estimate of {estimate:.1} hours.",
            issue.key
        )
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
            .threshold("earlyCompletionDays", Self::threshold_days(rule))
            .threshold("estimateVariancePercent", Self::variance_percent(rule))
            .measured("timeSpentSeconds", issue.time_spent())
            .measured("originalEstimateSeconds", issue.original_estimate_seconds);
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
        if !sprint.is_active() || !issue.is_done() {
            return Ok(false);
        }
        Ok(sprint
            .days_remaining(ctx.now)
            .is_some_and(|days| days >= Self::threshold_days(rule)))
    }

    async fn should_resolve_sprint(
        &self,
        issue: &Issue,
        sprint: &Sprint,
        _rule: &AlertRule,
        _ctx: &DetectionContext,
    ) -> Result<bool> {
        Ok(!issue.is_done() || !sprint.is_active())
    }
}
