//! Issues left without story points or a time estimate.

use async_trait::async_trait;

use super::{threshold, DetectionContext, Detector};
use crate::error::Result;
use crate::models::{AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint};

/// Hours after creation before an estimate is required.
pub const DEFAULT_ESTIMATE_REQUIRED_AFTER_HOURS: f64 = 24.0;

/// Raises an alert when an open issue has no estimate some time after creation.
pub struct MissingEstimateDetector;

impl MissingEstimateDetector {
    fn threshold_hours(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.estimate_required_after_hours,
            DEFAULT_ESTIMATE_REQUIRED_AFTER_HOURS,
        )
    }
}

#[async_trait]
impl Detector for MissingEstimateDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::MissingEstimate
    }

    async fn should_trigger(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        _changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if issue.is_done() || issue.has_estimate() {
            return Ok(false);
        }
        Ok(ctx.elapsed_hours(issue.created_at, rule) >= Self::threshold_hours(rule))
    }

    async fn should_resolve(
        &self,
        issue: &Issue,
        _rule: &AlertRule,
        _ctx: &DetectionContext,
    ) -> Result<bool> {
        Ok(issue.has_estimate() || issue.is_done())
    }

    fn generate_title(&self, issue: &Issue) -> String {
        format!("Missing Estimate: {}", issue.key)
    }

    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String {
        let hours = metadata
            .trigger
            .get("hoursSinceCreated")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or_default();
        format!(
            "{} \"{}\" has had no story points or time estimate for {hours:.1} hours.",
            issue.key, issue.summary
        )
    }

    async fn generate_metadata(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        _sprint: Option<&Sprint>,
        _changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<AlertMetadata> {
        Ok(AlertMetadata::new(issue, ctx.now)
            .threshold("estimateRequiredAfterHours", Self::threshold_hours(rule))
            .measured(
                "hoursSinceCreated",
                ctx.elapsed_hours(issue.created_at, rule),
            )
            .measured("storyPoints", issue.story_points)
            .measured("originalEstimateSeconds", issue.original_estimate_seconds))
    }
}
