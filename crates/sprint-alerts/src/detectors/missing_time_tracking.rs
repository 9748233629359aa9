//! In-progress issues with no time logged.

use async_trait::async_trait;

use super::{status_since, threshold, DetectionContext, Detector};
use crate::error::Result;
use crate::models::{AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint};

/// Hours in progress before time must be logged.
pub const DEFAULT_TIME_TRACKING_REQUIRED_AFTER_HOURS: f64 = 48.0;

/// Raises an alert when work is under way but nobody is logging time.
pub struct MissingTimeTrackingDetector;

impl MissingTimeTrackingDetector {
    fn threshold_hours(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.time_tracking_required_after_hours,
            DEFAULT_TIME_TRACKING_REQUIRED_AFTER_HOURS,
        )
    }
}

#[async_trait]
impl Detector for MissingTimeTrackingDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::MissingTimeTracking
    }

    async fn should_trigger(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if !issue.is_in_progress() || issue.time_spent() > 0 {
            return Ok(false);
        }
        let hours = ctx.elapsed_hours(status_since(issue, changelog), rule);
        Ok(hours >= Self::threshold_hours(rule))
    }

    async fn should_resolve(
        &self,
        issue: &Issue,
        _rule: &AlertRule,
        _ctx: &DetectionContext,
    ) -> Result<bool> {
        Ok(issue.time_spent() > 0 || issue.is_done())
    }

    fn generate_title(&self, issue: &Issue) -> String {
        format!("Missing Time Tracking: {}", issue.key)
    }

    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String {
        let hours = metadata
            .trigger
            .get("hoursInProgress")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or_default();
        format!(
            "{} has been in \"{}\" for {hours:.1} hours without any logged time.",
            issue.key, issue.status
        )
    }

    async fn generate_metadata(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        _sprint: Option<&Sprint>,
        changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<AlertMetadata> {
        let since = status_since(issue, changelog);
        Ok(AlertMetadata::new(issue, ctx.now)
            .threshold(
                "timeTrackingRequiredAfterHours",
                Self::threshold_hours(rule),
            )
            .measured("inProgressSince", since.to_rfc3339())
            .measured("hoursInProgress", ctx.elapsed_hours(since, rule))
            .measured("timeSpentSeconds", issue.time_spent()))
    }
}
