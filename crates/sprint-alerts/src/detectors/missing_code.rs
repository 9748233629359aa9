//! In-progress issues with no commits referencing them.

use async_trait::async_trait;

use super::{status_since, threshold, DetectionContext, Detector};
use crate::error::Result;
use crate::models::{AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint};

/// Hours in progress before commits are expected.
pub const DEFAULT_CODE_EXPECTED_AFTER_HOURS: f64 = 72.0;

/// Raises an alert when an issue has been in progress for a while with no code.
///
/// No commits found counts as zero commits.
pub struct MissingCodeDetector;

impl MissingCodeDetector {
    fn threshold_hours(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.code_expected_after_hours,
            DEFAULT_CODE_EXPECTED_AFTER_HOURS,
        )
    }
}

#[async_trait]
impl Detector for MissingCodeDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::MissingCode
    }

    async fn should_trigger(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if !issue.is_in_progress() {
            return Ok(false);
        }
        let hours = ctx.elapsed_hours(status_since(issue, changelog), rule);
        if hours < Self::threshold_hours(rule) {
            return Ok(false);
        }
        Ok(ctx.lookups.commit_count(&issue.key).await? == 0)
    }

    async fn should_resolve(
        &self,
        issue: &Issue,
        _rule: &AlertRule,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if issue.is_done() {
            return Ok(true);
        }
        Ok(ctx.lookups.commit_count(&issue.key).await? > 0)
    }

    fn generate_title(&self, issue: &Issue) -> String {
        format!("Missing Code: {}", issue.key)
    }

    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String {
        let hours = metadata
            .trigger
            .get("hoursInProgress")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or_default();
        format!(
            "{} has been in progress for {hours:.1} hours and no commits reference it.",
            issue.key
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
        let commits = ctx.lookups.commit_count(&issue.key).await?;
        Ok(AlertMetadata::new(issue, ctx.now)
            .threshold("codeExpectedAfterHours", Self::threshold_hours(rule))
            .measured("hoursInProgress", ctx.elapsed_hours(since, rule))
            .measured("commitCount", commits))
    }
}
