//! Work with code but no open pull request.

use async_trait::async_trait;

use super::{status_since, threshold, DetectionContext, Detector};
use crate::error::Result;
use crate::models::{AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint};

/// Hours before a pull request is expected.
pub const DEFAULT_PR_EXPECTED_AFTER_HOURS: f64 = 48.0;

/// Raises an alert when an issue has commits, or sits in review, without an open PR.
pub struct MissingPrDetector;

impl MissingPrDetector {
    fn threshold_hours(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.pr_expected_after_hours,
            DEFAULT_PR_EXPECTED_AFTER_HOURS,
        )
    }

    fn in_review(issue: &Issue) -> bool {
        issue.status.to_lowercase().contains("review")
    }
}

#[async_trait]
impl Detector for MissingPrDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::MissingPr
    }

    async fn should_trigger(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if issue.is_done() {
            return Ok(false);
        }
        let hours = ctx.elapsed_hours(status_since(issue, changelog), rule);
        if hours < Self::threshold_hours(rule) {
            return Ok(false);
        }
        let has_code = Self::in_review(issue) || ctx.lookups.commit_count(&issue.key).await? > 0;
        if !has_code {
            return Ok(false);
        }
        Ok(ctx.lookups.open_pull_requests(&issue.key).await?.is_empty())
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
        Ok(!ctx.lookups.open_pull_requests(&issue.key).await?.is_empty())
    }

    fn generate_title(&self, issue: &Issue) -> String {
        format!("Missing Pull Request: {}", issue.key)
    }

    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String {
        let commits = metadata
            .trigger
            .get("commitCount")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_default();
        format!(
            "{} has {commits} commit(s) in \"{}\" but no open pull request.",
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
        let commits = ctx.lookups.commit_count(&issue.key).await?;
        Ok(AlertMetadata::new(issue, ctx.now)
            .threshold("prExpectedAfterHours", Self::threshold_hours(rule))
            .measured("hoursInStatus", ctx.elapsed_hours(since, rule))
            .measured("commitCount", commits)
            .measured("inReview", Self::in_review(issue)))
    }
}
