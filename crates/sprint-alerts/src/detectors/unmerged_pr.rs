//! Pull requests left open too long.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{threshold, DetectionContext, Detector};
use crate::error::Result;
use crate::lookups::PullRequest;
use crate::models::{AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint};

/// Age in hours after which an open pull request is stale.
pub const DEFAULT_PR_STALE_AFTER_HOURS: f64 = 72.0;

/// Raises an alert when any open pull request for the issue has gone stale.
pub struct UnmergedPrDetector;

impl UnmergedPrDetector {
    fn threshold_hours(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.pr_stale_after_hours,
            DEFAULT_PR_STALE_AFTER_HOURS,
        )
    }

    fn age_hours(pr: &PullRequest, now: DateTime<Utc>) -> f64 {
        (now - pr.created_at).num_seconds().max(0) as f64 / 3600.0
    }

    async fn stale(
        issue: &Issue,
        rule: &AlertRule,
        ctx: &DetectionContext,
    ) -> Result<Vec<PullRequest>> {
        let limit = Self::threshold_hours(rule);
        Ok(ctx
            .lookups
            .open_pull_requests(&issue.key)
            .await?
            .into_iter()
            .filter(|pr| Self::age_hours(pr, ctx.now) >= limit)
            .collect())
    }
}

#[async_trait]
impl Detector for UnmergedPrDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::UnmergedPr
    }

    async fn should_trigger(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        _changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if issue.is_done() {
            return Ok(false);
        }
        Ok(!Self::stale(issue, rule, ctx).await?.is_empty())
    }

    async fn should_resolve(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        if issue.is_done() {
            return Ok(true);
        }
        Ok(Self::stale(issue, rule, ctx).await?.is_empty())
    }

    fn generate_title(&self, issue: &Issue) -> String {
        format!("Unmerged Pull Request: {}", issue.key)
    }

    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String {
        let count = metadata
            .trigger
            .get("stalePullRequests")
            .and_then(serde_json::Value::as_array)
            .map_or(0, Vec::len);
        let oldest = metadata
            .trigger
            .get("oldestAgeHours")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or_default();
        format!(
            "{} has {count} pull request(s) open past the limit, the oldest for {oldest:.1} hours.",
            issue.key
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
        let stale = Self::stale(issue, rule, ctx).await?;
        let oldest = stale
            .iter()
            .map(|pr| Self::age_hours(pr, ctx.now))
            .fold(0.0_f64, f64::max);
        let prs: Vec<serde_json::Value> = stale
            .iter()
            .map(|pr| {
                json!({
                    "id": pr.id,
                    "title": pr.title,
                    "url": pr.url,
                    "ageHours": Self::age_hours(pr, ctx.now),
                })
            })
            .collect();

        Ok(AlertMetadata::new(issue, ctx.now)
            .threshold("prStaleAfterHours", Self::threshold_hours(rule))
            .measured("stalePullRequests", prs)
            .measured("oldestAgeHours", oldest))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{done, in_progress, now, rule};
    use super::*;
    use crate::lookups::{Lookups, StaticLookups};
    use chrono::Duration;
    use std::sync::Arc;

    fn pr(id: &str, age_hours: i64) -> PullRequest {
        PullRequest {
            id: id.to_string(),
            title: format!("PR {id}"),
            url: Some(format!("https://git.example.com/pr/{id}")),
            author: None,
            created_at: now() - Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn test_stale_pr_triggers() {
        let r = rule(AlertType::UnmergedPr);
        let i = in_progress(now() - Duration::days(5));
        let source = Arc::new(StaticLookups::new());
        source
            .set_pull_requests("TEST-123", vec![pr("1", 10), pr("2", 100)])
            .await;
        let ctx = DetectionContext::new(now(), Lookups::from_static(source));

        let detector = UnmergedPrDetector;
        assert!(detector.should_trigger(&i, &r, None, &ctx).await.unwrap());
        assert!(!detector.should_resolve(&i, &r, &ctx).await.unwrap());

        let metadata = detector
            .generate_metadata(&i, &r, None, None, &ctx)
            .await
            .unwrap();
        let prs = metadata.trigger["stalePullRequests"].as_array().unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0]["id"], "2");
        assert_eq!(metadata.trigger["oldestAgeHours"], json!(100.0));
    }

    #[tokio::test]
    async fn test_fresh_prs_resolve() {
        let r = rule(AlertType::UnmergedPr);
        let i = in_progress(now() - Duration::days(5));
        let source = Arc::new(StaticLookups::new());
        source.set_pull_requests("TEST-123", vec![pr("1", 10)]).await;
        let ctx = DetectionContext::new(now(), Lookups::from_static(source));

        let detector = UnmergedPrDetector;
        assert!(!detector.should_trigger(&i, &r, None, &ctx).await.unwrap());
        assert!(detector.should_resolve(&i, &r, &ctx).await.unwrap());
        assert!(detector.should_resolve(&done(), &r, &ctx).await.unwrap());
    }
}
