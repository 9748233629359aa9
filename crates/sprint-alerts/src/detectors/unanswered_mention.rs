//! Comment mentions nobody replied to.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;

use super::{threshold, DetectionContext, Detector};
use crate::error::Result;
use crate::lookups::Mention;
use crate::models::{AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint};

/// Hours a mentioned user has to reply.
pub const DEFAULT_MENTION_RESPONSE_HOURS: f64 = 24.0;

/// How far back mentions are considered.
pub const DEFAULT_MENTION_LOOKBACK_DAYS: f64 = 7.0;

/// Raises an alert when a recent mention has gone unanswered too long.
pub struct UnansweredMentionDetector;

impl UnansweredMentionDetector {
    fn response_hours(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.mention_response_hours,
            DEFAULT_MENTION_RESPONSE_HOURS,
        )
    }

    fn lookback_days(rule: &AlertRule) -> f64 {
        threshold(
            rule.thresholds.mention_lookback_days,
            DEFAULT_MENTION_LOOKBACK_DAYS,
        )
    }

    /// Start of the lookback window. Windows reaching past the representable
    /// range start at the earliest instant.
    fn window_start(rule: &AlertRule, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::try_seconds((Self::lookback_days(rule) * 86_400.0) as i64)
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    async fn overdue(
        issue: &Issue,
        rule: &AlertRule,
        ctx: &DetectionContext,
    ) -> Result<Vec<Mention>> {
        let since = Self::window_start(rule, ctx.now);
        let limit = Self::response_hours(rule);
        Ok(ctx
            .lookups
            .recent_mentions(&issue.id, since)
            .await?
            .into_iter()
            .filter(|m| !m.answered && ctx.elapsed_hours(m.created_at, rule) >= limit)
            .collect())
    }
}

#[async_trait]
impl Detector for UnansweredMentionDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::UnansweredMention
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
        Ok(!Self::overdue(issue, rule, ctx).await?.is_empty())
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
        Ok(Self::overdue(issue, rule, ctx).await?.is_empty())
    }

    fn generate_title(&self, issue: &Issue) -> String {
        format!("Unanswered Mention: {}", issue.key)
    }

    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String {
        let users: Vec<&str> = metadata
            .trigger
            .get("mentions")
            .and_then(serde_json::Value::as_array)
            .map(|mentions| {
                mentions
                    .iter()
                    .filter_map(|m| m["mentionedUserId"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        format!(
            "{} has unanswered mentions of {}.",
            issue.key,
            if users.is_empty() {
                "team members".to_string()
            } else {
                users.join(", ")
            }
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
        let mentions: Vec<serde_json::Value> = Self::overdue(issue, rule, ctx)
            .await?
            .iter()
            .map(|m| {
                json!({
                    "commentId": m.comment_id,
                    "authorId": m.author_id,
                    "mentionedUserId": m.mentioned_user_id,
                    "hoursWaiting": ctx.elapsed_hours(m.created_at, rule),
                })
            })
            .collect();

        Ok(AlertMetadata::new(issue, ctx.now)
            .threshold("mentionResponseHours", Self::response_hours(rule))
            .threshold("mentionLookbackDays", Self::lookback_days(rule))
            .measured("mentions", mentions))
    }
}
