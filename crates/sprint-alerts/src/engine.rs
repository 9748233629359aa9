//! Detection engine facade.
//!
//! Ties the rule snapshots, detectors, lifecycle manager and webhook pipeline
//! together. Callers either hand it issue and sprint data directly
//! ([`DetectionEngine::process_issue_event`], [`DetectionEngine::process_sprint_batch`])
//! or feed it raw webhooks ([`DetectionEngine::ingest_webhook`]) that workers
//! later drain through [`DetectionEngine::handle_event`].

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WebhookSecrets;
use crate::dedup::{IdempotencyStore, InMemoryIdempotencyStore, DEFAULT_DEDUP_TTL};
use crate::detectors::{DetectionContext, DetectorRegistry};
use crate::error::{IntakeError, Result};
use crate::intake::{self, WebhookEvent, WebhookHeaders};
use crate::lifecycle::AlertLifecycleManager;
use crate::lookups::Lookups;
use crate::models::{AlertRule, ChangeType, Changelog, DetectedAlert, Issue, Sprint};
use crate::notify::{NotificationSink, TracingSink};
use crate::queue::{EventQueue, InMemoryEventQueue};
use crate::store::{AlertRepository, RuleCache, RuleRepository};

/// How a webhook was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    /// Accepted but nothing to evaluate
    Processed,
    /// Queued for a worker
    Queued,
    /// Already accepted within the dedup window
    Duplicate,
}

/// Response body for an accepted webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceipt {
    /// Event ID (provider ID or content hash)
    pub event_id: String,
    /// Whether this delivery was queued
    pub queued: bool,
    /// Outcome
    pub status: ReceiptStatus,
}

/// Builder for [`DetectionEngine`].
pub struct DetectionEngineBuilder {
    rules: Arc<dyn RuleRepository>,
    alerts: Arc<dyn AlertRepository>,
    registry: DetectorRegistry,
    sink: Arc<dyn NotificationSink>,
    lookups: Lookups,
    queue: Arc<dyn EventQueue>,
    dedup: Arc<dyn IdempotencyStore>,
    secrets: WebhookSecrets,
    dedup_ttl: Duration,
}

impl DetectionEngineBuilder {
    /// Replace the detector registry.
    #[must_use]
    pub fn registry(mut self, registry: DetectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the notification sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the external lookups.
    #[must_use]
    pub fn lookups(mut self, lookups: Lookups) -> Self {
        self.lookups = lookups;
        self
    }

    /// Replace the event queue.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn EventQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Replace the idempotency store.
    #[must_use]
    pub fn dedup(mut self, dedup: Arc<dyn IdempotencyStore>) -> Self {
        self.dedup = dedup;
        self
    }

    /// Webhook secrets.
    #[must_use]
    pub fn secrets(mut self, secrets: WebhookSecrets) -> Self {
        self.secrets = secrets;
        self
    }

    /// Lifetime of idempotency records.
    #[must_use]
    pub const fn dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> DetectionEngine {
        DetectionEngine {
            rules: RuleCache::new(self.rules),
            lifecycle: AlertLifecycleManager::new(self.alerts, self.registry, self.sink),
            lookups: self.lookups,
            queue: self.queue,
            dedup: self.dedup,
            secrets: self.secrets,
            dedup_ttl: self.dedup_ttl,
        }
    }
}

/// Entry point for alert detection.
pub struct DetectionEngine {
    rules: RuleCache,
    lifecycle: AlertLifecycleManager,
    lookups: Lookups,
    queue: Arc<dyn EventQueue>,
    dedup: Arc<dyn IdempotencyStore>,
    secrets: WebhookSecrets,
    dedup_ttl: Duration,
}

impl DetectionEngine {
    /// Start building an engine over the given repositories.
    ///
    /// Defaults: every built-in detector, a [`TracingSink`], lookups that find
    /// nothing, in-memory queue and dedup store, and no webhook secrets.
    #[must_use]
    pub fn builder(
        rules: Arc<dyn RuleRepository>,
        alerts: Arc<dyn AlertRepository>,
    ) -> DetectionEngineBuilder {
        DetectionEngineBuilder {
            rules,
            alerts,
            registry: DetectorRegistry::with_defaults(),
            sink: Arc::new(TracingSink),
            lookups: Lookups::empty(),
            queue: Arc::new(InMemoryEventQueue::default()),
            dedup: Arc::new(InMemoryIdempotencyStore::new()),
            secrets: WebhookSecrets::default(),
            dedup_ttl: DEFAULT_DEDUP_TTL,
        }
    }

    /// Lifecycle manager, for acknowledge, suppress and manual resolve.
    #[must_use]
    pub const fn lifecycle(&self) -> &AlertLifecycleManager {
        &self.lifecycle
    }

    /// Rule snapshot cache.
    #[must_use]
    pub const fn rules(&self) -> &RuleCache {
        &self.rules
    }

    /// Event queue drained by the workers.
    #[must_use]
    pub fn queue(&self) -> Arc<dyn EventQueue> {
        Arc::clone(&self.queue)
    }

    /// Evaluate every rule of the organization against an issue change.
    ///
    /// Returns the alerts created by this call. A `deleted` change resolves
    /// the issue's open alerts instead.
    pub async fn process_issue_event(
        &self,
        organization_id: &str,
        issue: &Issue,
        change_type: ChangeType,
        changelog: Option<&Changelog>,
    ) -> Result<Vec<DetectedAlert>> {
        if change_type == ChangeType::Deleted {
            self.resolve_deleted_issue(organization_id, &issue.id).await?;
            return Ok(Vec::new());
        }

        let snapshot = self.rules.snapshot(organization_id).await?;
        let ctx = DetectionContext::new(Utc::now(), self.lookups.clone());
        let mut created = Vec::new();

        for rule in &snapshot.rules {
            match self.lifecycle.evaluate(rule, issue, changelog, &ctx).await? {
                Ok(outcome) => created.extend(outcome.created()),
                Err(skip) => {
                    debug!(rule_id = %rule.id, issue_key = %issue.key, ?skip, "Rule skipped");
                }
            }
        }

        debug!(
            organization_id = %organization_id,
            issue_key = %issue.key,
            rules = snapshot.rules.len(),
            created = created.len(),
            "Issue event processed"
        );
        Ok(created)
    }

    /// Evaluate sprint-scoped rules for every issue in a sprint.
    pub async fn process_sprint_batch(
        &self,
        organization_id: &str,
        sprint: &Sprint,
        issues: &[Issue],
    ) -> Result<Vec<DetectedAlert>> {
        self.process_sprint_batch_cancellable(
            organization_id,
            sprint,
            issues,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`Self::process_sprint_batch`], stopping between issues once `cancel` fires.
    ///
    /// Each issue is settled on its own. A failure for one issue is logged and
    /// counted, and the batch moves on.
    pub async fn process_sprint_batch_cancellable(
        &self,
        organization_id: &str,
        sprint: &Sprint,
        issues: &[Issue],
        cancel: &CancellationToken,
    ) -> Result<Vec<DetectedAlert>> {
        let snapshot = self.rules.snapshot(organization_id).await?;
        let rules: Vec<&AlertRule> = snapshot
            .rules
            .iter()
            .filter(|rule| {
                self.lifecycle
                    .registry()
                    .get(rule.alert_type)
                    .is_some_and(|detector| detector.sprint_scoped())
            })
            .collect();
        if rules.is_empty() {
            debug!(organization_id = %organization_id, sprint_id = %sprint.id, "No sprint rules");
            return Ok(Vec::new());
        }

        let ctx = DetectionContext::new(Utc::now(), self.lookups.clone());
        let mut created = Vec::new();
        let mut evaluated = 0usize;
        let mut failures = 0usize;

        for issue in issues {
            if cancel.is_cancelled() {
                info!(
                    organization_id = %organization_id,
                    sprint_id = %sprint.id,
                    evaluated,
                    remaining = issues.len() - evaluated,
                    "Sprint batch cancelled"
                );
                break;
            }
            evaluated += 1;

            for rule in &rules {
                match self.lifecycle.evaluate_sprint(rule, issue, sprint, &ctx).await {
                    Ok(Ok(outcome)) => created.extend(outcome.created()),
                    Ok(Err(skip)) => {
                        debug!(rule_id = %rule.id, issue_key = %issue.key, ?skip, "Rule skipped");
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(
                            organization_id = %organization_id,
                            sprint_id = %sprint.id,
                            rule_id = %rule.id,
                            issue_key = %issue.key,
                            error = %e,
                            "Sprint evaluation failed for issue"
                        );
                        break;
                    }
                }
            }
        }

        info!(
            organization_id = %organization_id,
            sprint_id = %sprint.id,
            evaluated,
            created = created.len(),
            failures,
            "Sprint batch processed"
        );
        Ok(created)
    }

    /// Verify, parse, dedup and enqueue a webhook delivery.
    pub async fn ingest_webhook(
        &self,
        organization_id: &str,
        headers: &WebhookHeaders,
        raw: &[u8],
    ) -> std::result::Result<WebhookReceipt, IntakeError> {
        let Some(secret) = self.secrets.secret_for(organization_id) else {
            warn!(organization_id = %organization_id, "No webhook secret configured, rejecting");
            return Err(IntakeError::Authentication(
                "no webhook secret configured".to_string(),
            ));
        };
        let signature = headers
            .signature
            .as_deref()
            .ok_or_else(|| IntakeError::Authentication("missing signature".to_string()))?;
        if !intake::verify_signature(raw, signature, secret) {
            warn!(organization_id = %organization_id, "Invalid webhook signature");
            return Err(IntakeError::Authentication("invalid signature".to_string()));
        }

        let event = intake::parse_event(organization_id, headers, raw, Utc::now())?;
        if !event.kind.is_recognized() {
            debug!(
                event_id = %event.event_id,
                kind = ?event.kind,
                "Unrecognized webhook event, nothing to evaluate"
            );
            return Ok(WebhookReceipt {
                event_id: event.event_id,
                queued: false,
                status: ReceiptStatus::Processed,
            });
        }

        let key = format!("{organization_id}:{}", event.event_id);
        if !self.dedup.remember(&key, self.dedup_ttl).await? {
            info!(
                organization_id = %organization_id,
                event_id = %event.event_id,
                "Duplicate webhook delivery"
            );
            return Ok(WebhookReceipt {
                event_id: event.event_id,
                queued: false,
                status: ReceiptStatus::Duplicate,
            });
        }

        let event_id = event.event_id.clone();
        if let Err(e) = self.queue.enqueue(event).await {
            // Let the provider's redelivery through since nothing was queued.
            if let Err(forget) = self.dedup.forget(&key).await {
                warn!(event_id = %event_id, error = %forget, "Failed to release idempotency key");
            }
            return Err(e.into());
        }

        info!(organization_id = %organization_id, event_id = %event_id, "Webhook queued");
        Ok(WebhookReceipt {
            event_id,
            queued: true,
            status: ReceiptStatus::Queued,
        })
    }

    /// Process one queued event. Workers call this.
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<()> {
        let organization_id = event.organization_id.as_str();

        if let Some(sprint) = &event.sprint {
            self.process_sprint_batch(organization_id, sprint, &event.sprint_issues)
                .await?;
            return Ok(());
        }

        if event.change_type == ChangeType::Deleted {
            let issue_id = event
                .issue_id
                .as_deref()
                .or_else(|| event.issue.as_ref().map(|issue| issue.id.as_str()));
            if let Some(issue_id) = issue_id {
                self.resolve_deleted_issue(organization_id, issue_id).await?;
            }
            return Ok(());
        }

        match &event.issue {
            Some(issue) => {
                self.process_issue_event(
                    organization_id,
                    issue,
                    event.change_type,
                    event.changelog.as_ref(),
                )
                .await?;
            }
            None => debug!(event_id = %event.event_id, "Event carries no issue, nothing to do"),
        }
        Ok(())
    }

    /// Reload rule snapshots for one organization, or all known ones.
    pub async fn refresh_rules(&self, organization_id: Option<&str>) -> Result<usize> {
        match organization_id {
            Some(organization_id) => {
                self.rules.reload(organization_id).await?;
                Ok(1)
            }
            None => self.rules.reload_all().await,
        }
    }

    async fn resolve_deleted_issue(&self, organization_id: &str, issue_id: &str) -> Result<()> {
        let resolved = self
            .lifecycle
            .resolve_for_deleted_issue(organization_id, issue_id, Utc::now())
            .await?;
        if !resolved.is_empty() {
            info!(
                organization_id = %organization_id,
                issue_id = %issue_id,
                resolved = resolved.len(),
                "Alerts resolved for deleted issue"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::{sign, EventKind};
    use crate::models::{AlertStatus, AlertType, SprintState, StatusCategory};
    use crate::notify::{AlertFact, ChannelSink};
    use crate::store::{InMemoryAlertRepository, InMemoryRuleRepository};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    const SECRET: &str = "test-secret";

    struct Fixture {
        engine: DetectionEngine,
        rules: Arc<InMemoryRuleRepository>,
        alerts: Arc<InMemoryAlertRepository>,
        queue: Arc<InMemoryEventQueue>,
        facts: UnboundedReceiver<AlertFact>,
    }

    fn fixture() -> Fixture {
        let rules = Arc::new(InMemoryRuleRepository::new(vec![]));
        let alerts = Arc::new(InMemoryAlertRepository::new());
        let queue = Arc::new(InMemoryEventQueue::default());
        let (sink, facts) = ChannelSink::new();
        let engine = DetectionEngine::builder(rules.clone(), alerts.clone())
            .sink(Arc::new(sink))
            .queue(queue.clone())
            .secrets(WebhookSecrets::shared(SECRET))
            .build();
        Fixture {
            engine,
            rules,
            alerts,
            queue,
            facts,
        }
    }

    fn estimate_rule() -> AlertRule {
        let mut rule = AlertRule::new("rule-estimate", "org-1", AlertType::MissingEstimate);
        rule.thresholds.estimate_required_after_hours = Some(1.0);
        rule
    }

    fn unestimated_issue() -> Issue {
        let created = Utc::now() - ChronoDuration::hours(2);
        Issue {
            id: "10001".to_string(),
            key: "TEST-123".to_string(),
            project_key: "TEST".to_string(),
            issue_type: "Story".to_string(),
            status: "To Do".to_string(),
            status_category: StatusCategory::ToDo,
            summary: "Add checkout flow".to_string(),
            assignee_id: None,
            reporter_id: None,
            priority: None,
            labels: vec![],
            components: vec![],
            story_points: None,
            original_estimate_seconds: None,
            time_spent_seconds: None,
            remaining_estimate_seconds: None,
            created_at: created,
            updated_at: created,
            status_changed_at: None,
            resolved_at: None,
        }
    }

    fn headers(event: &str, body: &[u8], delivery: Option<&str>) -> WebhookHeaders {
        WebhookHeaders {
            delivery_id: delivery.map(str::to_string),
            event_type: Some(event.to_string()),
            signature: sign(body, SECRET),
        }
    }

    #[tokio::test]
    async fn test_missing_estimate_created_then_resolved() {
        let mut f = fixture();
        f.rules.upsert(estimate_rule()).await;
        let issue = unestimated_issue();

        let created = f
            .engine
            .process_issue_event("org-1", &issue, ChangeType::Updated, None)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Missing Estimate: TEST-123");

        let estimated = Issue {
            story_points: Some(5.0),
            ..issue
        };
        let created = f
            .engine
            .process_issue_event("org-1", &estimated, ChangeType::Updated, None)
            .await
            .unwrap();
        assert!(created.is_empty());

        let stored = f.alerts.list("org-1").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, AlertStatus::Resolved);
        assert!(matches!(f.facts.try_recv().unwrap(), AlertFact::Created(_)));
        assert!(matches!(f.facts.try_recv().unwrap(), AlertFact::Resolved(_)));
    }

    #[tokio::test]
    async fn test_repeated_events_create_one_alert() {
        let f = fixture();
        f.rules.upsert(estimate_rule()).await;
        let issue = unestimated_issue();

        let mut total = 0;
        for _ in 0..5 {
            total += f
                .engine
                .process_issue_event("org-1", &issue, ChangeType::Updated, None)
                .await
                .unwrap()
                .len();
        }
        assert_eq!(total, 1);
        assert_eq!(f.alerts.list("org-1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_issue_resolves_alerts() {
        let f = fixture();
        f.rules.upsert(estimate_rule()).await;
        let issue = unestimated_issue();
        f.engine
            .process_issue_event("org-1", &issue, ChangeType::Created, None)
            .await
            .unwrap();

        f.engine
            .process_issue_event("org-1", &issue, ChangeType::Deleted, None)
            .await
            .unwrap();

        let stored = f.alerts.list("org-1").await;
        assert_eq!(stored[0].status, AlertStatus::Resolved);
        assert_eq!(stored[0].resolution_reason.as_deref(), Some("issue deleted"));
    }

    #[tokio::test]
    async fn test_sprint_batch_only_runs_sprint_rules() {
        let f = fixture();
        f.rules.upsert(estimate_rule()).await;
        let mut sprint_rule = AlertRule::new("rule-time", "org-1", AlertType::RunningOutOfTime);
        sprint_rule.thresholds.sprint_time_remaining_days = Some(2.0);
        f.rules.upsert(sprint_rule).await;

        let sprint = Sprint {
            id: "sprint-1".to_string(),
            name: "Sprint 1".to_string(),
            state: SprintState::Active,
            start_date: Some(Utc::now() - ChronoDuration::days(13)),
            end_date: Some(Utc::now() + ChronoDuration::days(1)),
        };
        let first = unestimated_issue();
        let second = Issue {
            id: "10002".to_string(),
            key: "TEST-124".to_string(),
            ..unestimated_issue()
        };

        let created = f
            .engine
            .process_sprint_batch("org-1", &sprint, &[first, second])
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        assert!(created
            .iter()
            .all(|a| a.alert_type == AlertType::RunningOutOfTime));
    }

    #[tokio::test]
    async fn test_cancelled_batch_stops_before_first_issue() {
        let f = fixture();
        f.rules
            .upsert(AlertRule::new("rule-time", "org-1", AlertType::RunningOutOfTime))
            .await;
        let sprint = Sprint {
            id: "sprint-1".to_string(),
            name: "Sprint 1".to_string(),
            state: SprintState::Active,
            start_date: None,
            end_date: Some(Utc::now() + ChronoDuration::days(1)),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let created = f
            .engine
            .process_sprint_batch_cancellable("org-1", &sprint, &[unestimated_issue()], &cancel)
            .await
            .unwrap();
        assert!(created.is_empty());
        assert!(f.alerts.list("org-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_queues_then_reports_duplicate() {
        let f = fixture();
        let body = serde_json::to_vec(&json!({ "issue": unestimated_issue() })).unwrap();
        let headers = headers("issue_updated", &body, Some("delivery-1"));

        let first = f.engine.ingest_webhook("org-1", &headers, &body).await.unwrap();
        assert_eq!(first.status, ReceiptStatus::Queued);
        assert!(first.queued);
        assert_eq!(first.event_id, "delivery-1");

        let second = f.engine.ingest_webhook("org-1", &headers, &body).await.unwrap();
        assert_eq!(second.status, ReceiptStatus::Duplicate);
        assert!(!second.queued);
        assert_eq!(f.queue.depth().await.ready, 1);
    }

    #[tokio::test]
    async fn test_ingest_rejects_bad_signature_and_unknown_org_secret() {
        let f = fixture();
        let body = serde_json::to_vec(&json!({ "issue": unestimated_issue() })).unwrap();
        let mut bad = headers("issue_updated", &body, None);
        bad.signature = Some("00".repeat(32));

        let err = f.engine.ingest_webhook("org-1", &bad, &body).await.unwrap_err();
        assert!(matches!(err, IntakeError::Authentication(_)));

        let no_secret = DetectionEngine::builder(f.rules.clone(), f.alerts.clone()).build();
        let err = no_secret
            .ingest_webhook("org-1", &headers("issue_updated", &body, None), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Authentication(_)));
        assert_eq!(f.queue.depth().await.ready, 0);
    }

    #[tokio::test]
    async fn test_unrecognized_event_is_processed_without_queueing() {
        let f = fixture();
        let body = br#"{"project":{"id":"1"}}"#;
        let receipt = f
            .engine
            .ingest_webhook("org-1", &headers("project_created", body, None), body)
            .await
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Processed);
        assert!(!receipt.queued);
        assert_eq!(f.queue.depth().await.ready, 0);
    }

    #[tokio::test]
    async fn test_handle_event_for_id_only_delete() {
        let f = fixture();
        f.rules.upsert(estimate_rule()).await;
        f.engine
            .process_issue_event("org-1", &unestimated_issue(), ChangeType::Created, None)
            .await
            .unwrap();

        let event = WebhookEvent {
            event_id: "evt-delete".to_string(),
            organization_id: "org-1".to_string(),
            kind: EventKind::IssueDeleted,
            change_type: ChangeType::Deleted,
            issue: None,
            issue_id: Some("10001".to_string()),
            changelog: None,
            sprint: None,
            sprint_issues: vec![],
            payload: json!({}),
            received_at: Utc::now(),
            attempt: 1,
        };
        f.engine.handle_event(&event).await.unwrap();

        assert_eq!(f.alerts.list("org-1").await[0].status, AlertStatus::Resolved);
    }

    #[tokio::test]
    async fn test_refresh_rules_picks_up_new_rules() {
        let f = fixture();
        let issue = unestimated_issue();
        assert!(f
            .engine
            .process_issue_event("org-1", &issue, ChangeType::Updated, None)
            .await
            .unwrap()
            .is_empty());

        f.rules.upsert(estimate_rule()).await;
        assert_eq!(f.engine.refresh_rules(Some("org-1")).await.unwrap(), 1);

        let created = f
            .engine
            .process_issue_event("org-1", &issue, ChangeType::Updated, None)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
    }
}
