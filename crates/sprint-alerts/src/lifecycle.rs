//! Alert lifecycle: create, refresh, re-open and resolve.
//!
//! ```text
//! active ──► acknowledged ──► resolved
//!   │  ▲          │
//!   │  └──────────┘ (condition returns after clearing, or manual reopen)
//!   ├──► suppressed ──► active (suppression lifted)
//!   └──► resolved
//! ```
//!
//! One evaluation of a (rule, issue) pair yields an [`Evaluation`]: either an
//! [`Outcome`] that describes what changed, or a [`Skip`] that explains why the
//! rule did not run. Only infrastructure failures come back as `Err`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::detectors::{DetectionContext, Detector, DetectorRegistry};
use crate::error::{EngineError, Result};
use crate::matcher;
use crate::models::{
    AlertMetadata, AlertRule, AlertStatus, AlertType, Changelog, DetectedAlert, Issue,
    NaturalKey, Sprint,
};
use crate::notify::NotificationSink;
use crate::store::{AlertRepository, CreateOutcome, StatusChange};

/// Resolution reason when the detector reports the condition gone.
pub const REASON_CONDITION_RESOLVED: &str = "condition resolved";

/// Resolution reason when the issue was deleted.
pub const REASON_ISSUE_DELETED: &str = "issue deleted";

/// Why a rule was not evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Rule is switched off
    Disabled,
    /// Rule conditions or filters exclude the issue
    NotApplicable,
    /// No detector is registered for the rule's alert type
    NoDetector(AlertType),
}

/// What one evaluation changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A new alert was stored
    Created(DetectedAlert),
    /// The open alert's metadata was overwritten
    Refreshed(DetectedAlert),
    /// An acknowledged alert went back to active
    Reopened(DetectedAlert),
    /// The open alert was resolved
    Resolved(DetectedAlert),
    /// Nothing to do
    Unchanged,
}

impl Outcome {
    /// The alert created by this evaluation, if any.
    #[must_use]
    pub fn created(self) -> Option<DetectedAlert> {
        match self {
            Self::Created(alert) => Some(alert),
            _ => None,
        }
    }
}

/// Result of evaluating one rule against one issue.
pub type Evaluation = std::result::Result<Outcome, Skip>;

/// Applies detector verdicts to stored alerts.
pub struct AlertLifecycleManager {
    store: Arc<dyn AlertRepository>,
    registry: DetectorRegistry,
    sink: Arc<dyn NotificationSink>,
}

impl AlertLifecycleManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        store: Arc<dyn AlertRepository>,
        registry: DetectorRegistry,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            registry,
            sink,
        }
    }

    /// Detector registry in use.
    #[must_use]
    pub const fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Evaluate a rule against an issue change.
    pub async fn evaluate(
        &self,
        rule: &AlertRule,
        issue: &Issue,
        changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<Evaluation> {
        let detector = match self.gate(rule, issue) {
            Ok(detector) => detector,
            Err(skip) => return Ok(Err(skip)),
        };

        if detector.should_trigger(issue, rule, changelog, ctx).await? {
            let metadata = detector
                .generate_metadata(issue, rule, None, changelog, ctx)
                .await?;
            return self
                .on_trigger(detector.as_ref(), rule, issue, metadata, ctx.now)
                .await
                .map(Ok);
        }

        let Some(open) = self.resolvable(rule, issue).await? else {
            return Ok(Ok(Outcome::Unchanged));
        };
        let resolve = detector.should_resolve(issue, rule, ctx).await?;
        if !resolve && detector.sprint_scoped() {
            // Only the sprint scan decides whether a sprint condition cleared.
            return Ok(Ok(Outcome::Unchanged));
        }
        self.settle(open, resolve, ctx.now).await.map(Ok)
    }

    /// Evaluate a sprint-scoped rule against one issue of a sprint.
    pub async fn evaluate_sprint(
        &self,
        rule: &AlertRule,
        issue: &Issue,
        sprint: &Sprint,
        ctx: &DetectionContext,
    ) -> Result<Evaluation> {
        let detector = match self.gate(rule, issue) {
            Ok(detector) => detector,
            Err(skip) => return Ok(Err(skip)),
        };
        if !detector.sprint_scoped() {
            return Ok(Err(Skip::NotApplicable));
        }

        if detector.should_trigger_sprint(issue, sprint, rule, ctx).await? {
            let metadata = detector
                .generate_metadata(issue, rule, Some(sprint), None, ctx)
                .await?;
            return self
                .on_trigger(detector.as_ref(), rule, issue, metadata, ctx.now)
                .await
                .map(Ok);
        }

        let Some(open) = self.resolvable(rule, issue).await? else {
            return Ok(Ok(Outcome::Unchanged));
        };
        let resolve = detector
            .should_resolve_sprint(issue, sprint, rule, ctx)
            .await?;
        if !resolve && detector.should_trigger(issue, rule, None, ctx).await? {
            // Shared natural key: the issue-path condition still holds.
            return Ok(Ok(Outcome::Unchanged));
        }
        self.settle(open, resolve, ctx.now).await.map(Ok)
    }

    /// Resolve every open alert for a deleted issue.
    ///
    /// Suppressed alerts are left alone.
    pub async fn resolve_for_deleted_issue(
        &self,
        organization_id: &str,
        issue_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DetectedAlert>> {
        let mut resolved = Vec::new();
        for alert in self
            .store
            .find_open_for_issue(organization_id, issue_id)
            .await?
        {
            if let Some(alert) = self
                .store
                .mark_resolved(&alert.id, REASON_ISSUE_DELETED, now)
                .await?
            {
                self.announce_resolved(&alert);
                resolved.push(alert);
            }
        }
        Ok(resolved)
    }

    /// Acknowledge an active alert.
    pub async fn acknowledge(&self, id: &str, actor: &str) -> Result<DetectedAlert> {
        let change = StatusChange {
            actor: Some(actor.to_string()),
            ..StatusChange::to(AlertStatus::Acknowledged)
        };
        let alert = self
            .store
            .transition(id, AlertStatus::Active, change, Utc::now())
            .await?;
        info!(alert_id = %id, actor = %actor, "Alert acknowledged");
        Ok(alert)
    }

    /// Suppress an active alert until `until`.
    pub async fn suppress(&self, id: &str, until: DateTime<Utc>) -> Result<DetectedAlert> {
        let change = StatusChange {
            suppressed_until: Some(until),
            ..StatusChange::to(AlertStatus::Suppressed)
        };
        let alert = self
            .store
            .transition(id, AlertStatus::Active, change, Utc::now())
            .await?;
        info!(alert_id = %id, until = %until, "Alert suppressed");
        Ok(alert)
    }

    /// Return a suppressed alert to active.
    pub async fn lift_suppression(&self, id: &str) -> Result<DetectedAlert> {
        let alert = self
            .store
            .transition(
                id,
                AlertStatus::Suppressed,
                StatusChange::to(AlertStatus::Active),
                Utc::now(),
            )
            .await?;
        info!(alert_id = %id, "Alert suppression lifted");
        Ok(alert)
    }

    /// Return an acknowledged alert to active.
    pub async fn reopen(&self, id: &str) -> Result<DetectedAlert> {
        let alert = self
            .store
            .transition(
                id,
                AlertStatus::Acknowledged,
                StatusChange::to(AlertStatus::Active),
                Utc::now(),
            )
            .await?;
        self.announce_reopened(&alert);
        Ok(alert)
    }

    /// Resolve an active or acknowledged alert by hand.
    pub async fn resolve(&self, id: &str, reason: &str) -> Result<DetectedAlert> {
        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::AlertNotFound(id.to_string()))?;
        let change = StatusChange {
            reason: Some(reason.to_string()),
            ..StatusChange::to(AlertStatus::Resolved)
        };
        let alert = self
            .store
            .transition(id, current.status, change, Utc::now())
            .await?;
        self.announce_resolved(&alert);
        Ok(alert)
    }

    fn gate(&self, rule: &AlertRule, issue: &Issue) -> std::result::Result<Arc<dyn Detector>, Skip> {
        if !rule.is_enabled {
            debug!(rule_id = %rule.id, issue_key = %issue.key, "Rule disabled, skipping");
            return Err(Skip::Disabled);
        }
        if !matcher::applies(rule, issue) {
            debug!(rule_id = %rule.id, issue_key = %issue.key, "Rule not applicable, skipping");
            return Err(Skip::NotApplicable);
        }
        self.registry.get(rule.alert_type).ok_or_else(|| {
            warn!(
                rule_id = %rule.id,
                alert_type = %rule.alert_type,
                "No detector registered for alert type"
            );
            Skip::NoDetector(rule.alert_type)
        })
    }

    /// The open alert a non-trigger may act on. Suppressed alerts are left alone.
    async fn resolvable(&self, rule: &AlertRule, issue: &Issue) -> Result<Option<DetectedAlert>> {
        Ok(self
            .store
            .find_active(&NaturalKey::new(rule, issue))
            .await?
            .filter(|a| matches!(a.status, AlertStatus::Active | AlertStatus::Acknowledged)))
    }

    async fn on_trigger(
        &self,
        detector: &dyn Detector,
        rule: &AlertRule,
        issue: &Issue,
        metadata: AlertMetadata,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        if let Some(existing) = self.store.find_active(&NaturalKey::new(rule, issue)).await? {
            return self.refresh(existing, metadata, now).await;
        }

        let alert = DetectedAlert::new(
            rule,
            issue,
            detector.generate_title(issue),
            detector.generate_description(issue, &metadata),
            metadata.clone(),
            now,
        );
        match self.store.create(alert).await? {
            CreateOutcome::Created(alert) => {
                info!(
                    alert_id = %alert.id,
                    organization_id = %alert.organization_id,
                    rule_id = %alert.rule_id,
                    issue_key = %alert.issue_key,
                    "Alert created"
                );
                self.sink.alert_created(&alert);
                Ok(Outcome::Created(alert))
            }
            CreateOutcome::Existing(existing) => {
                debug!(
                    alert_id = %existing.id,
                    issue_key = %existing.issue_key,
                    "Concurrent create lost, refreshing existing alert"
                );
                self.refresh(existing, metadata, now).await
            }
        }
    }

    async fn refresh(
        &self,
        existing: DetectedAlert,
        metadata: AlertMetadata,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let reopen = existing.status == AlertStatus::Acknowledged
            && existing.condition_cleared_at.is_some();
        if reopen {
            match self
                .store
                .transition(
                    &existing.id,
                    AlertStatus::Acknowledged,
                    StatusChange::to(AlertStatus::Active),
                    now,
                )
                .await
            {
                Ok(_) | Err(EngineError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let Some(alert) = self
            .store
            .refresh_metadata(&existing.id, metadata, now)
            .await?
        else {
            return Ok(Outcome::Unchanged);
        };

        if reopen && alert.status == AlertStatus::Active {
            self.announce_reopened(&alert);
            return Ok(Outcome::Reopened(alert));
        }
        debug!(alert_id = %alert.id, status = %alert.status, "Alert metadata refreshed");
        Ok(Outcome::Refreshed(alert))
    }

    async fn settle(
        &self,
        open: DetectedAlert,
        resolve: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        if !resolve {
            self.store.mark_condition_cleared(&open.id, now).await?;
            return Ok(Outcome::Unchanged);
        }
        match self
            .store
            .mark_resolved(&open.id, REASON_CONDITION_RESOLVED, now)
            .await?
        {
            Some(alert) => {
                self.announce_resolved(&alert);
                Ok(Outcome::Resolved(alert))
            }
            None => Ok(Outcome::Unchanged),
        }
    }

    fn announce_resolved(&self, alert: &DetectedAlert) {
        info!(
            alert_id = %alert.id,
            organization_id = %alert.organization_id,
            rule_id = %alert.rule_id,
            issue_key = %alert.issue_key,
            reason = alert.resolution_reason.as_deref().unwrap_or_default(),
            "Alert resolved"
        );
        self.sink.alert_resolved(alert);
    }

    fn announce_reopened(&self, alert: &DetectedAlert) {
        info!(
            alert_id = %alert.id,
            organization_id = %alert.organization_id,
            rule_id = %alert.rule_id,
            issue_key = %alert.issue_key,
            "Alert reopened"
        );
        self.sink.alert_reopened(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::{ctx, done, issue, now, rule, sprint};
    use crate::notify::{AlertFact, ChannelSink};
    use crate::store::InMemoryAlertRepository;
    use chrono::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        store: Arc<InMemoryAlertRepository>,
        manager: Arc<AlertLifecycleManager>,
        facts: UnboundedReceiver<AlertFact>,
    }

    fn harness(registry: DetectorRegistry) -> Harness {
        let store = Arc::new(InMemoryAlertRepository::new());
        let (sink, facts) = ChannelSink::new();
        let manager = Arc::new(AlertLifecycleManager::new(
            store.clone(),
            registry,
            Arc::new(sink),
        ));
        Harness {
            store,
            manager,
            facts,
        }
    }

    fn estimate_rule() -> AlertRule {
        let mut r = rule(AlertType::MissingEstimate);
        r.thresholds.estimate_required_after_hours = Some(1.0);
        r
    }

    fn stale_issue() -> Issue {
        Issue {
            created_at: now() - Duration::hours(2),
            ..issue()
        }
    }

    fn estimated_issue() -> Issue {
        Issue {
            story_points: Some(3.0),
            ..stale_issue()
        }
    }

    #[tokio::test]
    async fn test_trigger_creates_then_refreshes() {
        let mut h = harness(DetectorRegistry::with_defaults());
        let r = estimate_rule();

        let first = h
            .manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap();
        let created = first.created().unwrap();
        assert_eq!(created.title, "Missing Estimate: TEST-123");
        assert_eq!(created.status, AlertStatus::Active);

        let second = h
            .manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap();
        match second {
            Outcome::Refreshed(alert) => assert_eq!(alert.id, created.id),
            other => panic!("expected refresh, got {other:?}"),
        }

        assert_eq!(h.store.list("org-1").await.len(), 1);
        assert!(matches!(h.facts.try_recv().unwrap(), AlertFact::Created(_)));
        assert!(h.facts.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_create_one_alert() {
        let mut h = harness(DetectorRegistry::with_defaults());
        let r = estimate_rule();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&h.manager);
                let r = r.clone();
                tokio::spawn(async move {
                    manager
                        .evaluate(&r, &stale_issue(), None, &ctx())
                        .await
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Outcome::Created(_)) {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        let alerts = h.store.list("org-1").await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Active);
        assert!(matches!(h.facts.try_recv().unwrap(), AlertFact::Created(_)));
        assert!(h.facts.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let mut h = harness(DetectorRegistry::with_defaults());
        let r = estimate_rule();
        h.manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap();

        let resolved = h
            .manager
            .evaluate(&r, &estimated_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(resolved, Outcome::Resolved(_)));

        let again = h
            .manager
            .evaluate(&r, &estimated_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again, Outcome::Unchanged);

        let facts: Vec<_> = std::iter::from_fn(|| h.facts.try_recv().ok()).collect();
        assert_eq!(facts.len(), 2);
        assert!(matches!(facts[1], AlertFact::Resolved(_)));
    }

    #[tokio::test]
    async fn test_new_alert_after_resolution_gets_new_id() {
        let h = harness(DetectorRegistry::with_defaults());
        let r = estimate_rule();
        let first = h
            .manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap()
            .created()
            .unwrap();
        h.manager
            .evaluate(&r, &estimated_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap();

        let second = h
            .manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap()
            .created()
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_skips() {
        let h = harness(DetectorRegistry::empty());
        let mut r = estimate_rule();

        let skip = h
            .manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap();
        assert_eq!(skip, Err(Skip::NoDetector(AlertType::MissingEstimate)));

        r.conditions.project_keys = vec!["OTHER".to_string()];
        let skip = h
            .manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap();
        assert_eq!(skip, Err(Skip::NotApplicable));

        r.is_enabled = false;
        let skip = h
            .manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap();
        assert_eq!(skip, Err(Skip::Disabled));
        assert!(h.store.list("org-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledged_alert_reopens_after_condition_cleared() {
        let mut h = harness(DetectorRegistry::with_defaults());
        let r = rule(AlertType::RunningOutOfTime);
        let s = sprint(now() + Duration::days(1));
        let i = issue();

        let created = h
            .manager
            .evaluate_sprint(&r, &i, &s, &ctx())
            .await
            .unwrap()
            .unwrap()
            .created()
            .unwrap();
        h.manager.acknowledge(&created.id, "pm").await.unwrap();

        // Still failing: acknowledged alert only refreshes.
        let refreshed = h
            .manager
            .evaluate_sprint(&r, &i, &s, &ctx())
            .await
            .unwrap()
            .unwrap();
        match refreshed {
            Outcome::Refreshed(alert) => assert_eq!(alert.status, AlertStatus::Acknowledged),
            other => panic!("expected refresh, got {other:?}"),
        }

        // Condition clears without resolving, then returns.
        let far = sprint(now() + Duration::days(6));
        let cleared = h
            .manager
            .evaluate_sprint(&r, &i, &far, &ctx())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleared, Outcome::Unchanged);

        let reopened = h
            .manager
            .evaluate_sprint(&r, &i, &s, &ctx())
            .await
            .unwrap()
            .unwrap();
        match reopened {
            Outcome::Reopened(alert) => {
                assert_eq!(alert.id, created.id);
                assert_eq!(alert.status, AlertStatus::Active);
                assert!(alert.condition_cleared_at.is_none());
            }
            other => panic!("expected reopen, got {other:?}"),
        }

        let facts: Vec<_> = std::iter::from_fn(|| h.facts.try_recv().ok()).collect();
        assert!(matches!(facts.last(), Some(AlertFact::Reopened(_))));
    }

    #[tokio::test]
    async fn test_late_sprint_scan_keeps_issue_path_early_completion_open() {
        let mut h = harness(DetectorRegistry::with_defaults());
        let r = rule(AlertType::EarlyCompletion);
        let quick = Issue {
            original_estimate_seconds: Some(8 * 3600),
            time_spent_seconds: Some(3600),
            ..done()
        };

        let created = h
            .manager
            .evaluate(&r, &quick, None, &ctx())
            .await
            .unwrap()
            .unwrap()
            .created()
            .unwrap();
        h.manager.acknowledge(&created.id, "pm").await.unwrap();

        // Too close to the sprint end for the sprint trigger.
        let ending = sprint(now() + Duration::days(1));
        let scanned = h
            .manager
            .evaluate_sprint(&r, &quick, &ending, &ctx())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scanned, Outcome::Unchanged);
        let stored = h.store.list("org-1").await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].condition_cleared_at.is_none());

        let again = h
            .manager
            .evaluate(&r, &quick, None, &ctx())
            .await
            .unwrap()
            .unwrap();
        match again {
            Outcome::Refreshed(alert) => {
                assert_eq!(alert.id, created.id);
                assert_eq!(alert.status, AlertStatus::Acknowledged);
            }
            other => panic!("expected refresh, got {other:?}"),
        }

        let facts: Vec<_> = std::iter::from_fn(|| h.facts.try_recv().ok()).collect();
        assert!(!facts.iter().any(|f| matches!(f, AlertFact::Reopened(_))));
    }

    #[tokio::test]
    async fn test_suppressed_alert_is_never_resolved_by_detector() {
        let h = harness(DetectorRegistry::with_defaults());
        let r = estimate_rule();
        let created = h
            .manager
            .evaluate(&r, &stale_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap()
            .created()
            .unwrap();
        h.manager
            .suppress(&created.id, now() + Duration::days(1))
            .await
            .unwrap();

        let outcome = h
            .manager
            .evaluate(&r, &estimated_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
        let stored = h.store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Suppressed);

        let lifted = h.manager.lift_suppression(&created.id).await.unwrap();
        assert_eq!(lifted.status, AlertStatus::Active);
        assert!(lifted.suppressed_until.is_none());
    }

    #[tokio::test]
    async fn test_manual_transitions_are_checked() {
        let h = harness(DetectorRegistry::with_defaults());
        let created = h
            .manager
            .evaluate(&estimate_rule(), &stale_issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap()
            .created()
            .unwrap();

        let err = h.manager.reopen(&created.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        h.manager.acknowledge(&created.id, "pm").await.unwrap();
        let reopened = h.manager.reopen(&created.id).await.unwrap();
        assert_eq!(reopened.status, AlertStatus::Active);

        let resolved = h.manager.resolve(&created.id, "won't fix").await.unwrap();
        assert_eq!(resolved.resolution_reason.as_deref(), Some("won't fix"));

        let err = h.manager.resolve(&created.id, "again").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        let err = h.manager.acknowledge("missing", "pm").await.unwrap_err();
        assert!(matches!(err, EngineError::AlertNotFound(_)));
    }

    #[tokio::test]
    async fn test_deleted_issue_resolves_open_alerts() {
        let mut h = harness(DetectorRegistry::with_defaults());
        let mut time_rule = rule(AlertType::MissingTimeTracking);
        time_rule.id = "rule-2".to_string();
        let i = Issue {
            created_at: now() - Duration::hours(2),
            ..crate::detectors::test_support::in_progress(now() - Duration::days(3))
        };

        h.manager.evaluate(&estimate_rule(), &i, None, &ctx()).await.unwrap().unwrap();
        h.manager.evaluate(&time_rule, &i, None, &ctx()).await.unwrap().unwrap();
        assert_eq!(h.store.list("org-1").await.len(), 2);

        let resolved = h
            .manager
            .resolve_for_deleted_issue("org-1", &i.id, now())
            .await
            .unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved
            .iter()
            .all(|a| a.resolution_reason.as_deref() == Some(REASON_ISSUE_DELETED)));

        let again = h
            .manager
            .resolve_for_deleted_issue("org-1", &i.id, now())
            .await
            .unwrap();
        assert!(again.is_empty());

        let resolved_facts = std::iter::from_fn(|| h.facts.try_recv().ok())
            .filter(|f| matches!(f, AlertFact::Resolved(_)))
            .count();
        assert_eq!(resolved_facts, 2);
    }

    #[tokio::test]
    async fn test_done_issue_resolves_sprint_alert_on_issue_path() {
        let h = harness(DetectorRegistry::with_defaults());
        let r = rule(AlertType::RunningOutOfTime);
        let s = sprint(now() + Duration::days(1));
        h.manager
            .evaluate_sprint(&r, &issue(), &s, &ctx())
            .await
            .unwrap()
            .unwrap();

        let unchanged = h
            .manager
            .evaluate(&r, &issue(), None, &ctx())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged, Outcome::Unchanged);

        let resolved = h
            .manager
            .evaluate(&r, &done(), None, &ctx())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(resolved, Outcome::Resolved(_)));
    }
}
