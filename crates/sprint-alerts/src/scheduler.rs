//! Recurring background jobs: the sprint scan and rule snapshot refresh.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::DetectionEngine;
use crate::lookups::SprintSource;

/// Outcome of one sprint scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Sprints evaluated
    pub sprints: usize,
    /// Alerts created
    pub created: usize,
    /// Organizations or sprints that failed
    pub failures: usize,
}

/// Evaluate sprint-scoped rules for every active sprint of every known organization.
pub async fn scan_sprints(
    engine: &DetectionEngine,
    source: &dyn SprintSource,
    cancel: &CancellationToken,
) -> ScanSummary {
    let mut summary = ScanSummary::default();

    for organization_id in engine.rules().organizations().await {
        if cancel.is_cancelled() {
            break;
        }
        let work = match source.active_sprints(&organization_id).await {
            Ok(work) => work,
            Err(e) => {
                summary.failures += 1;
                warn!(organization_id = %organization_id, error = %e, "Failed to list active sprints");
                continue;
            }
        };

        for item in work {
            if cancel.is_cancelled() {
                break;
            }
            match engine
                .process_sprint_batch_cancellable(&organization_id, &item.sprint, &item.issues, cancel)
                .await
            {
                Ok(created) => {
                    summary.sprints += 1;
                    summary.created += created.len();
                }
                Err(e) => {
                    summary.failures += 1;
                    warn!(
                        organization_id = %organization_id,
                        sprint_id = %item.sprint.id,
                        error = %e,
                        "Sprint scan failed"
                    );
                }
            }
        }
    }

    summary
}

/// Run [`scan_sprints`] every `interval` until cancelled.
pub async fn run_sprint_scan(
    engine: Arc<DetectionEngine>,
    source: Arc<dyn SprintSource>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "Sprint scan scheduled");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let summary = scan_sprints(&engine, source.as_ref(), &cancel).await;
        info!(
            sprints = summary.sprints,
            created = summary.created,
            failures = summary.failures,
            "Sprint scan complete"
        );
    }
    debug!("Sprint scan stopped");
}

/// Reload every rule snapshot every `interval` until cancelled.
pub async fn run_rule_refresh(
    engine: Arc<DetectionEngine>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately and snapshots load lazily anyway.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match engine.refresh_rules(None).await {
            Ok(count) => debug!(organizations = count, "Rule snapshots refreshed"),
            Err(e) => warn!(error = %e, "Rule refresh failed, keeping previous snapshots"),
        }
    }
    debug!("Rule refresh stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookups::{SprintWork, StaticLookups};
    use crate::models::{AlertRule, AlertType, Issue, Sprint, SprintState, StatusCategory};
    use crate::store::{InMemoryAlertRepository, InMemoryRuleRepository};
    use chrono::{Duration as ChronoDuration, Utc};

    fn issue(id: &str, key: &str) -> Issue {
        let now = Utc::now();
        Issue {
            id: id.to_string(),
            key: key.to_string(),
            project_key: "TEST".to_string(),
            issue_type: "Task".to_string(),
            status: "In Progress".to_string(),
            status_category: StatusCategory::InProgress,
            summary: String::new(),
            assignee_id: None,
            reporter_id: None,
            priority: None,
            labels: vec![],
            components: vec![],
            story_points: Some(3.0),
            original_estimate_seconds: None,
            time_spent_seconds: None,
            remaining_estimate_seconds: None,
            created_at: now,
            updated_at: now,
            status_changed_at: None,
            resolved_at: None,
        }
    }

    async fn setup() -> (Arc<DetectionEngine>, Arc<InMemoryAlertRepository>, Arc<StaticLookups>) {
        let rules = Arc::new(InMemoryRuleRepository::new(vec![AlertRule::new(
            "rule-time",
            "org-1",
            AlertType::RunningOutOfTime,
        )]));
        let alerts = Arc::new(InMemoryAlertRepository::new());
        let engine = Arc::new(DetectionEngine::builder(rules, alerts.clone()).build());
        // Make org-1 known to the cache.
        engine.rules().snapshot("org-1").await.unwrap();

        let source = Arc::new(StaticLookups::new());
        source
            .set_sprints(
                "org-1",
                vec![SprintWork {
                    sprint: Sprint {
                        id: "sprint-1".to_string(),
                        name: "Sprint 1".to_string(),
                        state: SprintState::Active,
                        start_date: None,
                        end_date: Some(Utc::now() + ChronoDuration::hours(12)),
                    },
                    issues: vec![issue("1", "TEST-1"), issue("2", "TEST-2")],
                }],
            )
            .await;
        (engine, alerts, source)
    }

    #[tokio::test]
    async fn test_scan_creates_alerts_for_active_sprints() {
        let (engine, alerts, source) = setup().await;

        let summary = scan_sprints(&engine, source.as_ref(), &CancellationToken::new()).await;
        assert_eq!(
            summary,
            ScanSummary {
                sprints: 1,
                created: 2,
                failures: 0
            }
        );

        // A second scan refreshes instead of duplicating.
        let again = scan_sprints(&engine, source.as_ref(), &CancellationToken::new()).await;
        assert_eq!(again.created, 0);
        assert_eq!(alerts.list("org-1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_scan_does_nothing() {
        let (engine, alerts, source) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = scan_sprints(&engine, source.as_ref(), &cancel).await;
        assert_eq!(summary, ScanSummary::default());
        assert!(alerts.list("org-1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_loop_stops_on_cancel() {
        let (engine, alerts, source) = setup().await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sprint_scan(
            engine,
            source,
            Duration::from_secs(60),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(alerts.list("org-1").await.len(), 2);
    }
}
