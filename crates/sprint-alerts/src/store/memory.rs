//! In-memory repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use super::{AlertRepository, CreateOutcome, RuleRepository, StatusChange};
use crate::error::{EngineError, Result};
use crate::models::{AlertMetadata, AlertRule, AlertStatus, DetectedAlert, NaturalKey};

/// Rules held in memory, optionally loaded from JSON.
#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<Vec<AlertRule>>,
}

impl InMemoryRuleRepository {
    /// Create a repository holding `rules`.
    #[must_use]
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Parse a JSON array of rules.
    pub fn from_json(json: &str) -> Result<Self> {
        let rules: Vec<AlertRule> = serde_json::from_str(json)?;
        Ok(Self::new(rules))
    }

    /// Insert a rule or replace the one with the same ID.
    pub async fn upsert(&self, rule: AlertRule) {
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }

    /// Remove a rule by ID.
    pub async fn remove(&self, id: &str) -> bool {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() != before
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn list_enabled_rules(&self, organization_id: Option<&str>) -> Result<Vec<AlertRule>> {
        Ok(self
            .rules
            .read()
            .await
            .iter()
            .filter(|r| r.is_enabled)
            .filter(|r| organization_id.map_or(true, |org| r.organization_id == org))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct AlertState {
    alerts: HashMap<String, DetectedAlert>,
    open: HashMap<NaturalKey, String>,
}

/// Alerts held in memory.
///
/// Every operation runs under one lock, so the open-slot check and the insert in
/// [`AlertRepository::create`] cannot interleave.
#[derive(Default)]
pub struct InMemoryAlertRepository {
    state: Mutex<AlertState>,
}

impl InMemoryAlertRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored alerts for an organization, oldest first.
    pub async fn list(&self, organization_id: &str) -> Vec<DetectedAlert> {
        let state = self.state.lock().await;
        let mut alerts: Vec<_> = state
            .alerts
            .values()
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn find_active(&self, key: &NaturalKey) -> Result<Option<DetectedAlert>> {
        let state = self.state.lock().await;
        Ok(state
            .open
            .get(key)
            .and_then(|id| state.alerts.get(id))
            .cloned())
    }

    async fn find_open_for_issue(
        &self,
        organization_id: &str,
        issue_id: &str,
    ) -> Result<Vec<DetectedAlert>> {
        let state = self.state.lock().await;
        Ok(state
            .open
            .iter()
            .filter(|(key, _)| key.organization_id == organization_id && key.issue_id == issue_id)
            .filter_map(|(_, id)| state.alerts.get(id))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<DetectedAlert>> {
        Ok(self.state.lock().await.alerts.get(id).cloned())
    }

    async fn create(&self, alert: DetectedAlert) -> Result<CreateOutcome> {
        let mut state = self.state.lock().await;
        let key = alert.natural_key();
        if let Some(existing) = state.open.get(&key).and_then(|id| state.alerts.get(id)) {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }
        if state.alerts.contains_key(&alert.id) {
            return Err(EngineError::Persistence(format!(
                "duplicate alert id {}",
                alert.id
            )));
        }
        state.open.insert(key, alert.id.clone());
        state.alerts.insert(alert.id.clone(), alert.clone());
        Ok(CreateOutcome::Created(alert))
    }

    async fn refresh_metadata(
        &self,
        id: &str,
        metadata: AlertMetadata,
        at: DateTime<Utc>,
    ) -> Result<Option<DetectedAlert>> {
        let mut state = self.state.lock().await;
        let Some(alert) = state.alerts.get_mut(id).filter(|a| a.status.is_open()) else {
            return Ok(None);
        };
        alert.metadata = metadata;
        alert.condition_cleared_at = None;
        alert.updated_at = at;
        Ok(Some(alert.clone()))
    }

    async fn mark_condition_cleared(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(alert) = state.alerts.get_mut(id).filter(|a| a.status.is_open()) {
            if alert.condition_cleared_at.is_none() {
                alert.condition_cleared_at = Some(at);
                alert.updated_at = at;
            }
        }
        Ok(())
    }

    async fn mark_resolved(
        &self,
        id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DetectedAlert>> {
        let mut state = self.state.lock().await;
        let Some(alert) = state.alerts.get_mut(id) else {
            return Ok(None);
        };
        if !matches!(alert.status, AlertStatus::Active | AlertStatus::Acknowledged) {
            return Ok(None);
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(at);
        alert.resolution_reason = Some(reason.to_string());
        alert.updated_at = at;
        let resolved = alert.clone();
        state.open.remove(&resolved.natural_key());
        Ok(Some(resolved))
    }

    async fn transition(
        &self,
        id: &str,
        from: AlertStatus,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> Result<DetectedAlert> {
        let mut state = self.state.lock().await;
        let alert = state
            .alerts
            .get_mut(id)
            .ok_or_else(|| EngineError::AlertNotFound(id.to_string()))?;
        if alert.status != from || !from.can_transition_to(change.to) {
            return Err(EngineError::InvalidTransition {
                id: id.to_string(),
                from: alert.status,
                to: change.to,
            });
        }

        alert.status = change.to;
        alert.updated_at = at;
        match change.to {
            AlertStatus::Acknowledged => alert.acknowledged_by = change.actor,
            AlertStatus::Suppressed => alert.suppressed_until = change.suppressed_until,
            AlertStatus::Active => {
                alert.suppressed_until = None;
                alert.condition_cleared_at = None;
            }
            AlertStatus::Resolved => {
                alert.resolved_at = Some(at);
                alert.resolution_reason = change.reason;
            }
        }

        let updated = alert.clone();
        if updated.status == AlertStatus::Resolved {
            state.open.remove(&updated.natural_key());
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::issue;
    use crate::models::AlertType;

    fn alert() -> DetectedAlert {
        let rule = AlertRule::new("rule-1", "org-1", AlertType::MissingEstimate);
        let issue = issue();
        let metadata = AlertMetadata::new(&issue, Utc::now());
        DetectedAlert::new(
            &rule,
            &issue,
            "t".to_string(),
            "d".to_string(),
            metadata,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_create_is_conditional_on_natural_key() {
        let repo = InMemoryAlertRepository::new();
        let first = alert();
        let second = alert();

        assert!(matches!(
            repo.create(first.clone()).await.unwrap(),
            CreateOutcome::Created(_)
        ));
        match repo.create(second).await.unwrap() {
            CreateOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
            CreateOutcome::Created(_) => panic!("second create must not store"),
        }
        assert_eq!(repo.list("org-1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_frees_slot_once() {
        let repo = InMemoryAlertRepository::new();
        let first = alert();
        repo.create(first.clone()).await.unwrap();

        let now = Utc::now();
        assert!(repo.mark_resolved(&first.id, "fixed", now).await.unwrap().is_some());
        assert!(repo.mark_resolved(&first.id, "fixed", now).await.unwrap().is_none());
        assert!(repo.find_active(&first.natural_key()).await.unwrap().is_none());

        let next = alert();
        assert!(matches!(
            repo.create(next).await.unwrap(),
            CreateOutcome::Created(_)
        ));
        assert_eq!(repo.list("org-1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let repo = InMemoryAlertRepository::new();
        let a = alert();
        repo.create(a.clone()).await.unwrap();

        let change = StatusChange {
            actor: Some("pm".to_string()),
            ..StatusChange::to(AlertStatus::Acknowledged)
        };
        let acked = repo
            .transition(&a.id, AlertStatus::Active, change.clone(), Utc::now())
            .await
            .unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("pm"));

        let err = repo
            .transition(&a.id, AlertStatus::Active, change, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        let err = repo
            .transition("missing", AlertStatus::Active, StatusChange::to(AlertStatus::Resolved), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlertNotFound(_)));
    }

    #[tokio::test]
    async fn test_suppressed_is_not_resolved() {
        let repo = InMemoryAlertRepository::new();
        let a = alert();
        repo.create(a.clone()).await.unwrap();
        repo.transition(
            &a.id,
            AlertStatus::Active,
            StatusChange::to(AlertStatus::Suppressed),
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(repo.mark_resolved(&a.id, "fixed", Utc::now()).await.unwrap().is_none());
        assert_eq!(
            repo.get(&a.id).await.unwrap().unwrap().status,
            AlertStatus::Suppressed
        );
    }

    #[tokio::test]
    async fn test_rules_filtered_by_org_and_enabled() {
        let mut disabled = AlertRule::new("rule-2", "org-1", AlertType::MissingCode);
        disabled.is_enabled = false;
        let repo = InMemoryRuleRepository::new(vec![
            AlertRule::new("rule-1", "org-1", AlertType::MissingEstimate),
            disabled,
            AlertRule::new("rule-3", "org-2", AlertType::MissingPr),
        ]);

        assert_eq!(repo.list_enabled_rules(Some("org-1")).await.unwrap().len(), 1);
        assert_eq!(repo.list_enabled_rules(None).await.unwrap().len(), 2);

        assert!(repo.remove("rule-3").await);
        assert!(repo.list_enabled_rules(Some("org-2")).await.unwrap().is_empty());
    }
}
