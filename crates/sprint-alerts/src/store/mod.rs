//! Persistence contracts for rules and alerts.
//!
//! The engine only talks to storage through [`RuleRepository`] and
//! [`AlertRepository`]. Natural-key uniqueness and single resolution are the
//! store's job: [`AlertRepository::create`] and [`AlertRepository::mark_resolved`]
//! are conditional writes.

mod memory;
mod snapshot;

pub use memory::{InMemoryAlertRepository, InMemoryRuleRepository};
pub use snapshot::{RuleCache, RuleSnapshot};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{AlertMetadata, AlertRule, AlertStatus, DetectedAlert, NaturalKey};

/// Result of a conditional create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The alert was stored
    Created(DetectedAlert),
    /// Another alert already holds the natural key's open slot
    Existing(DetectedAlert),
}

/// Requested status change for [`AlertRepository::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Target status
    pub to: AlertStatus,
    /// Suppression window end, for moves to `suppressed`
    pub suppressed_until: Option<DateTime<Utc>>,
    /// Who requested the change
    pub actor: Option<String>,
    /// Resolution reason, for moves to `resolved`
    pub reason: Option<String>,
}

impl StatusChange {
    /// A bare move to `to`.
    #[must_use]
    pub const fn to(to: AlertStatus) -> Self {
        Self {
            to,
            suppressed_until: None,
            actor: None,
            reason: None,
        }
    }
}

/// Source of alert rules.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Enabled rules, for one organization or all of them.
    async fn list_enabled_rules(&self, organization_id: Option<&str>) -> Result<Vec<AlertRule>>;
}

/// Alert storage.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// The alert holding the natural key's open slot, if any.
    async fn find_active(&self, key: &NaturalKey) -> Result<Option<DetectedAlert>>;

    /// Every open alert for an issue, across rules.
    async fn find_open_for_issue(
        &self,
        organization_id: &str,
        issue_id: &str,
    ) -> Result<Vec<DetectedAlert>>;

    /// Alert by ID.
    async fn get(&self, id: &str) -> Result<Option<DetectedAlert>>;

    /// Store a new alert unless its natural key already has an open alert.
    async fn create(&self, alert: DetectedAlert) -> Result<CreateOutcome>;

    /// Overwrite the metadata of an open alert and clear its cleared-condition mark.
    async fn refresh_metadata(
        &self,
        id: &str,
        metadata: AlertMetadata,
        at: DateTime<Utc>,
    ) -> Result<Option<DetectedAlert>>;

    /// Record that the detector saw the condition gone without resolving.
    async fn mark_condition_cleared(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Resolve an `active` or `acknowledged` alert.
    ///
    /// Returns `None` when the alert is missing, already resolved or suppressed,
    /// so the caller emits the resolved fact at most once.
    async fn mark_resolved(
        &self,
        id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DetectedAlert>>;

    /// Compare-and-set status change from `from`.
    async fn transition(
        &self,
        id: &str,
        from: AlertStatus,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> Result<DetectedAlert>;
}
