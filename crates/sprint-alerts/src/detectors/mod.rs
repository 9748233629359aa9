//! Detector strategies, one per alert type.
//!
//! # Architecture
//!
//! - [`Detector`] is the capability set every alert type implements
//! - [`DetectorRegistry`] maps an [`AlertType`] to its detector
//! - [`DetectionContext`] carries the evaluation clock and the bounded lookups
//!
//! Detectors never fail for a negative outcome: "no trigger" is `Ok(false)`.
//! Only infrastructure failures from lookups come back as `Err`.
//!
//! Adding an alert type means adding a variant and registering a detector. The
//! matcher and the lifecycle manager stay untouched.

mod early_completion;
mod missing_code;
mod missing_estimate;
mod missing_pr;
mod missing_time_tracking;
mod running_out_of_time;
mod unanswered_mention;
mod unmerged_pr;

pub use early_completion::EarlyCompletionDetector;
pub use missing_code::MissingCodeDetector;
pub use missing_estimate::MissingEstimateDetector;
pub use missing_pr::MissingPrDetector;
pub use missing_time_tracking::MissingTimeTrackingDetector;
pub use running_out_of_time::RunningOutOfTimeDetector;
pub use unanswered_mention::UnansweredMentionDetector;
pub use unmerged_pr::UnmergedPrDetector;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc, Weekday};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::lookups::Lookups;
use crate::models::{AlertMetadata, AlertRule, AlertType, Changelog, Issue, Sprint};

/// Evaluation inputs shared by every detector call in one pass.
#[derive(Clone)]
pub struct DetectionContext {
    /// Evaluation clock
    pub now: DateTime<Utc>,
    /// Timeout-bounded external lookups
    pub lookups: Lookups,
}

impl DetectionContext {
    /// Create a context evaluated at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>, lookups: Lookups) -> Self {
        Self { now, lookups }
    }

    /// Hours from `since` to now, honoring the rule's working-days flag.
    #[must_use]
    pub fn elapsed_hours(&self, since: DateTime<Utc>, rule: &AlertRule) -> f64 {
        elapsed_hours(since, self.now, rule.filters.working_days_only)
    }
}

/// Trigger/resolve strategy for one alert type.
#[async_trait]
pub trait Detector: Send + Sync {
    /// The alert type this detector handles.
    fn alert_type(&self) -> AlertType;

    /// Whether the condition holds for the issue right now.
    async fn should_trigger(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<bool>;

    /// Whether an open alert for the issue can be closed.
    async fn should_resolve(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        ctx: &DetectionContext,
    ) -> Result<bool>;

    /// Alert title.
    fn generate_title(&self, issue: &Issue) -> String;

    /// Alert description, built from the captured metadata.
    fn generate_description(&self, issue: &Issue, metadata: &AlertMetadata) -> String;

    /// Snapshot of the values used in the trigger decision.
    async fn generate_metadata(
        &self,
        issue: &Issue,
        rule: &AlertRule,
        sprint: Option<&Sprint>,
        changelog: Option<&Changelog>,
        ctx: &DetectionContext,
    ) -> Result<AlertMetadata>;

    /// Whether the recurring sprint scan evaluates this detector.
    fn sprint_scoped(&self) -> bool {
        false
    }

    /// Sprint-scan trigger predicate.
    async fn should_trigger_sprint(
        &self,
        _issue: &Issue,
        _sprint: &Sprint,
        _rule: &AlertRule,
        _ctx: &DetectionContext,
    ) -> Result<bool> {
        Ok(false)
    }

    /// Sprint-scan resolve predicate.
    async fn should_resolve_sprint(
        &self,
        issue: &Issue,
        _sprint: &Sprint,
        rule: &AlertRule,
        ctx: &DetectionContext,
    ) -> Result<bool> {
        self.should_resolve(issue, rule, ctx).await
    }
}

/// Alert type to detector mapping.
#[derive(Clone)]
pub struct DetectorRegistry {
    detectors: HashMap<AlertType, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    /// Create a registry with the eight built-in detectors.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(MissingEstimateDetector));
        registry.register(Arc::new(MissingTimeTrackingDetector));
        registry.register(Arc::new(MissingCodeDetector));
        registry.register(Arc::new(MissingPrDetector));
        registry.register(Arc::new(UnmergedPrDetector));
        registry.register(Arc::new(RunningOutOfTimeDetector));
        registry.register(Arc::new(EarlyCompletionDetector));
        registry.register(Arc::new(UnansweredMentionDetector));
        registry
    }

    /// Register a detector, returning the one it replaced.
    pub fn register(&mut self, detector: Arc<dyn Detector>) -> Option<Arc<dyn Detector>> {
        self.detectors.insert(detector.alert_type(), detector)
    }

    /// Look up the detector for an alert type.
    #[must_use]
    pub fn get(&self, alert_type: AlertType) -> Option<Arc<dyn Detector>> {
        self.detectors.get(&alert_type).cloned()
    }

    /// Number of registered detectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Whether no detectors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Use the rule's threshold when set to a usable value, else the default.
pub(crate) fn threshold(value: Option<f64>, default: f64) -> f64 {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(default)
}

/// When the issue entered its current status.
///
/// Prefers the status change in the delivered changelog, then the issue's own
/// status timestamp, then its last update.
pub(crate) fn status_since(issue: &Issue, changelog: Option<&Changelog>) -> DateTime<Utc> {
    changelog
        .and_then(Changelog::status_changed_at)
        .or(issue.status_changed_at)
        .unwrap_or(issue.updated_at)
}

/// Hours between `since` and `now`, optionally skipping Saturdays and Sundays (UTC).
pub(crate) fn elapsed_hours(since: DateTime<Utc>, now: DateTime<Utc>, working_days_only: bool) -> f64 {
    if now <= since {
        return 0.0;
    }
    if !working_days_only {
        return (now - since).num_seconds() as f64 / 3600.0;
    }

    let mut seconds = 0i64;
    let mut cursor = since;
    while cursor < now {
        let next_midnight = cursor
            .date_naive()
            .succ_opt()
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc());
        let segment_end = next_midnight.map_or(now, |midnight| midnight.min(now));

        if !matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun) {
            seconds += (segment_end - cursor).num_seconds();
        }
        cursor = segment_end;
    }

    seconds as f64 / 3600.0
}
