//! Alert facts handed to the notification layer.
//!
//! Delivery fan-out (chat, email, escalation) lives outside this crate. The core
//! only reports what happened through a [`NotificationSink`], fire-and-forget:
//! a sink never fails an evaluation.
//!
//! - [`TracingSink`] logs each fact
//! - [`ChannelSink`] forwards facts to an mpsc receiver
//! - [`Notifier`] fans out to several sinks

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::models::DetectedAlert;

/// Something that happened to an alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "alert", rename_all = "snake_case")]
pub enum AlertFact {
    /// A new alert was stored
    Created(DetectedAlert),
    /// An alert was resolved
    Resolved(DetectedAlert),
    /// An acknowledged alert went back to active
    Reopened(DetectedAlert),
}

impl AlertFact {
    /// The alert the fact is about.
    #[must_use]
    pub const fn alert(&self) -> &DetectedAlert {
        match self {
            Self::Created(alert) | Self::Resolved(alert) | Self::Reopened(alert) => alert,
        }
    }
}

/// Receiver of alert facts.
pub trait NotificationSink: Send + Sync {
    /// Sink name for logs.
    fn name(&self) -> &'static str;

    /// A new alert was stored.
    fn alert_created(&self, alert: &DetectedAlert);

    /// An alert was resolved.
    fn alert_resolved(&self, alert: &DetectedAlert);

    /// An acknowledged alert went back to active.
    fn alert_reopened(&self, alert: &DetectedAlert) {
        self.alert_created(alert);
    }
}

/// Logs every fact at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn alert_created(&self, alert: &DetectedAlert) {
        info!(
            alert_id = %alert.id,
            organization_id = %alert.organization_id,
            rule_id = %alert.rule_id,
            issue_key = %alert.issue_key,
            alert_type = %alert.alert_type,
            severity = ?alert.severity,
            "Alert created"
        );
    }

    fn alert_resolved(&self, alert: &DetectedAlert) {
        info!(
            alert_id = %alert.id,
            organization_id = %alert.organization_id,
            rule_id = %alert.rule_id,
            issue_key = %alert.issue_key,
            reason = alert.resolution_reason.as_deref().unwrap_or_default(),
            "Alert resolved"
        );
    }

    fn alert_reopened(&self, alert: &DetectedAlert) {
        info!(
            alert_id = %alert.id,
            organization_id = %alert.organization_id,
            rule_id = %alert.rule_id,
            issue_key = %alert.issue_key,
            "Alert reopened"
        );
    }
}

/// Forwards facts to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<AlertFact>,
}

impl ChannelSink {
    /// Create a sink and the receiver its facts go to.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertFact>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, fact: AlertFact) {
        if self.sender.send(fact).is_err() {
            debug!("Notification receiver dropped, discarding fact");
        }
    }
}

impl NotificationSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn alert_created(&self, alert: &DetectedAlert) {
        self.send(AlertFact::Created(alert.clone()));
    }

    fn alert_resolved(&self, alert: &DetectedAlert) {
        self.send(AlertFact::Resolved(alert.clone()));
    }

    fn alert_reopened(&self, alert: &DetectedAlert) {
        self.send(AlertFact::Reopened(alert.clone()));
    }
}

/// Dispatches facts to every configured sink.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    /// Create a notifier over the given sinks.
    #[must_use]
    pub fn with_sinks(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// A notifier that drops every fact.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Number of sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl NotificationSink for Notifier {
    fn name(&self) -> &'static str {
        "notifier"
    }

    fn alert_created(&self, alert: &DetectedAlert) {
        for sink in &self.sinks {
            sink.alert_created(alert);
        }
    }

    fn alert_resolved(&self, alert: &DetectedAlert) {
        for sink in &self.sinks {
            sink.alert_resolved(alert);
        }
    }

    fn alert_reopened(&self, alert: &DetectedAlert) {
        for sink in &self.sinks {
            sink.alert_reopened(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::issue;
    use crate::models::{AlertMetadata, AlertRule, AlertType};
    use chrono::Utc;

    fn alert() -> DetectedAlert {
        let now = Utc::now();
        let issue = issue();
        let rule = AlertRule::new("rule-1", "org-1", AlertType::MissingEstimate);
        DetectedAlert::new(
            &rule,
            &issue,
            "t".to_string(),
            "d".to_string(),
            AlertMetadata::new(&issue, now),
            now,
        )
    }

    #[test]
    fn test_channel_sink_forwards_facts() {
        let (sink, mut receiver) = ChannelSink::new();
        let a = alert();

        sink.alert_created(&a);
        sink.alert_reopened(&a);
        sink.alert_resolved(&a);

        assert!(matches!(receiver.try_recv().unwrap(), AlertFact::Created(_)));
        assert!(matches!(receiver.try_recv().unwrap(), AlertFact::Reopened(_)));
        assert!(matches!(receiver.try_recv().unwrap(), AlertFact::Resolved(_)));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_notifier_fans_out() {
        let (first, mut first_rx) = ChannelSink::new();
        let (second, mut second_rx) = ChannelSink::new();
        let notifier = Notifier::with_sinks(vec![Arc::new(first), Arc::new(second), Arc::new(TracingSink)]);

        notifier.alert_created(&alert());

        assert_eq!(notifier.sink_count(), 3);
        assert!(first_rx.try_recv().is_ok());
        assert!(second_rx.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        sink.alert_created(&alert());
        Notifier::disabled().alert_resolved(&alert());
    }

    #[test]
    fn test_fact_serializes_tagged() {
        let fact = AlertFact::Created(alert());
        let json = serde_json::to_value(&fact).unwrap();
        assert_eq!(json["type"], "created");
        assert_eq!(json["alert"]["issueKey"], "TEST-123");
        assert_eq!(fact.alert().issue_key, "TEST-123");
    }
}
