//! Configuration for the sprint alerts service.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::Result;
use crate::queue::RetryPolicy;

/// HMAC secrets used to verify webhooks.
///
/// A per-organization secret wins over the shared one. An organization with
/// neither is rejected.
#[derive(Clone, Default)]
pub struct WebhookSecrets {
    shared: Option<String>,
    per_organization: HashMap<String, String>,
}

impl WebhookSecrets {
    /// Secrets with one shared value.
    #[must_use]
    pub fn shared(secret: impl Into<String>) -> Self {
        Self {
            shared: Some(secret.into()),
            per_organization: HashMap::new(),
        }
    }

    /// Add or replace the secret for one organization.
    #[must_use]
    pub fn with_organization(
        mut self,
        organization_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.per_organization
            .insert(organization_id.into(), secret.into());
        self
    }

    /// Parse `org=secret,org=secret` pairs. Malformed or empty entries are skipped.
    #[must_use]
    pub fn parse_overrides(shared: Option<String>, overrides: &str) -> Self {
        let per_organization = overrides
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(org, secret)| (org.trim(), secret.trim()))
            .filter(|(org, secret)| !org.is_empty() && !secret.is_empty())
            .map(|(org, secret)| (org.to_string(), secret.to_string()))
            .collect();
        Self {
            shared: shared.filter(|s| !s.is_empty()),
            per_organization,
        }
    }

    /// Secret for the organization, if any is configured.
    #[must_use]
    pub fn secret_for(&self, organization_id: &str) -> Option<&str> {
        self.per_organization
            .get(organization_id)
            .map(String::as_str)
            .or(self.shared.as_deref())
    }

    /// Whether no secret is configured at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.is_none() && self.per_organization.is_empty()
    }
}

impl std::fmt::Debug for WebhookSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut organizations: Vec<&String> = self.per_organization.keys().collect();
        organizations.sort();
        f.debug_struct("WebhookSecrets")
            .field("shared", &self.shared.as_ref().map(|_| "<redacted>"))
            .field("organizations", &organizations)
            .finish()
    }
}

/// Service configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Webhook HMAC secrets.
    pub secrets: WebhookSecrets,
    /// Number of queue workers.
    pub worker_count: usize,
    /// Deadline for processing one event.
    pub event_timeout: Duration,
    /// Deadline for one external lookup.
    pub lookup_timeout: Duration,
    /// Lifetime of idempotency records.
    pub dedup_ttl: Duration,
    /// Backoff schedule in seconds.
    pub retry_schedule_secs: Vec<u64>,
    /// Deliveries before an event is dead-lettered.
    pub max_attempts: u32,
    /// Interval between rule snapshot reloads.
    pub rule_refresh_interval: Duration,
    /// Interval between sprint scans.
    pub sprint_scan_interval: Duration,
    /// JSON file of alert rules for the in-memory repository.
    pub rules_file: Option<String>,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(name, default))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: env_parse("SPRINT_ALERTS_PORT", 8080),
            secrets: WebhookSecrets::parse_overrides(
                env::var("WEBHOOK_SECRET").ok(),
                &env::var("WEBHOOK_SECRETS").unwrap_or_default(),
            ),
            worker_count: env_parse("WORKER_COUNT", 4).max(1),
            event_timeout: env_secs("EVENT_TIMEOUT_SECS", 30),
            lookup_timeout: env_secs("LOOKUP_TIMEOUT_SECS", 10),
            dedup_ttl: env_secs("DEDUP_TTL_SECS", 86_400),
            retry_schedule_secs: env::var("RETRY_SCHEDULE_SECS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .filter_map(|v| v.trim().parse().ok())
                        .collect::<Vec<u64>>()
                })
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| vec![1, 2, 5, 10, 30]),
            max_attempts: env_parse("MAX_ATTEMPTS", 5),
            rule_refresh_interval: env_secs("RULE_REFRESH_SECS", 300),
            sprint_scan_interval: env_secs("SPRINT_SCAN_SECS", 3600),
            rules_file: env::var("RULES_FILE").ok().filter(|s| !s.is_empty()),
        }
    }
}

impl Config {
    /// Retry policy built from the configured schedule.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.retry_schedule_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            self.max_attempts,
        )
    }

    /// Secret for the organization, if any is configured.
    #[must_use]
    pub fn secret_for(&self, organization_id: &str) -> Option<&str> {
        self.secrets.secret_for(organization_id)
    }
}
