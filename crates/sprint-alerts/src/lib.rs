//! Sprint-health alert detection and the webhook pipeline that feeds it.
//!
//! This crate provides:
//! - Alert rules, scoped by project, issue type, status, labels and assignee
//! - Eight detectors (missing estimate, missing time tracking, missing code,
//!   missing pull request, unmerged pull request, running out of time, early
//!   completion, unanswered mention)
//! - An alert lifecycle keyed by `(organization, rule, issue)` so each
//!   condition has at most one open alert
//! - Webhook intake with HMAC verification, deduplication, a retrying queue
//!   and dead letters
//! - A worker pool, a recurring sprint scan, and an axum webhook endpoint
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sprint_alerts::{
//!     ChangeType, DetectionEngine, InMemoryAlertRepository, InMemoryRuleRepository,
//! };
//!
//! # async fn run(issue: sprint_alerts::Issue) -> sprint_alerts::Result<()> {
//! let rules = Arc::new(InMemoryRuleRepository::new(Vec::new()));
//! let alerts = Arc::new(InMemoryAlertRepository::new());
//! let engine = DetectionEngine::builder(rules, alerts).build();
//!
//! let created = engine
//!     .process_issue_event("org-1", &issue, ChangeType::Updated, None)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! The service binary reads its settings from the environment, see [`Config`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dedup;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod lookups;
pub mod matcher;
pub mod models;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod worker;

pub use config::{Config, WebhookSecrets};
pub use dedup::{IdempotencyStore, InMemoryIdempotencyStore};
pub use detectors::{DetectionContext, Detector, DetectorRegistry};
pub use engine::{DetectionEngine, ReceiptStatus, WebhookReceipt};
pub use error::{EngineError, ErrorCategory, IntakeError, Result};
pub use intake::{WebhookEvent, WebhookHeaders};
pub use lifecycle::{AlertLifecycleManager, Evaluation, Outcome, Skip};
pub use lookups::{Lookups, StaticLookups};
pub use models::*;
pub use notify::{AlertFact, ChannelSink, NotificationSink, Notifier, TracingSink};
pub use queue::{DeadLetter, EventQueue, InMemoryEventQueue, NackOutcome, RetryPolicy};
pub use server::{build_router, AppState};
pub use store::{AlertRepository, InMemoryAlertRepository, InMemoryRuleRepository, RuleRepository};
pub use worker::WorkerPool;
