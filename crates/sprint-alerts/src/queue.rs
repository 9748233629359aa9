//! Event queue with backoff retries and a dead-letter list.
//!
//! Delivery is at-least-once. `attempt` counts deliveries and is bumped on
//! dequeue; a failed delivery is re-scheduled after [`RetryPolicy::delay_for`]
//! until `max_attempts` is reached, then parked as a [`DeadLetter`]. Dead
//! letters are never redelivered on their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::{EngineError, ErrorCategory, Result};
use crate::intake::WebhookEvent;

/// Backoff schedule and delivery limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Build a policy from an explicit schedule.
    ///
    /// The schedule must be non-empty and never decrease.
    pub fn new(schedule: Vec<Duration>, max_attempts: u32) -> Result<Self> {
        if schedule.is_empty() {
            return Err(EngineError::Configuration(
                "retry schedule must not be empty".to_string(),
            ));
        }
        if schedule.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(EngineError::Configuration(format!(
                "retry schedule must not decrease: {schedule:?}"
            )));
        }
        if max_attempts == 0 {
            return Err(EngineError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            schedule,
            max_attempts,
        })
    }

    /// Doubling schedule from `initial`, capped at `max_delay`.
    pub fn exponential(initial: Duration, max_delay: Duration, max_attempts: u32) -> Result<Self> {
        let steps = max_attempts.max(1);
        let schedule = (0..steps)
            .map(|n| {
                initial
                    .checked_mul(2u32.saturating_pow(n))
                    .map_or(max_delay, |delay| delay.min(max_delay))
            })
            .collect();
        Self::new(schedule, max_attempts)
    }

    /// Delay before redelivering after failed delivery number `attempt` (1-based).
    ///
    /// Attempts past the end of the schedule use its last entry.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt.saturating_sub(1) as usize).min(self.schedule.len() - 1);
        self.schedule[index]
    }

    /// Deliveries before an event is dead-lettered.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff schedule.
    #[must_use]
    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            schedule: [1, 2, 5, 10, 30].map(Duration::from_secs).to_vec(),
            max_attempts: 5,
        }
    }
}

/// What a nack did with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Scheduled for another delivery
    Retrying {
        /// Deliveries so far
        attempt: u32,
        /// Wait before the next delivery
        delay: Duration,
    },
    /// Moved to the dead-letter list
    DeadLettered,
}

/// An event that ran out of attempts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// The event as last delivered
    pub event: WebhookEvent,
    /// Last failure
    pub error: String,
    /// Category of the last failure
    pub category: ErrorCategory,
    /// Deliveries made
    pub attempts: u32,
    /// When the event was parked
    pub failed_at: DateTime<Utc>,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    /// Waiting for a worker
    pub ready: usize,
    /// Waiting for a backoff delay
    pub delayed: usize,
    /// Handed to a worker, not yet acked
    pub in_flight: usize,
    /// Parked
    pub dead: usize,
}

/// Work queue feeding the worker pool.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Add a new event.
    async fn enqueue(&self, event: WebhookEvent) -> Result<()>;

    /// Wait for the next due event and mark it in flight.
    async fn dequeue(&self) -> Result<WebhookEvent>;

    /// Processing succeeded. Events are identified by organization and
    /// delivery id, matching the dedup scope.
    async fn ack(&self, event: &WebhookEvent) -> Result<()>;

    /// Processing failed; retry or dead-letter.
    async fn nack(&self, event: &WebhookEvent, error: &EngineError) -> Result<NackOutcome>;

    /// Events that ran out of attempts.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<WebhookEvent>,
    delayed: Vec<(Instant, WebhookEvent)>,
    in_flight: HashMap<FlightKey, WebhookEvent>,
    dead: Vec<DeadLetter>,
}

/// `(organization_id, event_id)`
type FlightKey = (String, String);

fn flight_key(event: &WebhookEvent) -> FlightKey {
    (event.organization_id.clone(), event.event_id.clone())
}

fn not_in_flight(event: &WebhookEvent) -> EngineError {
    EngineError::Queue(format!(
        "event {} for {} is not in flight",
        event.event_id, event.organization_id
    ))
}

impl QueueState {
    /// Move delayed events whose time has come to the back of the ready list.
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(due, _)| *due);
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        self.ready
            .extend(self.delayed.drain(..due).map(|(_, event)| event));
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }
}

/// In-memory queue.
pub struct InMemoryEventQueue {
    state: Mutex<QueueState>,
    wakeup: Notify,
    policy: RetryPolicy,
}

impl InMemoryEventQueue {
    /// Create a queue with the given retry policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            policy,
        }
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current counters.
    pub async fn depth(&self) -> QueueDepth {
        let state = self.state.lock().await;
        QueueDepth {
            ready: state.ready.len(),
            delayed: state.delayed.len(),
            in_flight: state.in_flight.len(),
            dead: state.dead.len(),
        }
    }

    /// Put a dead-lettered event back on the queue with a fresh attempt budget.
    pub async fn replay_dead_letter(&self, organization_id: &str, event_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(index) = state.dead.iter().position(|d| {
            d.event.organization_id == organization_id && d.event.event_id == event_id
        }) else {
            return Ok(false);
        };
        let mut event = state.dead.remove(index).event;
        event.attempt = 0;
        state.ready.push_back(event);
        drop(state);

        info!(organization_id = %organization_id, event_id = %event_id, "Dead letter replayed");
        self.wakeup.notify_one();
        Ok(true)
    }
}

impl Default for InMemoryEventQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn enqueue(&self, event: WebhookEvent) -> Result<()> {
        self.state.lock().await.ready.push_back(event);
        self.wakeup.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<WebhookEvent> {
        loop {
            let next_due = {
                let mut state = self.state.lock().await;
                state.promote_due(Instant::now());
                if let Some(mut event) = state.ready.pop_front() {
                    event.attempt += 1;
                    state.in_flight.insert(flight_key(&event), event.clone());
                    return Ok(event);
                }
                state.next_due()
            };

            match next_due {
                Some(at) => {
                    tokio::select! {
                        () = self.wakeup.notified() => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.wakeup.notified().await,
            }
        }
    }

    async fn ack(&self, event: &WebhookEvent) -> Result<()> {
        self.state
            .lock()
            .await
            .in_flight
            .remove(&flight_key(event))
            .map(|_| ())
            .ok_or_else(|| not_in_flight(event))
    }

    async fn nack(&self, delivered: &WebhookEvent, error: &EngineError) -> Result<NackOutcome> {
        let mut state = self.state.lock().await;
        let event = state
            .in_flight
            .remove(&flight_key(delivered))
            .ok_or_else(|| not_in_flight(delivered))?;

        if event.attempt >= self.policy.max_attempts {
            error!(
                event_id = %event.event_id,
                organization_id = %event.organization_id,
                attempt = event.attempt,
                error = %error,
                "Event dead-lettered"
            );
            let attempts = event.attempt;
            state.dead.push(DeadLetter {
                event,
                error: error.to_string(),
                category: error.category(),
                attempts,
                failed_at: Utc::now(),
            });
            return Ok(NackOutcome::DeadLettered);
        }

        let attempt = event.attempt;
        let delay = self.policy.delay_for(attempt);
        state.delayed.push((Instant::now() + delay, event));
        drop(state);

        // Wake a waiting worker so it re-arms its timer for the new due time.
        self.wakeup.notify_one();
        Ok(NackOutcome::Retrying { attempt, delay })
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.state.lock().await.dead.clone())
    }
}
