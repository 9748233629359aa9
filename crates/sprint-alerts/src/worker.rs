//! Workers draining the event queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::DetectionEngine;
use crate::error::EngineError;
use crate::intake::WebhookEvent;
use crate::queue::{EventQueue, NackOutcome};

/// Pool of queue workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `count` workers that process events from `queue` through `engine`.
    ///
    /// Each event gets `event_timeout` to finish; a timeout is nacked like any
    /// other failure.
    #[must_use]
    pub fn spawn(
        engine: Arc<DetectionEngine>,
        queue: Arc<dyn EventQueue>,
        count: usize,
        event_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..count.max(1))
            .map(|worker| {
                let engine = Arc::clone(&engine);
                let queue = Arc::clone(&queue);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(worker, &engine, queue.as_ref(), event_timeout, &cancel).await;
                })
            })
            .collect();
        info!(workers = count.max(1), "Worker pool started");
        Self { handles, cancel }
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop the workers and wait for them to finish their current event.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    engine: &DetectionEngine,
    queue: &dyn EventQueue,
    event_timeout: Duration,
    cancel: &CancellationToken,
) {
    debug!(worker, "Worker started");
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            next = queue.dequeue() => match next {
                Ok(event) => event,
                Err(e) => {
                    error!(worker, error = %e, "Dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            },
        };
        process(worker, engine, queue, &event, event_timeout).await;
    }
    debug!(worker, "Worker stopped");
}

async fn process(
    worker: usize,
    engine: &DetectionEngine,
    queue: &dyn EventQueue,
    event: &WebhookEvent,
    event_timeout: Duration,
) {
    let result = match tokio::time::timeout(event_timeout, engine.handle_event(event)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::timeout(format!("event {}", event.event_id))),
    };

    match result {
        Ok(()) => {
            debug!(worker, event_id = %event.event_id, attempt = event.attempt, "Event processed");
            if let Err(e) = queue.ack(event).await {
                error!(event_id = %event.event_id, error = %e, "Ack failed");
            }
        }
        Err(failure) => match queue.nack(event, &failure).await {
            Ok(NackOutcome::Retrying { attempt, delay }) => {
                warn!(
                    worker,
                    event_id = %event.event_id,
                    organization_id = %event.organization_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "Event failed, retrying"
                );
            }
            Ok(NackOutcome::DeadLettered) => {}
            Err(e) => error!(event_id = %event.event_id, error = %e, "Nack failed"),
        },
    }
}
