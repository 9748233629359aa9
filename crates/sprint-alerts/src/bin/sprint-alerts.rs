//! Sprint alerts service.
//!
//! Receives provider webhooks, evaluates alert rules on a worker pool, and
//! rescans active sprints on a schedule.

use anyhow::{Context, Result};
use sprint_alerts::{
    build_router, scheduler, AppState, Config, DetectionEngine, InMemoryAlertRepository,
    InMemoryEventQueue, InMemoryIdempotencyStore, InMemoryRuleRepository, Lookups, StaticLookups,
    TracingSink, WorkerPool,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_rules(config: &Config) -> Result<InMemoryRuleRepository> {
    let Some(path) = &config.rules_file else {
        warn!("RULES_FILE not set, starting with no alert rules");
        return Ok(InMemoryRuleRepository::new(Vec::new()));
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file {path}"))?;
    InMemoryRuleRepository::from_json(&json)
        .with_context(|| format!("failed to parse rules file {path}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::default();
    info!(
        port = config.port,
        workers = config.worker_count,
        event_timeout_secs = config.event_timeout.as_secs(),
        max_attempts = config.max_attempts,
        secrets = ?config.secrets,
        "Starting sprint alerts service"
    );
    if config.secrets.is_empty() {
        warn!("No webhook secret configured, every webhook will be rejected");
    }

    let rules = Arc::new(load_rules(&config)?);
    let lookups_source = Arc::new(StaticLookups::new());
    let queue = Arc::new(InMemoryEventQueue::new(config.retry_policy()?));

    let engine = Arc::new(
        DetectionEngine::builder(rules, Arc::new(InMemoryAlertRepository::new()))
            .sink(Arc::new(TracingSink))
            .lookups(Lookups::from_static(lookups_source.clone()).with_timeout(config.lookup_timeout))
            .queue(queue.clone())
            .dedup(Arc::new(InMemoryIdempotencyStore::new()))
            .secrets(config.secrets.clone())
            .dedup_ttl(config.dedup_ttl)
            .build(),
    );
    let organizations = engine.refresh_rules(None).await?;
    info!(organizations, "Rule snapshots loaded");

    let cancel = CancellationToken::new();
    let workers = WorkerPool::spawn(
        engine.clone(),
        queue,
        config.worker_count,
        config.event_timeout,
        cancel.child_token(),
    );
    let scan = tokio::spawn(scheduler::run_sprint_scan(
        engine.clone(),
        lookups_source,
        config.sprint_scan_interval,
        cancel.child_token(),
    ));
    let refresh = tokio::spawn(scheduler::run_rule_refresh(
        engine.clone(),
        config.rule_refresh_interval,
        cancel.child_token(),
    ));

    let app = build_router(AppState { engine });
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    cancel.cancel();
    workers.shutdown().await;
    for (name, handle) in [("sprint scan", scan), ("rule refresh", refresh)] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Background task panicked");
        }
    }

    info!("Sprint alerts service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
