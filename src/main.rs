use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use rand::Rng;
use tokio::signal;
use tokio::task::JoinHandle;

use notification_fanout::channels::{ChannelSender, SimulatedSender};
use notification_fanout::config::{Settings, SimulationConfig};
use notification_fanout::metrics::PrometheusMetrics;
use notification_fanout::notification::{
    ChannelType, Notification, NotificationCategory, NotificationOrchestrator, QueueOutcome,
    UserPreference,
};
use notification_fanout::pipeline::Pipeline;
use notification_fanout::repository::MemoryRepository;
use notification_fanout::telemetry::init_tracing;

/// Outcome counts across all publishers
#[derive(Default)]
struct PublishTally {
    queued: AtomicU64,
    duplicates: AtomicU64,
    no_channels: AtomicU64,
    rate_limited: AtomicU64,
    errors: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    init_tracing(&settings.logging)?;
    tracing::info!(
        workers = settings.pipeline.worker_count,
        queue_capacity = settings.pipeline.queue_capacity,
        retry_limit = settings.pipeline.retry_limit,
        "Configuration loaded"
    );

    let simulation = settings.simulation.clone();
    let metrics = Arc::new(PrometheusMetrics::new()?);

    let senders: Vec<Arc<dyn ChannelSender>> = ChannelType::ALL
        .iter()
        .map(|ch| {
            Arc::new(SimulatedSender::new(*ch, simulation.failure_rate)) as Arc<dyn ChannelSender>
        })
        .collect();

    for sender in &senders {
        if let Err(e) = sender.health_check().await {
            tracing::warn!(channel = %sender.channel(), error = %e, "Channel health check failed");
        }
    }

    let mut pipeline = Pipeline::new(
        settings.clone(),
        Arc::new(MemoryRepository::new()),
        senders,
        metrics.clone(),
    );
    pipeline.start();

    let start = Instant::now();
    let tally = Arc::new(PublishTally::default());
    let publishers = simulation.publishers.max(1);

    let handles: Vec<_> = (0..publishers)
        .map(|publisher| {
            let orchestrator = pipeline.orchestrator().clone();
            let tally = tally.clone();
            let simulation = simulation.clone();
            tokio::spawn(async move {
                run_publisher(publisher, publishers, &simulation, &orchestrator, &tally).await;
            })
        })
        .collect();

    let interrupted = if join_publishers(handles, shutdown_signal()).await {
        true
    } else {
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "All publishers finished, waiting for consumers"
        );
        tokio::select! {
            idle = pipeline.wait_idle(settings.shutdown.drain_timeout()) => {
                if !idle {
                    tracing::warn!("Pipeline did not go idle before the drain timeout");
                }
                false
            }
            _ = shutdown_signal() => true,
        }
    };

    let elapsed = start.elapsed();
    let stats = pipeline.stats();
    tracing::info!(
        elapsed_ms = elapsed.as_millis() as u64,
        queued = tally.queued.load(Ordering::Relaxed),
        duplicates = tally.duplicates.load(Ordering::Relaxed),
        no_channels = tally.no_channels.load(Ordering::Relaxed),
        rate_limited = tally.rate_limited.load(Ordering::Relaxed),
        errors = tally.errors.load(Ordering::Relaxed),
        handled = stats.totals.handled,
        delivered = stats.totals.delivered,
        retried = stats.totals.retried,
        dead_lettered = stats.totals.dead_lettered,
        dropped = stats.totals.dropped,
        "Simulation summary"
    );
    for topic in &stats.topics {
        tracing::info!(
            topic = %topic.topic,
            delivered = topic.stats.delivered,
            failed_attempts = topic.stats.failed_attempts,
            dead_lettered = topic.stats.dead_lettered,
            "Topic summary"
        );
    }

    match metrics.encode() {
        Ok(text) => tracing::debug!(metrics = %text, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    let reason = if interrupted { "signal" } else { "simulation complete" };
    let result = pipeline.shutdown(reason).await;
    tracing::info!(
        drained = result.drained,
        tasks_joined = result.tasks_joined,
        "Shutdown complete"
    );

    Ok(())
}

/// Wait for every publisher, or abort the unfinished ones once `signal`
/// resolves. Returns true if the signal won.
async fn join_publishers<F>(handles: Vec<JoinHandle<()>>, signal: F) -> bool
where
    F: Future<Output = ()>,
{
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

    tokio::select! {
        _ = futures::future::join_all(handles) => false,
        _ = signal => {
            for abort in &aborts {
                abort.abort();
            }
            tracing::info!(publishers = aborts.len(), "Publishers aborted");
            true
        }
    }
}

/// Publish every `publishers`-th notification starting at `publisher`
async fn run_publisher(
    publisher: usize,
    publishers: usize,
    simulation: &SimulationConfig,
    orchestrator: &NotificationOrchestrator,
    tally: &PublishTally,
) {
    let users = simulation.users.max(1);

    for i in (publisher..simulation.notifications).step_by(publishers) {
        let user_id = format!("user-{}", rand::rng().random_range(0..users));
        let category = NotificationCategory::ALL[i % NotificationCategory::ALL.len()];
        let mut notification = Notification::new(
            user_id.clone(),
            category,
            format!("Notification #{}", i),
            format!("Simulated {} notification", category),
        );

        // Every tenth request carries narrowed channel preferences
        let preferences = (i % 10 == 0)
            .then(|| UserPreference::new(user_id, vec![ChannelType::Email, ChannelType::InApp]));

        match orchestrator
            .create_and_queue(&mut notification, preferences.as_ref())
            .await
        {
            Ok(QueueOutcome::Queued { .. }) => tally.queued.fetch_add(1, Ordering::Relaxed),
            Ok(QueueOutcome::Duplicate) => tally.duplicates.fetch_add(1, Ordering::Relaxed),
            Ok(QueueOutcome::NoChannels) => tally.no_channels.fetch_add(1, Ordering::Relaxed),
            Ok(QueueOutcome::RateLimited) => tally.rate_limited.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                tracing::error!(error = %e, code = e.code(), "Failed to queue notification");
                tally.errors.fetch_add(1, Ordering::Relaxed)
            }
        };
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
