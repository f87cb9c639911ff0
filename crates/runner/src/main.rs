mod cli;
mod metrics;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docflow_core::{
    load_config, validate_config, CancellationController, ConcurrentScheduler, Config,
    EventEnvelope, EventHandle, HttpBackend, IdentifierMap, ItemProcessor, RepairScheduler,
    Repairer, RunOutcome, WorkItem,
};

use cli::{Args, Commands};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

struct Services {
    controller: CancellationController,
    identifiers: IdentifierMap,
    processor: Arc<ItemProcessor>,
    scheduler: ConcurrentScheduler,
    repairs: RepairScheduler,
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.json_logs);

    info!("Loading config from {}", args.config.display());
    let mut config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Commands::Run { full: true } = args.command {
        config.processor.limit_to_core_analysis = false;
    }
    validate_config(&config).context("Config validation failed")?;

    info!(
        "Backend at {}, {} concurrent runs, {} concurrent repairs",
        config.backend.base_url, config.scheduler.max_concurrent, config.repair.max_concurrent
    );

    let events = EventHandle::new(config.events.buffer_size);
    let listener = tokio::spawn(log_events(events.subscribe()));
    let services = build_services(&config, events)?;

    let work = execute(args.command, &services);
    tokio::pin!(work);

    let report = tokio::select! {
        report = &mut work => report?,
        _ = shutdown_signal() => {
            info!("Shutdown requested, stopping in-flight work");
            services.controller.stop();
            work.await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    let identifiers = services.identifiers.len().await;
    if identifiers > 0 {
        info!("{} persistent identifiers assigned", identifiers);
    }

    listener.abort();

    if let Some(path) = args.metrics_out.as_deref() {
        write_metrics(path)?;
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_services(config: &Config, events: EventHandle) -> Result<Services> {
    let backend = Arc::new(
        HttpBackend::new(config.backend.clone()).context("Failed to create backend client")?,
    );
    let controller = CancellationController::from_config(&config.cancellation);
    let identifiers = IdentifierMap::new();

    let processor = Arc::new(
        ItemProcessor::new(
            backend.clone(),
            config.processor.clone(),
            events.clone(),
            controller.clone(),
        )
        .with_identifiers(identifiers.clone()),
    );

    let repairer = Repairer::new(
        backend.clone(),
        events.clone(),
        controller.clone(),
        identifiers.clone(),
        config.repair.force_update,
    );

    let scheduler = ConcurrentScheduler::new(
        config.scheduler.clone(),
        backend,
        Arc::clone(&processor),
        repairer.clone(),
        events.clone(),
        controller.clone(),
    );

    let repairs = RepairScheduler::new(repairer, config.repair.clone(), events, controller.clone());

    Ok(Services {
        controller,
        identifiers,
        processor,
        scheduler,
        repairs,
    })
}

async fn execute(command: Commands, services: &Services) -> Result<Value> {
    match command {
        Commands::Run { .. } => {
            let summary = services.scheduler.run().await?;
            info!(
                "Run {} finished after {} rounds: {}",
                summary.run_id,
                summary.rounds,
                services.scheduler.status().await.text()
            );
            Ok(serde_json::to_value(summary)?)
        }
        Commands::Process { ids } => process_items(ids, services).await,
        Commands::Repair { ids } => {
            let summary = services.repairs.run(ids).await;
            Ok(serde_json::to_value(summary)?)
        }
        Commands::Sweep => {
            let summary = services
                .repairs
                .sweep()
                .await
                .context("Failed to list broken items")?;
            Ok(serde_json::to_value(summary)?)
        }
    }
}

/// Process explicit ids side by side; the processor's own handle registry
/// turns duplicate ids into no-ops.
async fn process_items(ids: Vec<String>, services: &Services) -> Result<Value> {
    let mut tasks = JoinSet::new();
    for id in ids {
        let processor = Arc::clone(&services.processor);
        tasks.spawn(async move {
            let outcome = processor.process(&WorkItem::new(id.as_str())).await;
            (id, outcome)
        });
    }

    let mut results = serde_json::Map::new();
    while let Some(joined) = tasks.join_next().await {
        let (id, outcome) = joined.context("Processing task panicked")?;
        let entry = match outcome {
            Ok(RunOutcome::Completed {
                persistent_id,
                source,
            }) => json!({
                "outcome": "completed",
                "source": source,
                "persistent_id": persistent_id,
            }),
            Ok(RunOutcome::AlreadyRunning) => json!({ "outcome": "already_running" }),
            Ok(RunOutcome::Unresolved { last_update }) => json!({
                "outcome": "unresolved",
                "last_update": last_update,
            }),
            Err(e) => json!({ "outcome": e.outcome(), "error": e.to_string() }),
        };
        results.insert(id, entry);
    }

    Ok(Value::Object(results))
}

/// Log every orchestrator event and count the ones we fell behind on.
async fn log_events(mut rx: broadcast::Receiver<EventEnvelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => {
                let name = envelope.event.name();
                metrics::EVENTS_RECEIVED.with_label_values(&[name]).inc();
                debug!(event = name, at = %envelope.timestamp, "{:?}", envelope.event);
            }
            Err(RecvError::Lagged(missed)) => {
                metrics::EVENTS_LAGGED.inc_by(missed);
                warn!("Event listener lagged, {} events dropped", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn write_metrics(path: &Path) -> Result<()> {
    std::fs::write(path, metrics::encode_metrics())
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    info!("Metrics written to {}", path.display());
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        write_metrics(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("docflow_host_events_lagged_total"));
    }

    #[tokio::test]
    async fn test_build_services_from_config() {
        let config = docflow_core::load_config_from_str(
            r#"
[backend]
base_url = "http://localhost:3000"

[scheduler]
max_concurrent = 2
"#,
        )
        .unwrap();

        let services = build_services(&config, EventHandle::new(16)).unwrap();
        assert!(!services.controller.is_stopped());
        assert!(!services.scheduler.status().await.running);
        assert_eq!(services.repairs.active(), 0);
    }
}
