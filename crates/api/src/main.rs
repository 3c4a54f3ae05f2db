//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use billing::{InventoryEventConsumer, OutboxPublisher};
use messaging::{AmqpConsumer, AmqpEventBus, EventBus, InMemoryEventBus};
use metrics_exporter_prometheus::PrometheusHandle;
use store::PostgresStore;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Database
    let store = PostgresStore::connect(&config.database_url, config.db_max_connections).await?;
    store.run_migrations().await?;
    tracing::info!("database ready");

    // 4. Event bus, then serve
    match config.amqp_config() {
        Some(amqp) => {
            let bus = AmqpEventBus::connect(amqp).await?;
            let consumer = bus.consumer();
            serve(config, store, bus, Some(consumer), metrics_handle).await
        }
        None => {
            tracing::warn!("AMQP disabled, events stay in the outbox of an in-memory bus");
            serve(config, store, InMemoryEventBus::new(), None, metrics_handle).await
        }
    }
}

/// Runs the HTTP server, the outbox publisher and the inbound consumers
/// until a shutdown signal arrives.
async fn serve<B: EventBus>(
    config: Config,
    store: PostgresStore,
    bus: B,
    consumer: Option<AmqpConsumer>,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let publisher = OutboxPublisher::new(store.clone(), bus.clone(), config.publisher_config());
    tasks.push(tokio::spawn(publisher.run(shutdown_rx.clone())));

    if let Some(consumer) = consumer {
        let handler = Arc::new(InventoryEventConsumer::new(store.clone()));
        for worker in 0..config.consumer_workers.max(1) {
            let tag = format!("{}-{worker}", config.event_source);
            tasks.push(tokio::spawn(consumer.clone().run(
                tag,
                handler.clone(),
                shutdown_rx.clone(),
            )));
        }
    }

    let state = Arc::new(api::AppState::new(store, bus, &config));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Background loops finish their current batch or delivery.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "background task failed");
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
