//! Fulfillment service entry point.

use std::process::ExitCode;
use std::sync::Arc;

use event_bus::{AmqpEventBus, declare_topology};
use fulfillment::LogNotifier;
use order_store::PostgresOrderStore;
use service::{Config, LogFormat, ServiceError, Workers};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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

async fn run(config: Config) -> Result<(), ServiceError> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // Both backends must be reachable at startup.
    let store =
        PostgresOrderStore::connect(&config.database_url, config.database_max_connections).await?;
    store.run_migrations().await?;
    let bus = Arc::new(AmqpEventBus::connect(&config.rabbitmq_url).await?);
    declare_topology(bus.as_ref(), &config.topology).await?;

    let workers = Workers::start(
        store,
        Arc::clone(&bus),
        &config.topology,
        LogNotifier::new(config.notification_latency),
    )
    .await?;

    let app = service::create_app(bus.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    workers.shutdown().await;
    if let Err(e) = bus.close().await {
        tracing::warn!(error = %e, "failed to close broker connection");
    }
    served?;

    tracing::info!("service shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fulfillment-service: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}
