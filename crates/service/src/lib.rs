//! Fulfillment service: runs the reservation and notification workers and
//! exposes health and Prometheus metrics over HTTP.

pub mod config;
pub mod error;
pub mod routes;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use event_bus::AmqpEventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::{ConfigError, ServiceError};
pub use workers::Workers;

/// Reports whether the broker connection is usable.
pub trait BrokerStatus: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl BrokerStatus for AmqpEventBus {
    fn is_connected(&self) -> bool {
        AmqpEventBus::is_connected(self)
    }
}

/// Creates the router serving `/health` and `/metrics`.
pub fn create_app(broker: Arc<dyn BrokerStatus>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .with_state(broker)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}
