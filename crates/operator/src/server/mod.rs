//! Debug HTTP surface: liveness, Prometheus exposition and a view of the
//! cron engine's entries.

mod routes;
mod template;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cron::CronEngine;
use crate::metrics::Metrics;
use crate::scaling::ScalingJob;
use crate::Result;

pub use template::render_index;

pub struct Server {
    engine: Arc<CronEngine<ScalingJob>>,
    metrics: Arc<Metrics>,
}

impl Server {
    pub fn new(engine: Arc<CronEngine<ScalingJob>>, metrics: Arc<Metrics>) -> Self {
        Self { engine, metrics }
    }

    pub fn build_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .route("/api.json", get(routes::entries))
            .route("/index.html", get(routes::index))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serves the router on `addr` until `shutdown` is cancelled.
    pub async fn start(self, addr: &str, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Debug server listening on {}", addr);

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Debug server stopped");
        Ok(())
    }
}
