// SPDX-License-Identifier: BUSL-1.1
//! # artifex-server: Build queue, workers and artifact cache over HTTP
//!
//! ## API Surface
//!
//! | Route                              | Module                 |
//! |------------------------------------|------------------------|
//! | `POST /artifacts/submit-requests`  | [`routes::artifacts`]  |
//! | `POST /artifacts/find-matching`    | [`routes::artifacts`]  |
//! | `GET  /artifacts/{uuid}/{name}`    | [`routes::artifacts`]  |
//! | `GET  /queue`                      | [`routes::queue`]      |
//! | `GET  /health/liveness`            | this module            |
//! | `GET  /metrics`                    | this module            |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → Handler
//! ```

pub mod artifact_cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod queue;
pub mod routes;
pub mod state;
pub mod worker;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use artifex_blobcache::BlobCache;
use artifex_core::{FileGetter, FileLister, Registry};

use crate::artifact_cache::{ArtifactCache, ArtifactCacheConfig};
use crate::error::AppError;
use crate::middleware::metrics::{metrics_middleware, ServerMetrics};
use crate::queue::RequestQueue;
use crate::state::AppState;
use crate::worker::{BuildWorker, BuildWorkerConfig};

/// Assemble the application router with all routes and middleware.
pub fn app(state: AppState, metrics: ServerMetrics) -> Router {
    let api = Router::new()
        .merge(routes::artifacts::router())
        .merge(routes::queue::router())
        .layer(from_fn(metrics_middleware))
        .layer(Extension(metrics.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let health = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .layer(Extension(metrics))
        .with_state(state);

    Router::new().merge(health).merge(api)
}

async fn liveness() -> &'static str {
    "ok"
}

/// GET /metrics: refreshes the pull-model gauges, then encodes the
/// registry in Prometheus text format.
async fn prometheus_metrics(
    State(state): State<AppState>,
    Extension(metrics): Extension<ServerMetrics>,
) -> Response {
    metrics.queue_depth().set(state.queue.len() as i64);
    metrics.cached_artifacts().set(state.cache.len() as i64);
    match metrics.gather_and_encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => AppError::Internal(e).into_response(),
    }
}

/// A fully wired server: shared state, metrics and the build worker.
pub struct Server {
    pub state: AppState,
    pub metrics: ServerMetrics,
    pub worker: Arc<BuildWorker>,
}

impl Server {
    pub fn new(
        blobs: BlobCache,
        cache_config: ArtifactCacheConfig,
        worker_config: BuildWorkerConfig,
        lister: Arc<dyn FileLister>,
        file_getter: Arc<dyn FileGetter>,
        registry: Registry,
    ) -> Self {
        let queue = Arc::new(RequestQueue::new());
        let cache = Arc::new(ArtifactCache::new(blobs, cache_config));
        let metrics = ServerMetrics::new();
        let worker = Arc::new(BuildWorker::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            lister,
            file_getter,
            Arc::new(registry),
            metrics.clone(),
            worker_config,
        ));
        Self {
            state: AppState::new(queue, cache),
            metrics,
            worker,
        }
    }

    pub fn router(&self) -> Router {
        app(self.state.clone(), self.metrics.clone())
    }

    /// Run the workers and serve HTTP on `listener` until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        let workers = self.worker.spawn(shutdown.clone());
        let router = self.router();
        let served = axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown({
                let shutdown = shutdown.clone();
                async move { shutdown.cancelled().await }
            })
            .await;
        shutdown.cancel();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "build worker task ended abnormally");
            }
        }
        served
    }
}
