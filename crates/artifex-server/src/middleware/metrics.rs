// SPDX-License-Identifier: BUSL-1.1
//! # Prometheus Metrics
//!
//! HTTP-level metrics (request counts, latency, errors) are recorded in
//! middleware. Build outcomes are recorded by the build workers. Queue depth
//! and cached artifact count are gauges updated on each `/metrics` scrape
//! (pull model), see the metrics handler in `lib.rs`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use artifex_core::BuildErrorKind;

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ServerMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,

    // -- HTTP middleware metrics (push model) --
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_errors_total: IntCounterVec,

    // -- Build worker metrics (push model) --
    builds_total: IntCounterVec,
    build_failures_total: IntCounterVec,
    build_duration_seconds: Histogram,

    // -- Gauges (pull model, updated on /metrics scrape) --
    queue_depth: IntGauge,
    cached_artifacts: IntGauge,
}

impl std::fmt::Debug for ServerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMetrics")
            .field("requests", &self.requests())
            .field("builds", &self.builds())
            .finish()
    }
}

/// Outcome label of one worker iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcomeLabel {
    Built,
    Skipped,
    Failed,
}

impl BuildOutcomeLabel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

fn sum_counter(counter: &IntCounterVec) -> u64 {
    counter
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric().iter())
        .map(|m| m.get_counter().get_value() as u64)
        .sum()
}

impl ServerMetrics {
    /// Create a new metrics instance with a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("artifex_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "artifex_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )
        .expect("metric can be created");

        let http_errors_total = IntCounterVec::new(
            Opts::new("artifex_http_errors_total", "Total HTTP errors (4xx and 5xx)"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let builds_total = IntCounterVec::new(
            Opts::new("artifex_builds_total", "Build requests processed, by outcome"),
            &["outcome"],
        )
        .expect("metric can be created");

        let build_failures_total = IntCounterVec::new(
            Opts::new("artifex_build_failures_total", "Failed builds, by error kind"),
            &["kind"],
        )
        .expect("metric can be created");

        let build_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "artifex_build_duration_seconds",
                "Wall-clock duration of builder invocations",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )
        .expect("metric can be created");

        let queue_depth = IntGauge::new("artifex_queue_depth", "Pending build request records")
            .expect("metric can be created");

        let cached_artifacts =
            IntGauge::new("artifex_cached_artifacts", "Live artifacts in the artifact cache")
                .expect("metric can be created");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_errors_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(builds_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(build_failures_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(build_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(queue_depth.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(cached_artifacts.clone()))
            .expect("metric can be registered");

        Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                http_errors_total,
                builds_total,
                build_failures_total,
                build_duration_seconds,
                queue_depth,
                cached_artifacts,
            }),
        }
    }

    /// Total request count (sum across all labels).
    pub fn requests(&self) -> u64 {
        sum_counter(&self.inner.http_requests_total)
    }

    pub fn errors(&self) -> u64 {
        sum_counter(&self.inner.http_errors_total)
    }

    /// Total build iterations (sum across outcomes).
    pub fn builds(&self) -> u64 {
        sum_counter(&self.inner.builds_total)
    }

    pub fn builds_with_outcome(&self, outcome: BuildOutcomeLabel) -> u64 {
        self.inner
            .builds_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    /// Record an HTTP request (called by the middleware).
    fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();

        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);

        if status >= 400 {
            self.inner
                .http_errors_total
                .with_label_values(&[method, path, &status_str])
                .inc();
        }
    }

    pub fn record_build(&self, outcome: BuildOutcomeLabel, failure: Option<BuildErrorKind>) {
        self.inner
            .builds_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        if let Some(kind) = failure {
            self.inner
                .build_failures_total
                .with_label_values(&[kind.as_str()])
                .inc();
        }
    }

    pub fn observe_build_duration(&self, secs: f64) {
        self.inner.build_duration_seconds.observe(secs);
    }

    pub fn queue_depth(&self) -> &IntGauge {
        &self.inner.queue_depth
    }

    pub fn cached_artifacts(&self) -> &IntGauge {
        &self.inner.cached_artifacts
    }

    /// Gather all metrics and encode to Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("failed to encode metrics: {e}"))?;
        String::from_utf8(buffer).map_err(|e| format!("metrics encoding produced invalid UTF-8: {e}"))
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware that records HTTP request metrics via Prometheus.
///
/// Paths are labelled by their route template (`/artifacts/{uuid}/{name}`)
/// so artifact ids do not explode label cardinality.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ServerMetrics>().cloned();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        let duration = start.elapsed().as_secs_f64();
        let status = response.status().as_u16();
        m.record_request(&method, &path, status, duration);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metrics_start_at_zero() {
        let m = ServerMetrics::new();
        assert_eq!(m.requests(), 0);
        assert_eq!(m.errors(), 0);
        assert_eq!(m.builds(), 0);
    }

    #[test]
    fn errors_counted_separately() {
        let m = ServerMetrics::new();
        m.record_request("GET", "/queue", 200, 0.01);
        m.record_request("GET", "/artifacts/{uuid}/{name}", 404, 0.01);
        assert_eq!(m.requests(), 2);
        assert_eq!(m.errors(), 1);
    }

    #[test]
    fn build_outcomes_and_failure_kinds() {
        let m = ServerMetrics::new();
        m.record_build(BuildOutcomeLabel::Built, None);
        m.record_build(BuildOutcomeLabel::Skipped, None);
        m.record_build(
            BuildOutcomeLabel::Failed,
            Some(BuildErrorKind::DeadlineExceeded),
        );
        assert_eq!(m.builds(), 3);
        assert_eq!(m.builds_with_outcome(BuildOutcomeLabel::Skipped), 1);

        let text = m.gather_and_encode().unwrap();
        assert!(text.contains("artifex_build_failures_total{kind=\"deadline_exceeded\"} 1"));
    }

    #[test]
    fn gauges_are_exported() {
        let m = ServerMetrics::new();
        m.queue_depth().set(3);
        m.cached_artifacts().set(5);
        let text = m.gather_and_encode().unwrap();
        assert!(text.contains("artifex_queue_depth 3"));
        assert!(text.contains("artifex_cached_artifacts 5"));
    }
}
