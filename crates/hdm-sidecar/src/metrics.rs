//! Prometheus metrics + liveness HTTP endpoints
//!
//! Endpoints:
//!   GET <Metrics.Path>  (default /metrics) Prometheus text format
//!   GET /healthz        liveness probe, 200 while the process runs

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::net::SocketAddr;
use std::sync::Arc;

type Labels = Vec<(String, String)>;

/// Per-tenant outcome counters.
#[derive(Clone, Debug, Default)]
pub struct SidecarMetrics {
    handled: Family<Labels, Counter>,
    failed: Family<Labels, Counter>,
}

impl SidecarMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "heap_dump_service_handled_heap_dumps",
            "Number of handled heap dumps",
            metrics.handled.clone(),
        );
        registry.register(
            "heap_dump_service_failed_heap_dumps",
            "Number of failed heap dumps",
            metrics.failed.clone(),
        );
        metrics
    }

    fn labels(tenant: &str) -> Labels {
        vec![("tenant".to_string(), tenant.to_string())]
    }

    pub fn record_handled(&self, tenant: &str) {
        self.handled.get_or_create(&Self::labels(tenant)).inc();
    }

    pub fn record_failed(&self, tenant: &str) {
        self.failed.get_or_create(&Self::labels(tenant)).inc();
    }

    pub fn handled(&self, tenant: &str) -> u64 {
        self.handled.get_or_create(&Self::labels(tenant)).get()
    }

    pub fn failed(&self, tenant: &str) -> u64 {
        self.failed.get_or_create(&Self::labels(tenant)).get()
    }
}

/// Router exposing `registry` at `path` plus `/healthz`.
pub fn router(path: &str, registry: Arc<Registry>) -> Router {
    let mut app = Router::new().route(path, get(metrics_handler));
    if path != "/healthz" {
        app = app.route("/healthz", get(healthz_handler));
    }
    app.with_state(registry)
}

/// Serve until the listener fails.
pub async fn serve(addr: SocketAddr, path: String, registry: Arc<Registry>) -> Result<()> {
    let app = router(&path, registry);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(caller = "serve_metrics", addr = %addr, path = %path, "serving metrics");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_counters_exposed_per_tenant() {
        let mut registry = Registry::default();
        let metrics = SidecarMetrics::register(&mut registry);
        metrics.record_handled("cloud-beacon");
        metrics.record_handled("cloud-beacon");
        metrics.record_failed("other");

        let (status, body) = get_body(router("/metrics", Arc::new(registry)), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            body.contains("heap_dump_service_handled_heap_dumps_total{tenant=\"cloud-beacon\"} 2"),
            "{body}"
        );
        assert!(
            body.contains("heap_dump_service_failed_heap_dumps_total{tenant=\"other\"} 1"),
            "{body}"
        );
    }

    #[tokio::test]
    async fn test_custom_path_and_healthz() {
        let registry = Arc::new(Registry::default());
        let app = router("/prom", registry);

        let (status, _) = get_body(app.clone(), "/prom").await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = get_body(app.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        let (status, _) = get_body(app, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_counter_accessors() {
        let metrics = SidecarMetrics::default();
        assert_eq!(metrics.handled("t"), 0);
        metrics.record_failed("t");
        assert_eq!(metrics.failed("t"), 1);
        assert_eq!(metrics.handled("t"), 0);
    }
}
