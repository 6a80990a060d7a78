//! HTTP server for health probes and Prometheus scraping

use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub context: Option<Arc<HealthContext>>,
}

pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                context: None,
            },
            shutdown_tx,
        }
    }

    pub fn with_context(mut self, context: Arc<HealthContext>) -> Self {
        self.state.context = Some(context);
        self
    }

    /// Serve until [`HealthServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;
        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    pub fn stop(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Health server was not running when stopped: {}", e);
        }
    }
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "unhealthy",
            "service": "ladder-room",
            "version": env!("CARGO_PKG_VERSION"),
            "error": "Service not initialized"
        })),
    )
        .into_response()
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "ladder-room",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/stats"]
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Health check requested");
    let Some(context) = &state.context else {
        return not_initialized();
    };

    let status = HealthCheck::liveness_check(context).await;
    (
        status_code(status),
        Json(json!({
            "status": status,
            "service": context.service_name,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

async fn ready_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Readiness check requested");
    let Some(context) = &state.context else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized").into_response();
    };

    match HealthCheck::readiness_check(context).await {
        HealthStatus::Healthy => (StatusCode::OK, "Ready").into_response(),
        HealthStatus::Degraded => (StatusCode::OK, "Degraded but ready").into_response(),
        HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "Not ready").into_response(),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> Response {
    let Some(context) = &state.context else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized").into_response();
    };

    match HealthCheck::liveness_check(context).await {
        HealthStatus::Healthy => (StatusCode::OK, "Alive").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive").into_response(),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(body) => {
            debug!("Serving {} metric families", metric_families.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                body,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

async fn stats_handler(State(state): State<HealthServerState>) -> Response {
    let Some(context) = &state.context else {
        return not_initialized();
    };

    match HealthCheck::check(context).await {
        Ok(health) => (
            status_code(health.status),
            Json(json!({
                "service": {
                    "name": health.service,
                    "version": health.version,
                    "status": health.status,
                    "uptime_seconds": health.stats.uptime_seconds
                },
                "pool": {
                    "waiting": health.stats.players_waiting,
                    "in_match": health.stats.users_in_match
                },
                "sessions": {
                    "active": health.stats.active_sessions
                },
                "transport": {
                    "in_flight": health.stats.transport_in_flight
                },
                "components": health.checks,
                "timestamp": health.timestamp
            })),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to gather stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Failed to get service stats" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSettings;
    use crate::pool::WaitingPool;
    use crate::session::SessionRegistry;
    use crate::transport::{MockTransport, TransportGate};
    use axum::{body::Body, http::Request};
    use std::time::{Duration, Instant};
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn create_test_context(collector: Arc<MetricsCollector>) -> Arc<HealthContext> {
        let gate = Arc::new(TransportGate::new(
            Arc::new(MockTransport::new()),
            TransportSettings::default(),
            collector.clone(),
        ));
        Arc::new(HealthContext {
            service_name: "ladder-room".to_string(),
            is_running: Arc::new(RwLock::new(true)),
            pool: WaitingPool::new(gate.clone(), collector, Duration::from_secs(60)),
            registry: Arc::new(SessionRegistry::new()),
            gate,
            transport_limit: 5,
            amqp: None,
            started_at: Instant::now(),
        })
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        collector.record_command("request_admission", "ok");
        let app = HealthServer::new(HealthServerConfig::default(), collector).create_router();

        let response = get(app, "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }

    #[tokio::test]
    async fn test_probes_without_context() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let app = HealthServer::new(HealthServerConfig::default(), collector).create_router();

        for uri in ["/health", "/ready", "/alive", "/stats"] {
            let response = get(app.clone(), uri).await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        }
        assert_eq!(get(app, "/nonexistent").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_probes_with_running_service() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let context = create_test_context(collector.clone());
        let app = HealthServer::new(HealthServerConfig::default(), collector)
            .with_context(context.clone())
            .create_router();

        for uri in ["/", "/health", "/ready", "/alive", "/stats"] {
            assert_eq!(get(app.clone(), uri).await.status(), StatusCode::OK, "{}", uri);
        }

        *context.is_running.write().await = false;
        assert_eq!(
            get(app, "/alive").await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
