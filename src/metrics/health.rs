//! Health check endpoints and Prometheus metrics server
//!
//! Axum server exposing liveness, readiness, Prometheus metrics and a JSON
//! summary of pending matches.

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "pickup-engine";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Typically "0.0.0.0" for all interfaces
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

/// State handed to every monitoring handler
#[derive(Clone)]
pub struct MonitorState {
    pub collector: Arc<MetricsCollector>,
    pub app_state: Option<Arc<AppState>>,
}

/// HTTP server for liveness, readiness, metrics and pending-match inspection
pub struct HealthServer {
    config: HealthServerConfig,
    state: MonitorState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state: MonitorState {
                collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Bind and serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid monitoring address {}:{}",
                    self.config.host, self.config.port
                )
            })?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind monitoring server to {}", addr))?;
        info!("Monitoring endpoints available on http://{}", addr);

        let mut stop_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.create_router())
            .with_graceful_shutdown(async move {
                if stop_rx.recv().await.is_err() {
                    debug!("Monitoring server stop channel closed");
                }
            })
            .await?;

        info!("Monitoring server on {} stopped", addr);
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .route("/pending", get(pending_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Monitoring server was not running");
        }
        Ok(())
    }
}

fn not_initialized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "service": SERVICE_NAME,
            "status": HealthStatus::Unhealthy,
            "error": "engine not initialized"
        })),
    )
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": crate::VERSION,
        "endpoints": ["/health", "/ready", "/metrics", "/stats", "/pending"]
    }))
}

async fn health_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    let status = match HealthCheck::liveness_check(app_state.clone()).await {
        Ok(status) => status,
        Err(e) => {
            warn!("Liveness check failed: {:#}", e);
            HealthStatus::Unhealthy
        }
    };
    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        code,
        Json(json!({
            "service": SERVICE_NAME,
            "status": status,
            "version": crate::VERSION
        })),
    )
}

/// Ready once the driver runs; reports the pending load alongside
async fn ready_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    let status = match HealthCheck::readiness_check(app_state.clone()).await {
        Ok(status) => status,
        Err(e) => {
            error!("Readiness check failed: {:#}", e);
            HealthStatus::Unhealthy
        }
    };
    let stats = app_state.engine().stats().await;
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (
        code,
        Json(json!({
            "service": SERVICE_NAME,
            "status": status,
            "pending_matches": stats.pending_matches,
            "scheduled_timers": stats.scheduled_timers
        })),
    )
}

async fn metrics_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    match state.collector.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            error!("Prometheus encoding failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                "metrics unavailable".to_string(),
            )
        }
    }
}

/// Component checks plus pending-match counts, for humans
async fn stats_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    match HealthCheck::check(app_state.clone()).await {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": health.service,
                    "version": health.version,
                    "status": health.status,
                    "uptime": health.stats.uptime_info
                },
                "pending_matches": {
                    "total": health.stats.pending_matches,
                    "by_stage": health.stats.pending_by_stage,
                    "scheduled_timers": health.stats.scheduled_timers
                },
                "queues": health.stats.queues,
                "components": health.checks,
                "timestamp": health.timestamp
            })),
        ),
        Err(e) => {
            error!("Health summary failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "service": SERVICE_NAME,
                    "error": format!("{:#}", e)
                })),
            )
        }
    }
}

/// Every pending match the engine tracks, with its stage
async fn pending_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return not_initialized();
    };

    let engine = app_state.engine();
    let mut pending = Vec::new();
    for key in engine.pending_keys().await {
        if let Some(stage) = engine.stage_of(key).await {
            pending.push(json!({
                "guild_id": key.guild_id,
                "config_id": key.config_id,
                "stage": stage.as_str(),
                "timer_scheduled": engine.is_scheduled(key)
            }));
        }
    }
    (StatusCode::OK, Json(json!({ "pending": pending })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn server() -> HealthServer {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        HealthServer::new(HealthServerConfig::default(), collector)
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = server();
        server.state.collector.record_match_started("random");
        let app = server.create_router();

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }

    #[tokio::test]
    async fn test_endpoints_without_app_state() {
        let app = server().create_router();

        for uri in ["/health", "/ready", "/stats", "/pending"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_ready_requires_running_driver() {
        let app_state = Arc::new(AppState::new(AppConfig::default(), Some(3)).await.unwrap());
        let app = HealthServer::new(HealthServerConfig::default(), app_state.metrics())
            .with_app_state(app_state.clone())
            .create_router();

        // Not started yet
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        for uri in ["/stats", "/pending"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_404_handling() {
        let app = server().create_router();
        let response = app
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
