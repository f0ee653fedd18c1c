//! Health checks for the pickup engine service
//!
//! Liveness only needs the driver to be running. Readiness and the full
//! check also probe the persistence gateway and report engine statistics.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `pickup_health_status`
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: &HealthStatus) -> HealthStatus {
        match (&self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Engine statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub pending_matches: usize,
    pub pending_by_stage: BTreeMap<String, usize>,
    pub scheduled_timers: usize,
    pub queues: usize,
    pub uptime_info: String,
}

impl HealthCheck {
    /// Run every component check and gather engine statistics
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();

        checks.push(Self::check_driver(&app_state).await);
        checks.push(Self::check_gateway(&app_state).await);
        checks.push(Self::check_timers(&app_state).await);

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(&check.status));
        let stats = Self::gather_service_stats(&app_state).await;

        app_state.metrics().update_health_status(status.as_gauge());

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Liveness: the engine driver is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness: running and the gateway answers
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(Self::check_gateway(&app_state).await.status)
    }

    async fn check_driver(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();
        let running = app_state.is_running().await;
        ComponentCheck {
            name: "engine_driver".to_string(),
            status: if running {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            message: (!running).then(|| "Engine driver is not running".to_string()),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_gateway(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();
        let (status, message) = match app_state.engine().context().gateway.pending_matches().await {
            Ok(pending) => {
                debug!("Gateway probe returned {} pending matches", pending.len());
                (HealthStatus::Healthy, None)
            }
            Err(e) => {
                error!("Gateway probe failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        ComponentCheck {
            name: "persistence_gateway".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Pending matches without a scheduled timer can only move on adapter input
    async fn check_timers(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();
        let stats = app_state.engine().stats().await;
        let idle = stats.pending_matches.saturating_sub(stats.scheduled_timers);
        let (status, message) = if idle == 0 {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some(format!("{} pending matches have no scheduled tick", idle)),
            )
        };

        ComponentCheck {
            name: "timer_queue".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let stats = app_state.engine().stats().await;
        let uptime = app_state.uptime();

        ServiceStats {
            pending_matches: stats.pending_matches,
            pending_by_stage: stats.by_stage,
            scheduled_timers: stats.scheduled_timers,
            queues: app_state.config().queues.len(),
            uptime_info: format!(
                "{}h {}m {}s",
                uptime.as_secs() / 3600,
                (uptime.as_secs() % 3600) / 60,
                uptime.as_secs() % 60
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status_wins() {
        let status = HealthStatus::Healthy.worst(&HealthStatus::Degraded);
        assert_eq!(status, HealthStatus::Degraded);
        assert_eq!(
            status.worst(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
    }
}
