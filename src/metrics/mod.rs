//! Metrics and monitoring for the pickup engine
//!
//! Prometheus collectors for match progression plus the HTTP server that
//! exposes health, readiness and metrics endpoints.

pub mod collector;
pub mod health;

pub use collector::{EngineMetrics, MetricsCollector, MetricsTimer, ServiceMetrics};
pub use health::{HealthServer, HealthServerConfig};
