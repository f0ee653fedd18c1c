//! Service layer for the pickup engine
//!
//! Application state, component wiring and health checks for the
//! long-running service binary.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
