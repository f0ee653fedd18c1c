//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the pickup engine: stage
//! transitions, started and aborted matches, persistence failures and the
//! number of pending matches in flight.

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the pickup engine
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Match progression metrics
    engine_metrics: EngineMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,
}

/// Match progression metrics
#[derive(Clone)]
pub struct EngineMetrics {
    pub matches_started_total: IntCounterVec,
    pub matches_aborted_total: IntCounterVec,
    pub stage_entered_total: IntCounterVec,
    pub persistence_failures_total: IntCounter,
    pub pending_matches: IntGauge,
    /// Time spent handling engine operations
    pub operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let engine_metrics = EngineMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            engine_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn engine(&self) -> &EngineMetrics {
        &self.engine_metrics
    }

    pub fn record_stage_entered(&self, stage: &str) {
        self.engine_metrics
            .stage_entered_total
            .with_label_values(&[stage])
            .inc();
    }

    pub fn record_match_started(&self, pick_mode: &str) {
        self.engine_metrics
            .matches_started_total
            .with_label_values(&[pick_mode])
            .inc();
    }

    pub fn record_match_aborted(&self, reason: &str) {
        self.engine_metrics
            .matches_aborted_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_persistence_failure(&self) {
        self.engine_metrics.persistence_failures_total.inc();
    }

    pub fn set_pending_matches(&self, count: usize) {
        self.engine_metrics.pending_matches.set(count as i64);
    }

    /// Record how long an engine operation took
    pub fn record_operation(&self, operation: &str, duration: Duration) {
        self.engine_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("pickup_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "pickup_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
        })
    }
}

impl EngineMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_started_total = IntCounterVec::new(
            Opts::new("pickup_matches_started_total", "Total matches started"),
            &["pick_mode"],
        )?;
        registry.register(Box::new(matches_started_total.clone()))?;

        let matches_aborted_total = IntCounterVec::new(
            Opts::new("pickup_matches_aborted_total", "Total pending matches unwound"),
            &["reason"],
        )?;
        registry.register(Box::new(matches_aborted_total.clone()))?;

        let stage_entered_total = IntCounterVec::new(
            Opts::new("pickup_stage_entered_total", "Total stage entries"),
            &["stage"],
        )?;
        registry.register(Box::new(stage_entered_total.clone()))?;

        let persistence_failures_total = IntCounter::new(
            "pickup_persistence_failures_total",
            "Pending matches force-cleared after a persistence failure",
        )?;
        registry.register(Box::new(persistence_failures_total.clone()))?;

        let pending_matches =
            IntGauge::new("pickup_pending_matches", "Pending matches currently in flight")?;
        registry.register(Box::new(pending_matches.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "pickup_operation_duration_seconds",
                "Engine operation duration in seconds",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            matches_started_total,
            matches_aborted_total,
            stage_entered_total,
            persistence_failures_total,
            pending_matches,
            operation_duration,
        })
    }
}
