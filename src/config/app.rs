//! Main application configuration
//!
//! This module defines the primary configuration structures for the pickup
//! engine service, including environment variable and TOML file loading and
//! validation.

use crate::config::queue::{MapPoolDeclaration, QueueDeclaration};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub stages: StageSettings,
    #[serde(default)]
    pub rating: RatingSettings,
    /// Queues seeded into the in-memory gateway at startup
    #[serde(default)]
    pub queues: Vec<QueueDeclaration>,
    #[serde(default)]
    pub map_pools: Vec<MapPoolDeclaration>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check endpoint
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Stage timing and sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Cadence of stage ticks
    pub iteration_time_ms: u64,
    /// Participants inactive for longer than this fail the readiness check
    pub afk_time_seconds: u64,
    pub afk_check_iterations: u32,
    pub captain_selection_iterations: u32,
    /// Ticks a captain may take for one pick
    pub picking_iterations: u32,
    pub mapvote_iterations: u32,
    /// Maps offered per vote
    pub map_candidates: usize,
    /// Most recently played maps left out of the vote
    pub recent_map_exclusion: usize,
    /// Ticks between two tally renders
    pub vote_render_debounce_ticks: u32,
}

/// Rating provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingSettings {
    pub initial_rating: f64,
    pub initial_uncertainty: f64,
    pub beta: f64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "pickup-engine".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            iteration_time_ms: 10_000,
            afk_time_seconds: 600,
            afk_check_iterations: 6,
            captain_selection_iterations: 6,
            picking_iterations: 6,
            mapvote_iterations: 6,
            map_candidates: 3,
            recent_map_exclusion: 3,
            vote_render_debounce_ticks: 1,
        }
    }
}

impl Default for RatingSettings {
    fn default() -> Self {
        Self {
            initial_rating: 1500.0,
            initial_uncertainty: 200.0,
            beta: 200.0,
        }
    }
}

impl StageSettings {
    /// Get tick cadence as Duration
    pub fn iteration_time(&self) -> Duration {
        Duration::from_millis(self.iteration_time_ms)
    }

    /// Get the readiness staleness window
    pub fn afk_time(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.afk_time_seconds as i64)
    }

    /// Remaining time in a stage given its iteration budget
    pub fn time_left(&self, max_iterations: u32, elapsed_iterations: u32) -> Duration {
        self.iteration_time() * max_iterations.saturating_sub(elapsed_iterations)
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still override it
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HEALTH_PORT") {
            self.service.health_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HEALTH_PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Stage settings
        if let Ok(value) = env::var("ITERATION_TIME_MS") {
            self.stages.iteration_time_ms = value
                .parse()
                .map_err(|_| anyhow!("Invalid ITERATION_TIME_MS value: {}", value))?;
        }
        if let Ok(value) = env::var("AFK_TIME_SECONDS") {
            self.stages.afk_time_seconds = value
                .parse()
                .map_err(|_| anyhow!("Invalid AFK_TIME_SECONDS value: {}", value))?;
        }
        if let Ok(value) = env::var("AFK_CHECK_ITERATIONS") {
            self.stages.afk_check_iterations = value
                .parse()
                .map_err(|_| anyhow!("Invalid AFK_CHECK_ITERATIONS value: {}", value))?;
        }
        if let Ok(value) = env::var("CAPTAIN_SELECTION_ITERATIONS") {
            self.stages.captain_selection_iterations = value
                .parse()
                .map_err(|_| anyhow!("Invalid CAPTAIN_SELECTION_ITERATIONS value: {}", value))?;
        }
        if let Ok(value) = env::var("PICKING_ITERATIONS") {
            self.stages.picking_iterations = value
                .parse()
                .map_err(|_| anyhow!("Invalid PICKING_ITERATIONS value: {}", value))?;
        }
        if let Ok(value) = env::var("MAPVOTE_ITERATIONS") {
            self.stages.mapvote_iterations = value
                .parse()
                .map_err(|_| anyhow!("Invalid MAPVOTE_ITERATIONS value: {}", value))?;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    // Validate stage settings
    let stages = &config.stages;
    if stages.iteration_time_ms == 0 {
        return Err(anyhow!("Iteration time must be greater than 0"));
    }
    if stages.afk_check_iterations == 0
        || stages.captain_selection_iterations == 0
        || stages.picking_iterations == 0
        || stages.mapvote_iterations == 0
    {
        return Err(anyhow!("Stage iteration budgets must be greater than 0"));
    }
    if stages.map_candidates == 0 {
        return Err(anyhow!("Map vote needs at least one candidate"));
    }
    if stages.vote_render_debounce_ticks == 0 {
        return Err(anyhow!("Vote render debounce must be at least one tick"));
    }

    if config.rating.initial_uncertainty <= 0.0 || config.rating.beta <= 0.0 {
        return Err(anyhow!("Rating uncertainty and beta must be positive"));
    }

    for declaration in &config.queues {
        declaration.config.validate()?;
    }

    Ok(())
}
