//! Configuration management for the pickup engine
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values for stage timing and queues.

pub mod app;
pub mod queue;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, RatingSettings, ServiceSettings, StageSettings};
pub use queue::{MapPoolDeclaration, MatchConfig, QueueDeclaration};
