//! Pickup Engine - match progression for filled pickup queues
//!
//! Once a queue reaches capacity the engine walks the pending match through
//! an optional readiness check, captain selection, team formation and map
//! vote before publishing the started match. Every transition is persisted
//! so a restarted process can reconcile and resume.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod formation;
pub mod metrics;
pub mod persistence;
pub mod rating;
pub mod service;
pub mod stage;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{EngineError, Result};
pub use types::*;

// Re-export key components
pub use engine::{Outcome, PickupEngine};
pub use events::{EngineEvent, EventPublisher};
pub use persistence::{InMemoryGateway, PersistenceGateway};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
