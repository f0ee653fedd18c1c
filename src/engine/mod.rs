//! Pickup progression engine
//!
//! This module coordinates pending matches: the adapter-facing entry points,
//! stage transitions, the timer queue, reconciliation with persisted state
//! and the abort coordinator.

pub mod abort;
pub mod activity;
pub mod manager;
pub mod registry;
pub mod scheduler;

pub use activity::ActivityTracker;
pub use manager::{EngineStats, Outcome, PickupEngine, ReconcileReport};
pub use registry::{PendingMatchRegistry, RegistryEntry};
pub use scheduler::{Timer, TimerQueue};
