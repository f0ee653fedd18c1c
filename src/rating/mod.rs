//! Rating integration using the Weng-Lin (OpenSkill) algorithm
//!
//! The engine consumes ratings and a match-quality score; it never computes
//! rating updates.

pub mod provider;
pub mod storage;
pub mod weng_lin;

// Re-export commonly used types
pub use provider::RatingProvider;
pub use storage::{InMemoryRatingStorage, RatingEntry, RatingStorage};
pub use weng_lin::WengLinRatingProvider;
