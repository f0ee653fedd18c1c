//! Rating storage
//!
//! Ratings are owned by an external rating service; the engine only reads
//! them. The in-memory store backs the binary and tests.

use crate::error::{EngineError, Result};
use crate::types::{PlayerId, PlayerRating};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Stored rating with bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingEntry {
    pub player_id: PlayerId,
    pub rating: PlayerRating,
    pub last_updated: DateTime<Utc>,
}

impl RatingEntry {
    pub fn new(player_id: PlayerId, rating: PlayerRating) -> Self {
        Self {
            player_id,
            rating,
            last_updated: Utc::now(),
        }
    }
}

/// Trait for rating storage lookups
pub trait RatingStorage: Send + Sync {
    fn get_rating(&self, player_id: &PlayerId) -> Result<Option<RatingEntry>>;

    fn store_rating(&self, entry: RatingEntry) -> Result<()>;

    /// Ratings for several players; unknown players are left out
    fn get_ratings(&self, player_ids: &[PlayerId]) -> Result<HashMap<PlayerId, RatingEntry>>;
}

/// In-memory rating storage
#[derive(Debug, Default)]
pub struct InMemoryRatingStorage {
    ratings: RwLock<HashMap<PlayerId, RatingEntry>>,
}

impl InMemoryRatingStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RatingStorage for InMemoryRatingStorage {
    fn get_rating(&self, player_id: &PlayerId) -> Result<Option<RatingEntry>> {
        let ratings = self.ratings.read().map_err(|_| EngineError::Internal {
            message: "Failed to acquire ratings read lock".to_string(),
        })?;

        Ok(ratings.get(player_id).cloned())
    }

    fn store_rating(&self, entry: RatingEntry) -> Result<()> {
        let mut ratings = self.ratings.write().map_err(|_| EngineError::Internal {
            message: "Failed to acquire ratings write lock".to_string(),
        })?;

        ratings.insert(entry.player_id.clone(), entry);
        Ok(())
    }

    fn get_ratings(&self, player_ids: &[PlayerId]) -> Result<HashMap<PlayerId, RatingEntry>> {
        let ratings = self.ratings.read().map_err(|_| EngineError::Internal {
            message: "Failed to acquire ratings read lock".to_string(),
        })?;

        Ok(player_ids
            .iter()
            .filter_map(|id| ratings.get(id).map(|entry| (id.clone(), entry.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_lookup() {
        let storage = InMemoryRatingStorage::new();
        let entry = RatingEntry::new(
            "alice".to_string(),
            PlayerRating {
                rating: 1800.0,
                uncertainty: 90.0,
            },
        );
        storage.store_rating(entry).unwrap();

        let found = storage.get_rating(&"alice".to_string()).unwrap().unwrap();
        assert_eq!(found.rating.rating, 1800.0);
        assert!(storage.get_rating(&"bob".to_string()).unwrap().is_none());

        let many = storage
            .get_ratings(&["alice".to_string(), "bob".to_string()])
            .unwrap();
        assert_eq!(many.len(), 1);
    }
}
