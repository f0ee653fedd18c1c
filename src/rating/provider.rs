//! Rating provider contract

use crate::error::Result;
use crate::types::{PlayerId, PlayerRating};
use async_trait::async_trait;

/// Supplies skill ratings and a descriptive match-quality score
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingProvider: Send + Sync {
    /// Current rating of a participant
    async fn rating_of(&self, player_id: &PlayerId) -> Result<PlayerRating>;

    /// Quality of a team split in `[0, 1]`, 1 being an even match
    fn match_quality(&self, teams: &[Vec<PlayerRating>]) -> f64;
}
