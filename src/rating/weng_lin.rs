//! Weng-Lin (OpenSkill) backed rating provider
//!
//! Match quality compares composite team ratings pairwise with the
//! skillratings expected score: a 50/50 pairing scores 1.0, a certain
//! outcome scores 0.0.

use crate::config::RatingSettings;
use crate::error::{EngineError, Result};
use crate::rating::provider::RatingProvider;
use crate::rating::storage::RatingStorage;
use crate::types::{PlayerId, PlayerRating};
use async_trait::async_trait;
use skillratings::weng_lin::{WengLinConfig, WengLinRating};
use std::sync::Arc;
use tracing::debug;

/// Rating provider reading stored ratings, with Weng-Lin match quality
pub struct WengLinRatingProvider {
    config: WengLinConfig,
    initial_rating: PlayerRating,
    storage: Arc<dyn RatingStorage>,
}

impl WengLinRatingProvider {
    pub fn new(settings: &RatingSettings, storage: Arc<dyn RatingStorage>) -> Result<Self> {
        if settings.beta <= 0.0 {
            return Err(EngineError::Configuration {
                message: "Beta must be positive".to_string(),
            }
            .into());
        }
        if settings.initial_uncertainty <= 0.0 {
            return Err(EngineError::Configuration {
                message: "Initial uncertainty must be positive".to_string(),
            }
            .into());
        }

        Ok(Self {
            config: WengLinConfig {
                beta: settings.beta,
                uncertainty_tolerance: 0.0001,
            },
            initial_rating: PlayerRating {
                rating: settings.initial_rating,
                uncertainty: settings.initial_uncertainty,
            },
            storage,
        })
    }

    /// Rating used for players without a stored entry
    pub fn default_rating(&self) -> PlayerRating {
        self.initial_rating.clone()
    }

    /// Probability that team `a` beats team `b`
    pub fn win_probability(&self, a: &[PlayerRating], b: &[PlayerRating]) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.5;
        }
        let (expected_a, _expected_b) =
            skillratings::weng_lin::expected_score(&composite(a), &composite(b), &self.config);
        expected_a
    }
}

/// Single rating standing in for a whole team: mean skill, pooled uncertainty
fn composite(team: &[PlayerRating]) -> WengLinRating {
    let count = team.len() as f64;
    let rating = team.iter().map(|r| r.rating).sum::<f64>() / count;
    let variance = team.iter().map(|r| r.uncertainty.powi(2)).sum::<f64>() / count;
    WengLinRating {
        rating,
        uncertainty: variance.sqrt(),
    }
}

#[async_trait]
impl RatingProvider for WengLinRatingProvider {
    async fn rating_of(&self, player_id: &PlayerId) -> Result<PlayerRating> {
        match self.storage.get_rating(player_id)? {
            Some(entry) => Ok(entry.rating),
            None => {
                debug!("No stored rating for {}, using initial rating", player_id);
                Ok(self.default_rating())
            }
        }
    }

    fn match_quality(&self, teams: &[Vec<PlayerRating>]) -> f64 {
        let mut total = 0.0;
        let mut pairs = 0usize;
        for (i, team_a) in teams.iter().enumerate() {
            for team_b in teams.iter().skip(i + 1) {
                let p = self.win_probability(team_a, team_b);
                total += 1.0 - (2.0 * p - 1.0).abs();
                pairs += 1;
            }
        }
        if pairs == 0 {
            return 1.0;
        }
        total / pairs as f64
    }
}
