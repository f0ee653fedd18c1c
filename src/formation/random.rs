//! Random team formation

use super::{check_even_split, name_teams, TeamFormer};
use crate::error::{EngineError, Result};
use crate::types::{Participant, PlayerId, Team};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Mutex;

/// Shuffles participants and cuts the list into equal slices
#[derive(Debug)]
pub struct RandomFormer {
    rng: Mutex<StdRng>,
}

impl RandomFormer {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic former for tests and replays
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomFormer {
    fn default() -> Self {
        Self::new()
    }
}

impl TeamFormer for RandomFormer {
    fn form_teams(
        &self,
        participants: &[Participant],
        team_count: usize,
        _rating_cap: Option<f64>,
    ) -> Result<Vec<Team>> {
        let team_size = check_even_split(participants.len(), team_count)?;

        let mut ids: Vec<PlayerId> = participants.iter().map(|p| p.id.clone()).collect();
        {
            let mut rng = self.rng.lock().map_err(|_| EngineError::Internal {
                message: "Random former rng lock poisoned".to_string(),
            })?;
            ids.shuffle(&mut *rng);
        }

        let groups = ids.chunks(team_size).map(|chunk| chunk.to_vec()).collect();
        Ok(name_teams(groups))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formation::test_support::participants_with_ratings;

    #[test]
    fn test_same_seed_same_teams() {
        let participants = participants_with_ratings(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let first = RandomFormer::seeded(7).form_teams(&participants, 2, None).unwrap();
        let second = RandomFormer::seeded(7).form_teams(&participants, 2, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].name, "A");
        assert_eq!(first[1].name, "B");
    }

    #[test]
    fn test_three_teams() {
        let participants = participants_with_ratings(&[1.0; 9]);
        let teams = RandomFormer::new().form_teams(&participants, 3, None).unwrap();
        assert_eq!(teams.len(), 3);
        assert!(teams.iter().all(|t| t.members.len() == 3 && t.captain.is_none()));
    }
}
