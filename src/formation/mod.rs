//! Team formation algorithms
//!
//! Pure functions (no I/O) turning a participant set into teams:
//! - `random`: uniform shuffle split
//! - `balanced`: minimum skill difference (exhaustive for small 2-team
//!   queues, greedy round-robin otherwise)
//! - `captains`: captain determination heuristics
//! - `draft`: snake draft pick sizing and the interactive draft session

pub mod balanced;
pub mod captains;
pub mod draft;
pub mod random;

pub use balanced::SkillBalancedFormer;
pub use captains::{determine_captains, CaptainCandidates};
pub use draft::{auto_draft, calculate_left_picks, DraftPick, DraftSession};
pub use random::RandomFormer;

use crate::error::{EngineError, Result};
use crate::types::{Participant, PlayerId, Team};
use crate::utils::team_name;

/// Trait for single-shot team formation strategies
pub trait TeamFormer: Send + Sync {
    /// Split participants into `team_count` teams of equal size
    fn form_teams(
        &self,
        participants: &[Participant],
        team_count: usize,
        rating_cap: Option<f64>,
    ) -> Result<Vec<Team>>;

    /// Strategy name for logging
    fn name(&self) -> &'static str;
}

/// Reject participant sets that cannot be split evenly
pub(crate) fn check_even_split(participants: usize, team_count: usize) -> Result<usize> {
    if team_count == 0 || participants % team_count != 0 {
        return Err(EngineError::Internal {
            message: format!(
                "Cannot split {} participants into {} equal teams",
                participants, team_count
            ),
        }
        .into());
    }
    Ok(participants / team_count)
}

/// Name member groups "A", "B", ... in order
pub(crate) fn name_teams(groups: Vec<Vec<PlayerId>>) -> Vec<Team> {
    groups
        .into_iter()
        .enumerate()
        .map(|(index, members)| Team {
            name: team_name(index),
            captain: None,
            members,
        })
        .collect()
}
