//! Captain draft
//!
//! Captains pick in rotating order, skipping teams that are already full.
//! The first pick of a draft and the pick for the last undrafted participant
//! draw one player, every other turn draws two unless the picking team has a
//! single open slot left. Forced picks (one participant left, or one team
//! left with open slots) are assigned automatically.

use crate::error::{EngineError, Result};
use crate::types::{Participant, PlayerId, Team};
use crate::utils::{effective_rating, team_name};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Size of the pick to make when `left` participants are still undrafted
///
/// Replays the draft from its first pick (every team holding only its
/// captain) until the number of undrafted participants matches `left`.
pub fn calculate_left_picks(left: usize, team_count: usize, capacity: usize) -> usize {
    if left <= 1 || team_count == 0 {
        return 1;
    }

    let team_size = capacity / team_count;
    let mut fill = vec![1usize; team_count];
    let mut remaining = capacity.saturating_sub(team_count);
    let mut turn = 0;
    let mut first = true;

    while remaining > 0 {
        let size = pick_size(first, remaining, team_size.saturating_sub(fill[turn]));
        if remaining == left {
            return size;
        }
        fill[turn] += size;
        remaining -= size;
        first = false;
        match next_open_team(&fill, team_size, turn) {
            Some(next) => turn = next,
            None => break,
        }
    }

    // Not a count the standard sequence passes through
    left.min(2)
}

fn pick_size(first: bool, remaining: usize, open: usize) -> usize {
    if first || remaining == 1 {
        1
    } else {
        2.min(open).min(remaining).max(1)
    }
}

/// Next team after `current` in rotation that still has open slots
fn next_open_team(fill: &[usize], team_size: usize, current: usize) -> Option<usize> {
    let count = fill.len();
    (1..=count)
        .map(|offset| (current + offset) % count)
        .find(|&index| fill[index] < team_size)
}

/// One completed draft turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPick {
    pub captain: PlayerId,
    pub players: Vec<PlayerId>,
    /// Assigned by the engine rather than chosen by the captain
    pub automatic: bool,
}

/// Live state of a captain draft
#[derive(Debug, Clone)]
pub struct DraftSession {
    capacity: usize,
    team_size: usize,
    teams: Vec<Team>,
    undrafted: Vec<PlayerId>,
    turn: usize,
    turn_started_iteration: u32,
    picks: Vec<DraftPick>,
}

impl DraftSession {
    /// Start a draft with one team per captain, in draft order
    pub fn new(captains: &[PlayerId], participants: &[Participant], iteration: u32) -> Result<Self> {
        let team_count = captains.len();
        if team_count == 0 || participants.len() % team_count != 0 {
            return Err(EngineError::Internal {
                message: format!(
                    "Cannot draft {} participants with {} captains",
                    participants.len(),
                    team_count
                ),
            }
            .into());
        }
        for captain in captains {
            if !participants.iter().any(|p| &p.id == captain) {
                return Err(EngineError::Internal {
                    message: format!("Captain {} is not a participant", captain),
                }
                .into());
            }
        }

        let teams = captains
            .iter()
            .enumerate()
            .map(|(index, captain)| Team::with_captain(team_name(index), captain.clone()))
            .collect();
        let undrafted = participants
            .iter()
            .filter(|p| !captains.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();

        let mut session = Self {
            capacity: participants.len(),
            team_size: participants.len() / team_count,
            teams,
            undrafted,
            turn: 0,
            turn_started_iteration: iteration,
            picks: Vec::new(),
        };
        session.settle_forced_picks(iteration);
        Ok(session)
    }

    pub fn is_complete(&self) -> bool {
        self.undrafted.is_empty()
    }

    /// Captain whose turn it is, `None` once the draft is complete
    pub fn current_captain(&self) -> Option<&PlayerId> {
        if self.is_complete() {
            return None;
        }
        self.teams.get(self.turn).and_then(|team| team.captain.as_ref())
    }

    /// Number of players the current captain must pick
    pub fn pick_size(&self) -> usize {
        let open = self.open_slots(self.turn);
        calculate_left_picks(self.undrafted.len(), self.teams.len(), self.capacity)
            .min(open)
            .min(self.undrafted.len())
    }

    pub fn undrafted(&self) -> &[PlayerId] {
        &self.undrafted
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn picks(&self) -> &[DraftPick] {
        &self.picks
    }

    pub fn turn_started_iteration(&self) -> u32 {
        self.turn_started_iteration
    }

    /// Whether the current captain has used up their picking time
    pub fn turn_expired(&self, iteration: u32, picking_iterations: u32) -> bool {
        !self.is_complete() && iteration.saturating_sub(self.turn_started_iteration) >= picking_iterations
    }

    pub fn into_teams(self) -> Vec<Team> {
        self.teams
    }

    /// Apply a captain's pick; returns every pick recorded as a result,
    /// including forced picks that followed it
    pub fn apply_pick(
        &mut self,
        captain: &str,
        picked: &[PlayerId],
        iteration: u32,
    ) -> Result<Vec<DraftPick>> {
        let current = self
            .current_captain()
            .ok_or_else(|| EngineError::validation("Draft is already complete"))?;
        if current != captain {
            return Err(EngineError::validation(format!(
                "It is not {}'s turn to pick",
                captain
            ))
            .into());
        }

        let expected = self.pick_size();
        if picked.len() != expected {
            return Err(EngineError::validation(format!(
                "Expected {} picks, got {}",
                expected,
                picked.len()
            ))
            .into());
        }

        let mut seen = HashSet::new();
        for player in picked {
            if !seen.insert(player) {
                return Err(EngineError::validation(format!("{} was picked twice", player)).into());
            }
            if !self.undrafted.contains(player) {
                return Err(EngineError::validation(format!("{} is not available to pick", player)).into());
            }
        }

        let before = self.picks.len();
        self.assign(picked.to_vec(), false, iteration);
        self.settle_forced_picks(iteration);
        Ok(self.picks[before..].to_vec())
    }

    fn open_slots(&self, team: usize) -> usize {
        self.teams
            .get(team)
            .map(|t| self.team_size.saturating_sub(t.members.len()))
            .unwrap_or(0)
    }

    fn assign(&mut self, players: Vec<PlayerId>, automatic: bool, iteration: u32) {
        let captain = self.teams[self.turn].captain.clone().unwrap_or_default();
        self.undrafted.retain(|p| !players.contains(p));
        self.teams[self.turn].members.extend(players.iter().cloned());
        self.picks.push(DraftPick {
            captain,
            players,
            automatic,
        });

        let fill: Vec<usize> = self.teams.iter().map(|t| t.members.len()).collect();
        if let Some(next) = next_open_team(&fill, self.team_size, self.turn) {
            self.turn = next;
        }
        self.turn_started_iteration = iteration;
    }

    fn settle_forced_picks(&mut self, iteration: u32) {
        while !self.undrafted.is_empty() {
            let open_teams = (0..self.teams.len()).filter(|&t| self.open_slots(t) > 0).count();
            if self.undrafted.len() == 1 {
                let last = self.undrafted.clone();
                self.assign(last, true, iteration);
            } else if open_teams == 1 {
                let rest = self.undrafted.clone();
                self.assign(rest, true, iteration);
            } else {
                break;
            }
        }
    }
}

/// Play a draft out automatically, each captain taking the highest-rated
/// undrafted participants
pub fn auto_draft(
    session: &mut DraftSession,
    participants: &[Participant],
    rating_cap: Option<f64>,
    iteration: u32,
) -> Result<()> {
    while let Some(captain) = session.current_captain().cloned() {
        let mut available: Vec<&Participant> = participants
            .iter()
            .filter(|p| session.undrafted.contains(&p.id))
            .collect();
        available.sort_by(|a, b| {
            effective_rating(b, rating_cap).total_cmp(&effective_rating(a, rating_cap))
        });

        let size = session.pick_size();
        let picked: Vec<PlayerId> = available.iter().take(size).map(|p| p.id.clone()).collect();
        session.apply_pick(&captain, &picked, iteration)?;
    }
    for pick in session.picks.iter_mut() {
        pick.automatic = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formation::test_support::participants_with_ratings;
    use proptest::prelude::*;

    fn ids(names: &[&str]) -> Vec<PlayerId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_five_versus_five_sequence() {
        // 1-2-2-2-1
        assert_eq!(calculate_left_picks(8, 2, 10), 1);
        assert_eq!(calculate_left_picks(7, 2, 10), 2);
        assert_eq!(calculate_left_picks(5, 2, 10), 2);
        assert_eq!(calculate_left_picks(3, 2, 10), 2);
        assert_eq!(calculate_left_picks(1, 2, 10), 1);
    }

    #[test]
    fn test_three_teams_sequence() {
        // A1, B2, C2, A1
        assert_eq!(calculate_left_picks(6, 3, 9), 1);
        assert_eq!(calculate_left_picks(5, 3, 9), 2);
        assert_eq!(calculate_left_picks(3, 3, 9), 2);
        assert_eq!(calculate_left_picks(1, 3, 9), 1);
    }

    proptest! {
        #[test]
        fn prop_first_and_last_picks_are_single(team_count in 2usize..5, team_size in 2usize..7) {
            let capacity = team_count * team_size;
            prop_assert_eq!(calculate_left_picks(capacity - team_count, team_count, capacity), 1);
            prop_assert_eq!(calculate_left_picks(1, team_count, capacity), 1);
        }

        #[test]
        fn prop_auto_draft_fills_even_teams(team_count in 2usize..5, team_size in 2usize..6) {
            let ratings: Vec<f64> = (0..team_count * team_size).map(|i| 1000.0 + i as f64).collect();
            let participants = participants_with_ratings(&ratings);
            let captains: Vec<PlayerId> = participants.iter().take(team_count).map(|p| p.id.clone()).collect();

            let mut session = DraftSession::new(&captains, &participants, 0).unwrap();
            auto_draft(&mut session, &participants, None, 0).unwrap();

            prop_assert!(session.is_complete());
            for team in session.teams() {
                prop_assert_eq!(team.members.len(), team_size);
            }
        }
    }

    #[test]
    fn test_four_player_draft() {
        let participants = participants_with_ratings(&[1500.0; 4]);
        let mut session = DraftSession::new(&ids(&["p0", "p1"]), &participants, 0).unwrap();

        assert_eq!(session.current_captain(), Some(&"p0".to_string()));
        assert_eq!(session.pick_size(), 1);

        let picks = session.apply_pick("p0", &ids(&["p3"]), 1).unwrap();
        assert!(session.is_complete());
        assert_eq!(picks.len(), 2);
        assert!(!picks[0].automatic);
        assert_eq!(picks[1].captain, "p1");
        assert_eq!(picks[1].players, ids(&["p2"]));
        assert!(picks[1].automatic);

        let teams = session.into_teams();
        assert_eq!(teams[0].members, ids(&["p0", "p3"]));
        assert_eq!(teams[1].members, ids(&["p1", "p2"]));
    }

    #[test]
    fn test_invalid_picks_rejected() {
        let participants = participants_with_ratings(&[1500.0; 10]);
        let mut session = DraftSession::new(&ids(&["p0", "p1"]), &participants, 0).unwrap();

        // Wrong captain
        assert!(session.apply_pick("p1", &ids(&["p2"]), 0).is_err());
        // Wrong size
        assert!(session.apply_pick("p0", &ids(&["p2", "p3"]), 0).is_err());
        // Captain is not undrafted
        assert!(session.apply_pick("p0", &ids(&["p1"]), 0).is_err());

        session.apply_pick("p0", &ids(&["p2"]), 0).unwrap();
        // Duplicates
        assert!(session.apply_pick("p1", &ids(&["p3", "p3"]), 0).is_err());
        // Already drafted
        assert!(session.apply_pick("p1", &ids(&["p2", "p3"]), 0).is_err());

        assert_eq!(session.undrafted().len(), 7);
        assert_eq!(session.current_captain(), Some(&"p1".to_string()));
    }

    #[test]
    fn test_turn_expiry() {
        let participants = participants_with_ratings(&[1500.0; 6]);
        let mut session = DraftSession::new(&ids(&["p0", "p1"]), &participants, 2).unwrap();
        assert!(!session.turn_expired(5, 6));
        assert!(session.turn_expired(8, 6));

        session.apply_pick("p0", &ids(&["p2"]), 7).unwrap();
        assert_eq!(session.turn_started_iteration(), 7);
        assert!(!session.turn_expired(8, 6));
    }

    #[test]
    fn test_auto_draft_takes_strongest() {
        let participants = participants_with_ratings(&[1000.0, 1000.0, 1200.0, 1900.0, 1500.0, 1300.0]);
        let mut session = DraftSession::new(&ids(&["p0", "p1"]), &participants, 0).unwrap();
        auto_draft(&mut session, &participants, None, 0).unwrap();

        let teams = session.teams();
        // A takes 1900, B takes 1500 and 1300, A gets the rest
        assert_eq!(teams[0].members, ids(&["p0", "p3", "p2"]));
        assert_eq!(teams[1].members, ids(&["p1", "p4", "p5"]));
        assert!(session.picks().iter().all(|p| p.automatic));
    }
}
