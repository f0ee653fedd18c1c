//! Skill-balanced team formation
//!
//! Two-team queues of up to ten participants get the exact minimum skill
//! difference split. Larger queues use a greedy round-robin that pairs the
//! strongest and weakest remaining participants.

use super::{check_even_split, name_teams, TeamFormer};
use crate::error::Result;
use crate::types::{Participant, PlayerId, Team};
use crate::utils::effective_rating;
use std::collections::VecDeque;
use tracing::debug;

/// Largest participant count searched exhaustively
pub const EXHAUSTIVE_LIMIT: usize = 10;

/// Minimum skill difference team former
#[derive(Debug, Default, Clone)]
pub struct SkillBalancedFormer;

impl SkillBalancedFormer {
    pub fn new() -> Self {
        Self
    }
}

impl TeamFormer for SkillBalancedFormer {
    fn form_teams(
        &self,
        participants: &[Participant],
        team_count: usize,
        rating_cap: Option<f64>,
    ) -> Result<Vec<Team>> {
        let team_size = check_even_split(participants.len(), team_count)?;

        let mut ranked: Vec<(PlayerId, f64)> = participants
            .iter()
            .map(|p| (p.id.clone(), effective_rating(p, rating_cap)))
            .collect();
        // Stable sort keeps queue order between equal ratings
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        if team_count == 2 {
            let ratings: Vec<f64> = ranked.iter().map(|(_, r)| *r).collect();
            if let Some(team_a) = exhaustive_bipartition(&ratings) {
                let mut groups = vec![Vec::with_capacity(team_size), Vec::with_capacity(team_size)];
                for (index, (id, _)) in ranked.into_iter().enumerate() {
                    let slot = if team_a.contains(&index) { 0 } else { 1 };
                    groups[slot].push(id);
                }
                return Ok(name_teams(groups));
            }
        }

        debug!(
            "Using greedy balancing for {} participants in {} teams",
            participants.len(),
            team_count
        );
        Ok(name_teams(greedy_round_robin(ranked, team_count, team_size)))
    }

    fn name(&self) -> &'static str {
        "skill_based"
    }
}

/// Exact minimum-difference split of an even-sized rating list into two halves
///
/// Returns the indices of the first team, or `None` when the list is empty,
/// odd-sized, or larger than [`EXHAUSTIVE_LIMIT`]. Ties keep the first
/// partition found, searching "include" before "exclude" for each index.
pub fn exhaustive_bipartition(ratings: &[f64]) -> Option<Vec<usize>> {
    if ratings.is_empty() || ratings.len() % 2 != 0 || ratings.len() > EXHAUSTIVE_LIMIT {
        return None;
    }

    let total: f64 = ratings.iter().sum();
    let half = ratings.len() / 2;
    let mut best: Option<(f64, Vec<usize>)> = None;
    let mut chosen = Vec::with_capacity(half);
    search_partitions(ratings, 0, 0.0, half, total, &mut chosen, &mut best);
    best.map(|(_, indices)| indices)
}

fn search_partitions(
    ratings: &[f64],
    index: usize,
    sum: f64,
    half: usize,
    total: f64,
    chosen: &mut Vec<usize>,
    best: &mut Option<(f64, Vec<usize>)>,
) {
    if chosen.len() == half {
        let difference = (total - 2.0 * sum).abs();
        let improves = match best {
            Some((best_difference, _)) => difference < *best_difference,
            None => true,
        };
        if improves {
            *best = Some((difference, chosen.clone()));
        }
        return;
    }

    // Not enough indices left to fill the half
    if ratings.len() - index < half - chosen.len() {
        return;
    }

    chosen.push(index);
    search_partitions(ratings, index + 1, sum + ratings[index], half, total, chosen, best);
    chosen.pop();
    search_partitions(ratings, index + 1, sum, half, total, chosen, best);
}

/// Rotate through teams giving each the strongest remaining participant, plus
/// the weakest one while the team still has two or more open slots
fn greedy_round_robin(
    ranked: Vec<(PlayerId, f64)>,
    team_count: usize,
    team_size: usize,
) -> Vec<Vec<PlayerId>> {
    let mut remaining: VecDeque<PlayerId> = ranked.into_iter().map(|(id, _)| id).collect();
    let mut groups: Vec<Vec<PlayerId>> = vec![Vec::with_capacity(team_size); team_count];
    let mut turn = 0;

    while !remaining.is_empty() {
        let group = &mut groups[turn];
        let open = team_size - group.len();
        if open > 0 {
            if let Some(strongest) = remaining.pop_front() {
                group.push(strongest);
            }
            if open >= 2 {
                if let Some(weakest) = remaining.pop_back() {
                    group.push(weakest);
                }
            }
        }
        turn = (turn + 1) % team_count;
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formation::test_support::participants_with_ratings;

    fn team_sum(team: &Team, participants: &[Participant]) -> f64 {
        team.members
            .iter()
            .map(|id| participants.iter().find(|p| &p.id == id).unwrap().rating.rating)
            .sum()
    }

    /// Every equal-size split difference, by bitmask
    fn all_split_differences(ratings: &[f64]) -> Vec<f64> {
        let n = ratings.len();
        let total: f64 = ratings.iter().sum();
        (0u32..(1 << n))
            .filter(|mask| mask.count_ones() as usize == n / 2)
            .map(|mask| {
                let sum: f64 = (0..n).filter(|i| mask & (1 << i) != 0).map(|i| ratings[i]).sum();
                (total - 2.0 * sum).abs()
            })
            .collect()
    }

    #[test]
    fn test_exhaustive_split_is_minimal() {
        let ratings = [50.0, 40.0, 30.0, 20.0, 10.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let participants = participants_with_ratings(&ratings);
        let teams = SkillBalancedFormer::new()
            .form_teams(&participants, 2, None)
            .unwrap();

        let difference = (team_sum(&teams[0], &participants) - team_sum(&teams[1], &participants)).abs();
        let best = all_split_differences(&ratings)
            .into_iter()
            .fold(f64::INFINITY, f64::min);
        assert_eq!(difference, best);
        assert_eq!(teams[0].members.len(), 5);
        assert_eq!(teams[1].members.len(), 5);
    }

    #[test]
    fn test_exhaustive_size_guard() {
        assert!(exhaustive_bipartition(&[1.0; 12]).is_none());
        assert!(exhaustive_bipartition(&[1.0; 3]).is_none());
        assert!(exhaustive_bipartition(&[]).is_none());
        assert_eq!(exhaustive_bipartition(&[3.0, 1.0]), Some(vec![0]));
    }

    #[test]
    fn test_first_found_tie_break() {
        // All splits tie, the first found puts the first two indices together
        assert_eq!(exhaustive_bipartition(&[1.0; 4]), Some(vec![0, 1]));
    }

    #[test]
    fn test_eight_player_split() {
        let ratings = [1800.0, 1700.0, 1600.0, 1500.0, 1400.0, 1300.0, 1200.0, 1100.0];
        let participants = participants_with_ratings(&ratings);
        let teams = SkillBalancedFormer::new()
            .form_teams(&participants, 2, None)
            .unwrap();
        assert_eq!(team_sum(&teams[0], &participants), team_sum(&teams[1], &participants));
    }

    #[test]
    fn test_rating_cap_changes_split() {
        let ratings = [3000.0, 1500.0, 1500.0, 1400.0];
        let participants = participants_with_ratings(&ratings);
        let former = SkillBalancedFormer::new();

        let uncapped = former.form_teams(&participants, 2, None).unwrap();
        assert_eq!(uncapped[0].members, vec!["p0".to_string(), "p3".to_string()]);

        let capped = former.form_teams(&participants, 2, Some(1500.0)).unwrap();
        assert_eq!(capped[0].members, vec!["p0".to_string(), "p1".to_string()]);
    }

    #[test]
    fn test_greedy_pairs_strong_with_weak() {
        let ratings: Vec<f64> = (0..12).map(|i| 2000.0 - i as f64 * 100.0).collect();
        let participants = participants_with_ratings(&ratings);
        let teams = SkillBalancedFormer::new()
            .form_teams(&participants, 3, None)
            .unwrap();

        assert_eq!(teams[0].members[..2], ["p0".to_string(), "p11".to_string()]);
        assert_eq!(teams[1].members[..2], ["p1".to_string(), "p10".to_string()]);
        let sums: Vec<f64> = teams.iter().map(|t| team_sum(t, &participants)).collect();
        let spread = sums.iter().cloned().fold(f64::MIN, f64::max)
            - sums.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread <= 300.0);
    }
}
