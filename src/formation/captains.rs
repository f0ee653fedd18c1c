//! Captain determination
//!
//! Fills the captain slots left open after captain selection. Passes run in
//! priority order, each skipping participants already chosen:
//! 1. captain-role holders nearest in skill to the last chosen captain
//! 2. most historic plays for this queue
//! 3. uniform random
//!
//! The final draft order is shuffled.

use crate::types::{Participant, PlayerId};
use crate::utils::{effective_rating, rating_difference};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

/// Inputs for captain determination
#[derive(Debug, Clone, Copy)]
pub struct CaptainCandidates<'a> {
    pub participants: &'a [Participant],
    /// Captains gathered by the selection stage, in volunteer order
    pub existing: &'a [PlayerId],
    /// Historic play count per participant for this queue
    pub play_counts: &'a HashMap<PlayerId, u32>,
    pub rating_cap: Option<f64>,
}

/// Pick `team_count` captains and return them in draft order
pub fn determine_captains<R: Rng + ?Sized>(
    candidates: &CaptainCandidates<'_>,
    team_count: usize,
    rng: &mut R,
) -> Vec<PlayerId> {
    let rating_of = |participant: &Participant| effective_rating(participant, candidates.rating_cap);

    let mut captains: Vec<&Participant> = Vec::with_capacity(team_count);
    for id in candidates.existing {
        if captains.len() == team_count {
            break;
        }
        if let Some(p) = candidates.participants.iter().find(|p| &p.id == id) {
            if !captains.iter().any(|c| c.id == p.id) {
                captains.push(p);
            }
        }
    }

    let mut pool: Vec<&Participant> = candidates
        .participants
        .iter()
        .filter(|p| !captains.iter().any(|c| c.id == p.id))
        .collect();

    // Pass 1: captain-role holders
    if captains.len() < team_count {
        let mut eligible: Vec<&Participant> = pool.iter().copied().filter(|p| p.captain_role).collect();

        if captains.is_empty() && !eligible.is_empty() {
            eligible.sort_by(|a, b| rating_of(*b).total_cmp(&rating_of(*a)));
            let chosen = tightest_window(&eligible, team_count, &rating_of);
            captains.extend(chosen);
        } else {
            while captains.len() < team_count && !eligible.is_empty() {
                let anchor = captains.last().map(|c| rating_of(*c)).unwrap_or_default();
                let mut nearest = 0;
                for (index, candidate) in eligible.iter().enumerate() {
                    if rating_difference(rating_of(*candidate), anchor)
                        < rating_difference(rating_of(eligible[nearest]), anchor)
                    {
                        nearest = index;
                    }
                }
                captains.push(eligible.remove(nearest));
            }
        }
        pool.retain(|p| !captains.iter().any(|c| c.id == p.id));
    }

    // Pass 2: most played
    if captains.len() < team_count {
        let mut veterans: Vec<(&Participant, u32)> = pool
            .iter()
            .filter_map(|p| match candidates.play_counts.get(&p.id) {
                Some(count) if *count > 0 => Some((*p, *count)),
                _ => None,
            })
            .collect();
        veterans.sort_by(|a, b| b.1.cmp(&a.1));
        let needed = team_count - captains.len();
        captains.extend(veterans.into_iter().take(needed).map(|(p, _)| p));
        pool.retain(|p| !captains.iter().any(|c| c.id == p.id));
    }

    // Pass 3: random
    if captains.len() < team_count {
        pool.shuffle(rng);
        let needed = team_count - captains.len();
        captains.extend(pool.into_iter().take(needed));
    }

    let mut order: Vec<PlayerId> = captains.into_iter().map(|p| p.id.clone()).collect();
    order.shuffle(rng);
    order
}

/// Contiguous window of `size` skill-sorted participants with the smallest
/// rating spread, or all of them when there are not more than `size`
fn tightest_window<'a, F>(sorted: &[&'a Participant], size: usize, rating_of: &F) -> Vec<&'a Participant>
where
    F: Fn(&Participant) -> f64,
{
    if sorted.len() <= size {
        return sorted.to_vec();
    }

    let mut best_start = 0;
    let mut best_spread = f64::INFINITY;
    for start in 0..=(sorted.len() - size) {
        let spread = rating_of(sorted[start]) - rating_of(sorted[start + size - 1]);
        if spread < best_spread {
            best_spread = spread;
            best_start = start;
        }
    }
    sorted[best_start..best_start + size].to_vec()
}
