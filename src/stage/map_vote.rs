//! Map vote stage
//!
//! Candidates come from the queue's map pool minus the most recently played
//! maps, topped up from those recent maps when the pool is too small. Each
//! participant may vote for and unvote a given map once each per session.
//! Tallies are re-rendered on ticks that saw changes; the winner is drawn
//! among the top-voted maps when the time budget runs out.

use super::{Handoff, StageContext, StageController, StageInput, StageResult, StageState};
use crate::config::{MatchConfig, StageSettings};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, MapTally};
use crate::types::{PendingMatch, PlayerId, Stage};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Pick up to `count` vote candidates from `pool`, avoiding `recent` maps
/// unless the pool would otherwise run short
pub fn draw_candidates<R: Rng + ?Sized>(
    pool: &[String],
    recent: &[String],
    count: usize,
    rng: &mut R,
) -> Vec<String> {
    let mut unique: Vec<&String> = Vec::with_capacity(pool.len());
    for map in pool {
        if !unique.contains(&map) {
            unique.push(map);
        }
    }

    let (mut fresh, mut stale): (Vec<&String>, Vec<&String>) =
        unique.into_iter().partition(|map| !recent.contains(map));
    fresh.shuffle(rng);
    stale.shuffle(rng);

    fresh
        .into_iter()
        .chain(stale)
        .take(count)
        .cloned()
        .collect()
}

/// Live state of one map vote
#[derive(Debug, Clone, Default)]
pub struct MapVoteSession {
    candidates: Vec<String>,
    votes: HashMap<String, HashSet<PlayerId>>,
    /// (player, map, is_vote) toggles already honoured
    used: HashSet<(PlayerId, String, bool)>,
    dirty: bool,
    last_render_iteration: u32,
}

impl MapVoteSession {
    pub fn new(candidates: Vec<String>, iteration: u32) -> Self {
        Self {
            candidates,
            last_render_iteration: iteration,
            ..Self::default()
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Vote for `map`, or take the vote back if already cast
    ///
    /// Returns whether the participant now votes for the map.
    pub fn toggle(&mut self, player_id: &str, map: &str) -> Result<bool> {
        if !self.candidates.iter().any(|c| c == map) {
            return Err(EngineError::validation(format!("{} is not a vote candidate", map)).into());
        }

        let voters = self.votes.entry(map.to_string()).or_default();
        let voting = !voters.contains(player_id);
        let toggle = (player_id.to_string(), map.to_string(), voting);
        if self.used.contains(&toggle) {
            return Err(EngineError::validation(format!(
                "{} already {} {}",
                player_id,
                if voting { "voted for" } else { "unvoted" },
                map
            ))
            .into());
        }

        if voting {
            voters.insert(player_id.to_string());
        } else {
            voters.remove(player_id);
        }
        self.used.insert(toggle);
        self.dirty = true;
        Ok(voting)
    }

    pub fn tallies(&self) -> Vec<MapTally> {
        self.candidates
            .iter()
            .map(|map| MapTally {
                map: map.clone(),
                votes: self.votes.get(map).map(HashSet::len).unwrap_or(0),
            })
            .collect()
    }

    /// Whether a tally render is due at `iteration`
    pub fn render_due(&self, iteration: u32, debounce_ticks: u32) -> bool {
        self.dirty && iteration.saturating_sub(self.last_render_iteration) >= debounce_ticks
    }

    pub fn mark_rendered(&mut self, iteration: u32) {
        self.dirty = false;
        self.last_render_iteration = iteration;
    }

    /// Most voted map, ties broken uniformly at random
    pub fn winner<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        let tallies = self.tallies();
        let top = tallies.iter().map(|t| t.votes).max()?;
        let tied: Vec<&MapTally> = tallies.iter().filter(|t| t.votes == top).collect();
        tied.choose(rng).map(|t| t.map.clone())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MapVoteStage;

impl MapVoteStage {
    async fn start_session(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &PendingMatch,
    ) -> Result<MapVoteSession> {
        let pool = match config.map_pool_id {
            Some(pool_id) => ctx.gateway.map_pool(pool_id).await?,
            None => Vec::new(),
        };
        let recent = ctx
            .gateway
            .recent_maps(pending.key, ctx.settings.recent_map_exclusion)
            .await?;
        let candidates = ctx.with_rng(|rng| {
            draw_candidates(&pool, &recent, ctx.settings.map_candidates, rng)
        })?;
        debug!("Map vote candidates for {}: {:?}", pending.key, candidates);
        Ok(MapVoteSession::new(candidates, pending.stage_iteration))
    }

    async fn publish_tally(&self, ctx: &StageContext, pending: &PendingMatch, session: &MapVoteSession) {
        ctx.notify(EngineEvent::VoteTally {
            key: pending.key,
            tallies: session.tallies(),
            time_left_ms: ctx.time_left_ms(ctx.settings.mapvote_iterations, pending.stage_iteration),
        })
        .await;
    }
}

#[async_trait]
impl StageController for MapVoteStage {
    fn stage(&self) -> Stage {
        Stage::MapVote
    }

    fn max_iterations(&self, settings: &StageSettings) -> u32 {
        settings.mapvote_iterations
    }

    async fn enter(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        let session = self.start_session(ctx, config, pending).await?;
        match session.candidates() {
            [] => {
                info!("Map pool for {} is empty, starting without a map", pending.key);
                return Ok(StageResult::Advance(Handoff::Map(None)));
            }
            [only] => return Ok(StageResult::Advance(Handoff::Map(Some(only.clone())))),
            _ => {}
        }

        self.publish_tally(ctx, pending, &session).await;
        *state = StageState::MapVote(session);
        Ok(StageResult::Continue)
    }

    async fn tick(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        if !matches!(state, StageState::MapVote(_)) {
            // Resumed after a restart: fresh candidates, empty tallies
            *state = StageState::MapVote(self.start_session(ctx, config, pending).await?);
        }
        let StageState::MapVote(session) = state else {
            return Ok(StageResult::Continue);
        };

        if pending.stage_iteration >= ctx.settings.mapvote_iterations {
            let winner = ctx.with_rng(|rng| session.winner(rng))?;
            info!("Map vote for {} won by {:?}", pending.key, winner);
            return Ok(StageResult::Advance(Handoff::Map(winner)));
        }

        if session.render_due(pending.stage_iteration, ctx.settings.vote_render_debounce_ticks) {
            self.publish_tally(ctx, pending, session).await;
            session.mark_rendered(pending.stage_iteration);
        }
        Ok(StageResult::Continue)
    }

    async fn handle(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
        input: StageInput,
    ) -> Result<StageResult> {
        let StageInput::VoteToggle { player_id, map } = input else {
            return Err(EngineError::validation("Only map votes are accepted during the map vote").into());
        };
        if !pending.contains(&player_id) {
            return Err(EngineError::validation(format!("{} is not in this match", player_id)).into());
        }
        if !matches!(state, StageState::MapVote(_)) {
            *state = StageState::MapVote(self.start_session(ctx, config, pending).await?);
        }
        let StageState::MapVote(session) = state else {
            return Ok(StageResult::Continue);
        };

        let voting = session.toggle(&player_id, &map)?;
        debug!(
            "{} {} {} in {}",
            player_id,
            if voting { "voted for" } else { "unvoted" },
            map,
            pending.key
        );
        Ok(StageResult::Continue)
    }

    async fn resume(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        *state = StageState::MapVote(self.start_session(ctx, config, pending).await?);
        Ok(StageResult::Continue)
    }
}
