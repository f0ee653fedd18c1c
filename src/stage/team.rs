//! Team formation stage
//!
//! Random, skill-based and automatic drafts are single-shot. Manual drafts
//! keep a `DraftSession` in the stage state and run one timed turn per
//! captain; that session cannot be rebuilt after a restart.

use super::{Handoff, StageContext, StageController, StageInput, StageResult, StageState};
use crate::config::{MatchConfig, StageSettings};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::formation::{
    auto_draft, determine_captains, CaptainCandidates, DraftSession, SkillBalancedFormer, TeamFormer,
};
use crate::types::{AbortReason, PendingMatch, PickMode, PlayerId, PlayerRating, Stage, Team};
use async_trait::async_trait;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct TeamFormationStage;

impl TeamFormationStage {
    /// Descriptive quality of a split; never used to re-decide teams
    fn quality(ctx: &StageContext, pending: &PendingMatch, teams: &[Team]) -> Option<f64> {
        if teams.len() < 2 {
            return None;
        }
        let ratings: Vec<Vec<PlayerRating>> = teams
            .iter()
            .map(|team| {
                team.members
                    .iter()
                    .filter_map(|id| pending.participant(id).map(|p| p.rating.clone()))
                    .collect()
            })
            .collect();
        Some(ctx.ratings.match_quality(&ratings))
    }

    async fn captains(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &PendingMatch,
    ) -> Result<Vec<PlayerId>> {
        let ids = pending.participant_ids();
        let play_counts = ctx.gateway.play_counts(pending.key, &ids).await?;
        let candidates = CaptainCandidates {
            participants: &pending.participants,
            existing: &pending.captains,
            play_counts: &play_counts,
            rating_cap: config.rating_cap,
        };
        ctx.with_rng(|rng| determine_captains(&candidates, config.team_count, rng))
    }

    async fn publish_turn(&self, ctx: &StageContext, pending: &PendingMatch, session: &DraftSession) {
        let Some(captain) = session.current_captain() else {
            return;
        };
        let elapsed = pending
            .stage_iteration
            .saturating_sub(session.turn_started_iteration());
        ctx.notify(EngineEvent::DraftTurn {
            key: pending.key,
            captain: captain.clone(),
            pick_size: session.pick_size(),
            undrafted: session.undrafted().to_vec(),
            teams: session.teams().to_vec(),
            time_left_ms: ctx.time_left_ms(ctx.settings.picking_iterations, elapsed),
        })
        .await;
    }

    fn finished(ctx: &StageContext, pending: &PendingMatch, session: DraftSession) -> StageResult {
        let captains = session
            .teams()
            .iter()
            .filter_map(|t| t.captain.clone())
            .collect();
        let teams = session.into_teams();
        let quality = Self::quality(ctx, pending, &teams);
        StageResult::Advance(Handoff::Teams {
            teams,
            captains,
            quality,
        })
    }
}

#[async_trait]
impl StageController for TeamFormationStage {
    fn stage(&self) -> Stage {
        Stage::TeamFormation
    }

    fn max_iterations(&self, settings: &StageSettings) -> u32 {
        settings.picking_iterations
    }

    async fn enter(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        let teams = match config.pick_mode {
            PickMode::None => return Ok(StageResult::Advance(Handoff::None)),
            PickMode::Random => ctx.random_former.form_teams(
                &pending.participants,
                config.team_count,
                config.rating_cap,
            )?,
            PickMode::SkillBased => SkillBalancedFormer::new().form_teams(
                &pending.participants,
                config.team_count,
                config.rating_cap,
            )?,
            PickMode::AutoPick => {
                let captains = self.captains(ctx, config, pending).await?;
                let mut session = DraftSession::new(&captains, &pending.participants, pending.stage_iteration)?;
                auto_draft(&mut session, &pending.participants, config.rating_cap, pending.stage_iteration)?;
                info!("Automatic draft finished for {}", pending.key);
                return Ok(Self::finished(ctx, pending, session));
            }
            PickMode::Manual => {
                let captains = self.captains(ctx, config, pending).await?;
                let session = DraftSession::new(&captains, &pending.participants, pending.stage_iteration)?;
                if session.is_complete() {
                    return Ok(Self::finished(ctx, pending, session));
                }

                ctx.gateway
                    .record_teams(pending.key, session.teams(), Some(&captains))
                    .await?;
                ctx.gateway
                    .set_captain_turn(pending.key, session.current_captain())
                    .await?;
                pending.captains = captains;
                pending.teams = session.teams().to_vec();
                pending.captain_turn = session.current_captain().cloned();

                info!(
                    "Draft started for {} with captains {:?}",
                    pending.key, pending.captains
                );
                self.publish_turn(ctx, pending, &session).await;
                *state = StageState::Draft(session);
                return Ok(StageResult::Continue);
            }
        };

        debug!("Formed {} teams for {} ({})", teams.len(), pending.key, config.pick_mode.as_str());
        let quality = Self::quality(ctx, pending, &teams);
        Ok(StageResult::Advance(Handoff::Teams {
            teams,
            captains: Vec::new(),
            quality,
        }))
    }

    async fn tick(
        &self,
        ctx: &StageContext,
        _config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        let StageState::Draft(session) = state else {
            warn!("No draft session for {}, cannot continue the draft", pending.key);
            return Ok(StageResult::Abort(AbortReason::RecoveryGap));
        };

        if session.turn_expired(pending.stage_iteration, ctx.settings.picking_iterations) {
            let captain = session.current_captain().cloned().unwrap_or_default();
            info!("Captain {} did not pick in time for {}", captain, pending.key);
            return Ok(StageResult::Abort(AbortReason::CaptainTimedOut { captain }));
        }

        self.publish_turn(ctx, pending, session).await;
        Ok(StageResult::Continue)
    }

    async fn handle(
        &self,
        ctx: &StageContext,
        _config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
        input: StageInput,
    ) -> Result<StageResult> {
        let StageInput::Pick { captain, players } = input else {
            return Err(EngineError::validation("Only picks are accepted during team formation").into());
        };
        let StageState::Draft(session) = state else {
            return Err(EngineError::validation("No draft is running for this match").into());
        };

        let picks = session.apply_pick(&captain, &players, pending.stage_iteration)?;
        ctx.gateway.record_teams(pending.key, session.teams(), None).await?;
        ctx.gateway
            .set_captain_turn(pending.key, session.current_captain())
            .await?;
        pending.teams = session.teams().to_vec();
        pending.captain_turn = session.current_captain().cloned();

        for pick in picks {
            ctx.notify(EngineEvent::DraftPicked {
                key: pending.key,
                pick,
            })
            .await;
        }

        if session.is_complete() {
            let StageState::Draft(session) = std::mem::take(state) else {
                return Ok(StageResult::Continue);
            };
            return Ok(Self::finished(ctx, pending, session));
        }

        self.publish_turn(ctx, pending, session).await;
        Ok(StageResult::Continue)
    }

    async fn resume(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        if config.pick_mode == PickMode::Manual {
            // Draft sessions live in process memory only
            return Ok(StageResult::Abort(AbortReason::RecoveryGap));
        }
        self.enter(ctx, config, pending, state).await
    }
}
