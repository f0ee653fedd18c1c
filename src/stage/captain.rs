//! Captain selection stage
//!
//! Eligible participants (captain-role holders) volunteer or withdraw. The
//! stage completes once enough captains volunteered or every eligible
//! participant did; a timeout hands over whatever was gathered and team
//! formation fills the rest.

use super::{Handoff, StageContext, StageController, StageInput, StageResult, StageState};
use crate::config::{MatchConfig, StageSettings};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::types::{PendingMatch, PlayerId, Stage};
use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy)]
pub struct CaptainSelectionStage;

impl CaptainSelectionStage {
    fn eligible(pending: &PendingMatch) -> Vec<PlayerId> {
        pending
            .participants
            .iter()
            .filter(|p| p.captain_role)
            .map(|p| p.id.clone())
            .collect()
    }

    fn restore_state(pending: &PendingMatch, state: &mut StageState) {
        let eligible = Self::eligible(pending);
        let volunteers = pending
            .captains
            .iter()
            .filter(|c| eligible.contains(c))
            .cloned()
            .collect();
        *state = StageState::Captains {
            eligible,
            volunteers,
        };
    }

    fn is_complete(config: &MatchConfig, eligible: &[PlayerId], volunteers: &[PlayerId]) -> bool {
        volunteers.len() >= config.team_count || volunteers.len() == eligible.len()
    }

    async fn publish_status(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &PendingMatch,
        volunteers: &[PlayerId],
    ) {
        ctx.notify(EngineEvent::CaptainStatus {
            key: pending.key,
            captains: volunteers.to_vec(),
            needed: config.team_count.saturating_sub(volunteers.len()),
            time_left_ms: ctx.time_left_ms(
                ctx.settings.captain_selection_iterations,
                pending.stage_iteration,
            ),
        })
        .await;
    }
}

#[async_trait]
impl StageController for CaptainSelectionStage {
    fn stage(&self) -> Stage {
        Stage::CaptainSelection
    }

    fn max_iterations(&self, settings: &StageSettings) -> u32 {
        settings.captain_selection_iterations
    }

    async fn enter(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        Self::restore_state(pending, state);
        let StageState::Captains { eligible, volunteers } = state else {
            return Ok(StageResult::Continue);
        };

        if eligible.is_empty() {
            debug!("No captain-role holders for {}, skipping selection", pending.key);
            return Ok(StageResult::Advance(Handoff::Captains(Vec::new())));
        }
        if Self::is_complete(config, eligible, volunteers) && !volunteers.is_empty() {
            return Ok(StageResult::Advance(Handoff::Captains(volunteers.clone())));
        }

        self.publish_status(ctx, config, pending, volunteers).await;
        Ok(StageResult::Continue)
    }

    async fn tick(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        if !matches!(state, StageState::Captains { .. }) {
            Self::restore_state(pending, state);
        }
        let StageState::Captains { volunteers, .. } = state else {
            return Ok(StageResult::Continue);
        };

        if pending.stage_iteration >= ctx.settings.captain_selection_iterations {
            info!(
                "Captain selection timed out for {} with {} of {} captains",
                pending.key,
                volunteers.len(),
                config.team_count
            );
            return Ok(StageResult::Advance(Handoff::Captains(volunteers.clone())));
        }

        self.publish_status(ctx, config, pending, volunteers).await;
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
        let StageInput::Volunteer { player_id, withdraw } = input else {
            return Err(EngineError::validation("Only volunteers are accepted during captain selection").into());
        };
        if !matches!(state, StageState::Captains { .. }) {
            Self::restore_state(pending, state);
        }
        let StageState::Captains { eligible, volunteers } = state else {
            return Ok(StageResult::Continue);
        };

        if !eligible.contains(&player_id) {
            return Err(EngineError::validation(format!("{} cannot be a captain", player_id)).into());
        }

        let mut updated = volunteers.clone();
        if withdraw {
            if !updated.contains(&player_id) {
                return Err(EngineError::validation(format!("{} is not a captain", player_id)).into());
            }
            updated.retain(|c| c != &player_id);
        } else {
            if updated.contains(&player_id) {
                return Err(EngineError::validation(format!("{} already volunteered", player_id)).into());
            }
            if updated.len() >= config.team_count {
                return Err(EngineError::validation("Captain slots are full").into());
            }
            updated.push(player_id.clone());
        }

        ctx.gateway
            .record_teams(pending.key, &pending.teams, Some(&updated))
            .await?;
        pending.captains = updated.clone();
        *volunteers = updated;
        debug!(
            "Captain {} {} for {}",
            player_id,
            if withdraw { "withdrew" } else { "volunteered" },
            pending.key
        );

        if Self::is_complete(config, eligible, volunteers) {
            return Ok(StageResult::Advance(Handoff::Captains(volunteers.clone())));
        }

        self.publish_status(ctx, config, pending, volunteers).await;
        Ok(StageResult::Continue)
    }

    async fn resume(
        &self,
        _ctx: &StageContext,
        _config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult> {
        Self::restore_state(pending, state);
        Ok(StageResult::Continue)
    }
}
