//! Readiness check stage
//!
//! Participants without recent activity are flagged unresponsive. They are
//! re-polled on every tick and on activity callbacks; the match aborts with
//! only the unresponsive participants removed once the iteration budget runs
//! out.

use super::{Handoff, StageContext, StageController, StageInput, StageResult, StageState};
use crate::config::{MatchConfig, StageSettings};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::types::{AbortReason, PendingMatch, PlayerId, Stage};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReadinessStage;

impl ReadinessStage {
    /// Recompute which of `candidates` are still unresponsive
    fn poll(ctx: &StageContext, pending: &PendingMatch, candidates: &[PlayerId]) -> Result<Vec<PlayerId>> {
        let now = current_timestamp();
        let window = ctx.settings.afk_time();
        let mut unresponsive = Vec::new();
        for participant in pending.participants.iter().filter(|p| candidates.contains(&p.id)) {
            if !ctx
                .activity
                .is_active(pending.key.guild_id, participant, now, window)?
            {
                unresponsive.push(participant.id.clone());
            }
        }
        Ok(unresponsive)
    }

    async fn refresh(&self, ctx: &StageContext, pending: &mut PendingMatch) -> Result<bool> {
        let unresponsive = Self::poll(ctx, pending, &pending.unresponsive)?;
        let changed = unresponsive != pending.unresponsive;
        if changed {
            ctx.gateway.set_unresponsive(pending.key, &unresponsive).await?;
            pending.unresponsive = unresponsive;
        }
        Ok(changed)
    }

    async fn publish_status(&self, ctx: &StageContext, pending: &PendingMatch) {
        // Captain-role holders first
        let mut ready: Vec<_> = pending
            .participants
            .iter()
            .filter(|p| !pending.unresponsive.contains(&p.id))
            .collect();
        ready.sort_by_key(|p| !p.captain_role);

        ctx.notify(EngineEvent::ReadinessStatus {
            key: pending.key,
            ready: ready.into_iter().map(|p| p.id.clone()).collect(),
            unresponsive: pending.unresponsive.clone(),
            time_left_ms: ctx.time_left_ms(ctx.settings.afk_check_iterations, pending.stage_iteration),
        })
        .await;
    }
}

#[async_trait]
impl StageController for ReadinessStage {
    fn stage(&self) -> Stage {
        Stage::ReadinessCheck
    }

    fn max_iterations(&self, settings: &StageSettings) -> u32 {
        settings.afk_check_iterations
    }

    async fn enter(
        &self,
        ctx: &StageContext,
        _config: &MatchConfig,
        pending: &mut PendingMatch,
        _state: &mut StageState,
    ) -> Result<StageResult> {
        let everyone = pending.participant_ids();
        let unresponsive = Self::poll(ctx, pending, &everyone)?;
        ctx.gateway.set_unresponsive(pending.key, &unresponsive).await?;
        pending.unresponsive = unresponsive;

        if pending.unresponsive.is_empty() {
            debug!("All participants ready for {}", pending.key);
            return Ok(StageResult::Advance(Handoff::None));
        }

        info!(
            "Readiness check for {}: {} of {} participants unresponsive",
            pending.key,
            pending.unresponsive.len(),
            pending.participants.len()
        );
        self.publish_status(ctx, pending).await;
        Ok(StageResult::Continue)
    }

    async fn tick(
        &self,
        ctx: &StageContext,
        _config: &MatchConfig,
        pending: &mut PendingMatch,
        _state: &mut StageState,
    ) -> Result<StageResult> {
        self.refresh(ctx, pending).await?;

        if pending.unresponsive.is_empty() {
            return Ok(StageResult::Advance(Handoff::None));
        }
        if pending.stage_iteration >= ctx.settings.afk_check_iterations {
            return Ok(StageResult::Abort(AbortReason::Unresponsive {
                player_ids: pending.unresponsive.clone(),
            }));
        }

        self.publish_status(ctx, pending).await;
        Ok(StageResult::Continue)
    }

    async fn handle(
        &self,
        ctx: &StageContext,
        _config: &MatchConfig,
        pending: &mut PendingMatch,
        _state: &mut StageState,
        input: StageInput,
    ) -> Result<StageResult> {
        let StageInput::Activity { player_id } = input else {
            return Err(EngineError::validation(
                "Only activity is accepted during the readiness check",
            )
            .into());
        };
        if !pending.unresponsive.contains(&player_id) {
            return Ok(StageResult::Continue);
        }

        if self.refresh(ctx, pending).await? {
            if pending.unresponsive.is_empty() {
                return Ok(StageResult::Advance(Handoff::None));
            }
            self.publish_status(ctx, pending).await;
        }
        Ok(StageResult::Continue)
    }
}
