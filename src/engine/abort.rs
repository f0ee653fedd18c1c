//! Abort coordinator
//!
//! Unwinding removes the participants an abort blames from the queue, puts
//! everyone else back with their original join time, clears the persisted
//! pending match and queues the key for a refill. When unwinding itself
//! cannot be persisted, the match is force-cleared and an operator error is
//! published instead.

use crate::engine::manager::{Outcome, PickupEngine};
use crate::engine::registry::PendingMatchRegistry;
use crate::error::{is_persistence, EngineError, Result};
use crate::events::EngineEvent;
use crate::types::{AbortReason, ConfigId, GuildId, MatchKey, Participant, PendingMatch, PlayerId};
use tracing::{debug, error, info, warn};

impl PickupEngine {
    /// Unwind a pending match for `reason`
    pub(super) async fn unwind(
        &self,
        registry: &mut PendingMatchRegistry,
        pending: PendingMatch,
        reason: AbortReason,
    ) -> Result<()> {
        let key = pending.key;
        self.cancel_timer(key);
        registry.remove(&key);

        let departing: Vec<PlayerId> = reason
            .departing()
            .into_iter()
            .filter(|id| pending.contains(id))
            .collect();
        let returned: Vec<Participant> = pending
            .participants
            .into_iter()
            .filter(|p| !departing.contains(&p.id))
            .collect();

        let gateway = &self.ctx.gateway;
        gateway.remove_queue_members(key, &departing).await?;
        gateway.restore_queue_join_timestamps(key, &returned).await?;
        gateway.clear_match(key).await?;

        match &reason {
            AbortReason::RecoveryGap => warn!(
                "Recovery gap for {}: {} participants returned to the queue",
                key,
                returned.len()
            ),
            _ => info!(
                "Pending match {} aborted in {}: {} ({} removed, {} returned)",
                key,
                pending.stage,
                reason,
                departing.len(),
                returned.len()
            ),
        }
        self.metrics.record_match_aborted(reason.as_str());

        self.ctx
            .notify(EngineEvent::MatchAborted {
                key,
                reason,
                removed: departing,
                returned: returned.into_iter().map(|p| p.id).collect(),
            })
            .await;
        registry.queue_refill(key);
        Ok(())
    }

    /// Force-clear a pending match after a storage or internal failure. No
    /// refill is queued since queue membership may be inconsistent.
    pub(super) async fn fail_safe(
        &self,
        registry: &mut PendingMatchRegistry,
        key: MatchKey,
        cause: &anyhow::Error,
    ) {
        self.cancel_timer(key);
        registry.remove(&key);
        error!(
            "Force-clearing pending match for guild {} config {}: {:#}",
            key.guild_id, key.config_id, cause
        );

        if let Err(e) = self.ctx.gateway.clear_match(key).await {
            error!(
                "Failed to clear pending match for guild {} config {}: {:#}",
                key.guild_id, key.config_id, e
            );
        }

        let reason = if is_persistence(cause) {
            self.metrics.record_persistence_failure();
            AbortReason::PersistenceFailure
        } else {
            AbortReason::InternalError
        };
        self.metrics.record_match_aborted(reason.as_str());

        self.ctx
            .notify(EngineEvent::OperatorError {
                key,
                message: format!("{:#}", cause),
            })
            .await;
        self.ctx
            .notify(EngineEvent::MatchAborted {
                key,
                reason,
                removed: Vec::new(),
                returned: Vec::new(),
            })
            .await;
    }

    pub(super) async fn participant_unavailable_locked(
        &self,
        registry: &mut PendingMatchRegistry,
        guild_id: GuildId,
        player_id: &PlayerId,
        config_id: Option<ConfigId>,
    ) -> Result<Outcome> {
        // Leaving every match also means leaving every queue still listing the player
        let member_of = match config_id {
            Some(_) => Vec::new(),
            None => {
                self.ctx
                    .gateway
                    .queues_with_member(guild_id, player_id)
                    .await?
            }
        };
        let keys = match config_id {
            Some(config_id) => vec![MatchKey::new(guild_id, config_id)],
            None => {
                let mut keys = registry.keys_for_guild(guild_id);
                for key in &member_of {
                    if !keys.contains(key) {
                        keys.push(*key);
                    }
                }
                keys
            }
        };

        let mut unwound = 0;
        let mut left_queue = false;
        let mut failure = None;
        for key in keys {
            let leaves_queue = config_id.is_some() || member_of.contains(&key);
            if !registry.contains(&key) {
                if leaves_queue {
                    self.leave_queue(key, player_id).await?;
                    left_queue = true;
                }
                continue;
            }

            let pending = match self.ctx.gateway.get_pending_match(key).await {
                Ok(Some(pending)) => pending,
                Ok(None) => continue,
                Err(e) => {
                    self.fail_safe(registry, key, &e).await;
                    failure = Some(e);
                    continue;
                }
            };
            if !pending.contains(player_id) {
                if leaves_queue {
                    self.leave_queue(key, player_id).await?;
                    left_queue = true;
                }
                continue;
            }

            debug!(
                "{} in {}",
                EngineError::UnavailableParticipant {
                    player_id: player_id.clone()
                },
                key
            );
            let reason = AbortReason::ParticipantUnavailable {
                player_id: player_id.clone(),
            };
            if let Err(e) = self.unwind(registry, pending, reason).await {
                self.fail_safe(registry, key, &e).await;
                failure = Some(e);
                continue;
            }
            unwound += 1;
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if unwound == 0 && !left_queue {
            return Ok(Outcome::Ignored(format!(
                "{} is not part of a pending match or queue",
                player_id
            )));
        }
        Ok(Outcome::Applied)
    }

    async fn leave_queue(&self, key: MatchKey, player_id: &PlayerId) -> Result<()> {
        debug!("{} left queue {}", player_id, key);
        self.ctx
            .gateway
            .remove_queue_members(key, std::slice::from_ref(player_id))
            .await
    }

    pub(super) async fn force_cancel_locked(
        &self,
        registry: &mut PendingMatchRegistry,
        keys: &[MatchKey],
        reason: &str,
    ) -> Result<usize> {
        let mut cancelled = 0;
        for &key in keys {
            let pending = match self.ctx.gateway.get_pending_match(key).await {
                Ok(Some(pending)) => pending,
                Ok(None) => {
                    if registry.remove(&key).is_some() {
                        self.cancel_timer(key);
                    }
                    continue;
                }
                Err(e) => {
                    self.fail_safe(registry, key, &e).await;
                    continue;
                }
            };

            let abort = AbortReason::ForceCancelled {
                reason: reason.to_string(),
            };
            match self.unwind(registry, pending, abort).await {
                Ok(()) => cancelled += 1,
                Err(e) => self.fail_safe(registry, key, &e).await,
            }
        }
        Ok(cancelled)
    }
}
