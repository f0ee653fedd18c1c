//! Persistence gateway contract

use crate::config::MatchConfig;
use crate::error::Result;
use crate::types::{GuildId, MapPoolId, MatchKey, Participant, PendingMatch, PlayerId, Stage, StartedMatch, Team};
use async_trait::async_trait;
use std::collections::HashMap;

/// Durable store for queue definitions, queue membership and pending matches
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Queue definition for a key
    async fn match_config(&self, key: MatchKey) -> Result<Option<MatchConfig>>;

    /// Current queue members, oldest join first
    async fn queue_members(&self, key: MatchKey) -> Result<Vec<Participant>>;

    /// Every queue of the guild that currently lists the player
    async fn queues_with_member(&self, guild_id: GuildId, player_id: &PlayerId) -> Result<Vec<MatchKey>>;

    async fn remove_queue_members(&self, key: MatchKey, player_ids: &[PlayerId]) -> Result<()>;

    /// Put members back into the queue with their original join timestamps
    async fn restore_queue_join_timestamps(
        &self,
        key: MatchKey,
        participants: &[Participant],
    ) -> Result<()>;

    /// Insert a new pending match row; fails if one already exists for the key
    async fn create_pending_match(&self, pending: &PendingMatch) -> Result<()>;

    async fn get_pending_match(&self, key: MatchKey) -> Result<Option<PendingMatch>>;

    /// Every pending match row, used to reconcile after a restart
    async fn pending_matches(&self) -> Result<Vec<PendingMatch>>;

    /// Move a pending match to a new stage, resetting its iteration count
    async fn set_stage(&self, key: MatchKey, stage: Stage) -> Result<()>;

    /// Increment the stage iteration and return the new value
    async fn increment_iteration(&self, key: MatchKey) -> Result<u32>;

    async fn set_unresponsive(&self, key: MatchKey, player_ids: &[PlayerId]) -> Result<()>;

    /// Store teams and, when given, the captain draft order
    async fn record_teams(
        &self,
        key: MatchKey,
        teams: &[Team],
        captains: Option<&[PlayerId]>,
    ) -> Result<()>;

    async fn set_captain_turn(&self, key: MatchKey, captain: Option<&PlayerId>) -> Result<()>;

    async fn set_match_quality(&self, key: MatchKey, quality: Option<f64>) -> Result<()>;

    async fn set_map(&self, key: MatchKey, map: Option<&str>) -> Result<()>;

    /// Delete the pending match row
    async fn clear_match(&self, key: MatchKey) -> Result<()>;

    /// Store a started match, drop its participants from the queue and bump
    /// their play counts; the pending row is cleared separately
    async fn record_started_match(&self, started: &StartedMatch) -> Result<()>;

    /// Historic play counts for this queue
    async fn play_counts(
        &self,
        key: MatchKey,
        player_ids: &[PlayerId],
    ) -> Result<HashMap<PlayerId, u32>>;

    /// Most recently played maps for this queue, newest first
    async fn recent_maps(&self, key: MatchKey, limit: usize) -> Result<Vec<String>>;

    async fn map_pool(&self, pool_id: MapPoolId) -> Result<Vec<String>>;
}
