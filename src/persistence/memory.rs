//! In-memory persistence gateway
//!
//! Backs the binary and the test suite. Individual operations can be made to
//! fail on demand to exercise the engine's fail-safe paths.

use super::gateway::PersistenceGateway;
use crate::config::MatchConfig;
use crate::error::{EngineError, Result};
use crate::types::{
    GuildId, MapPoolId, MatchKey, Participant, PendingMatch, PlayerId, Stage, StartedMatch, Team,
};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct GatewayState {
    configs: HashMap<MatchKey, MatchConfig>,
    queues: HashMap<MatchKey, Vec<Participant>>,
    pending: HashMap<MatchKey, PendingMatch>,
    started: Vec<StartedMatch>,
    play_counts: HashMap<(MatchKey, PlayerId), u32>,
    /// Newest first
    map_history: HashMap<MatchKey, Vec<String>>,
    map_pools: HashMap<MapPoolId, Vec<String>>,
}

/// Gateway keeping every record in process memory
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: RwLock<GatewayState>,
    failing: RwLock<HashSet<&'static str>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GatewayState>> {
        self.state.read().map_err(|_| {
            EngineError::Internal {
                message: "Failed to acquire gateway read lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GatewayState>> {
        self.state.write().map_err(|_| {
            EngineError::Internal {
                message: "Failed to acquire gateway write lock".to_string(),
            }
            .into()
        })
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        let failing = self.failing.read().map_err(|_| EngineError::Internal {
            message: "Failed to acquire failure injection lock".to_string(),
        })?;
        if failing.contains(operation) {
            return Err(EngineError::persistence(operation, "injected failure").into());
        }
        Ok(())
    }

    /// Make every call to `operation` fail until `recover` is called
    pub fn fail_on(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(operation);
        }
    }

    pub fn recover(&self) {
        if let Ok(mut failing) = self.failing.write() {
            failing.clear();
        }
    }

    /// Register a queue definition for a guild
    pub fn add_match_config(&self, guild_id: GuildId, config: MatchConfig) -> Result<MatchKey> {
        let key = MatchKey::new(guild_id, config.id);
        self.write()?.configs.insert(key, config);
        Ok(key)
    }

    pub fn remove_match_config(&self, key: MatchKey) -> Result<()> {
        let mut state = self.write()?;
        state.configs.remove(&key);
        state.queues.remove(&key);
        Ok(())
    }

    /// Add a participant to a queue; returns the new queue size
    pub fn add_queue_member(&self, key: MatchKey, participant: Participant) -> Result<usize> {
        let mut state = self.write()?;
        let queue = state.queues.entry(key).or_default();
        if !queue.iter().any(|p| p.id == participant.id) {
            queue.push(participant);
        }
        Ok(queue.len())
    }

    pub fn add_map_pool(&self, pool_id: MapPoolId, maps: Vec<String>) -> Result<()> {
        self.write()?.map_pools.insert(pool_id, maps);
        Ok(())
    }

    /// Record a map as the most recently played one for a queue
    pub fn push_recent_map(&self, key: MatchKey, map: impl Into<String>) -> Result<()> {
        self.write()?
            .map_history
            .entry(key)
            .or_default()
            .insert(0, map.into());
        Ok(())
    }

    pub fn set_play_count(&self, key: MatchKey, player_id: &str, count: u32) -> Result<()> {
        self.write()?
            .play_counts
            .insert((key, player_id.to_string()), count);
        Ok(())
    }

    /// Overwrite a pending match row as-is, e.g. to stage a restart
    pub fn put_pending_match(&self, pending: PendingMatch) -> Result<()> {
        self.write()?.pending.insert(pending.key, pending);
        Ok(())
    }

    pub fn started_matches(&self) -> Result<Vec<StartedMatch>> {
        Ok(self.read()?.started.clone())
    }

    fn update_pending<F>(&self, operation: &'static str, key: MatchKey, update: F) -> Result<()>
    where
        F: FnOnce(&mut PendingMatch),
    {
        self.check(operation)?;
        let mut state = self.write()?;
        let pending = state
            .pending
            .get_mut(&key)
            .ok_or(EngineError::MatchNotFound { key })?;
        update(pending);
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn match_config(&self, key: MatchKey) -> Result<Option<MatchConfig>> {
        self.check("match_config")?;
        Ok(self.read()?.configs.get(&key).cloned())
    }

    async fn queue_members(&self, key: MatchKey) -> Result<Vec<Participant>> {
        self.check("queue_members")?;
        let mut members = self.read()?.queues.get(&key).cloned().unwrap_or_default();
        members.sort_by_key(|p| p.joined_at);
        Ok(members)
    }

    async fn queues_with_member(&self, guild_id: GuildId, player_id: &PlayerId) -> Result<Vec<MatchKey>> {
        self.check("queues_with_member")?;
        let mut keys: Vec<MatchKey> = self
            .read()?
            .queues
            .iter()
            .filter(|(key, members)| {
                key.guild_id == guild_id && members.iter().any(|p| &p.id == player_id)
            })
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn remove_queue_members(&self, key: MatchKey, player_ids: &[PlayerId]) -> Result<()> {
        self.check("remove_queue_members")?;
        if let Some(queue) = self.write()?.queues.get_mut(&key) {
            queue.retain(|p| !player_ids.contains(&p.id));
        }
        Ok(())
    }

    async fn restore_queue_join_timestamps(
        &self,
        key: MatchKey,
        participants: &[Participant],
    ) -> Result<()> {
        self.check("restore_queue_join_timestamps")?;
        let mut state = self.write()?;
        let queue = state.queues.entry(key).or_default();
        for participant in participants {
            match queue.iter_mut().find(|p| p.id == participant.id) {
                Some(member) => member.joined_at = participant.joined_at,
                None => queue.push(participant.clone()),
            }
        }
        queue.sort_by_key(|p| p.joined_at);
        Ok(())
    }

    async fn create_pending_match(&self, pending: &PendingMatch) -> Result<()> {
        self.check("create_pending_match")?;
        let mut state = self.write()?;
        if state.pending.contains_key(&pending.key) {
            return Err(EngineError::persistence(
                "create_pending_match",
                format!("pending match already exists for {}", pending.key),
            )
            .into());
        }
        state.pending.insert(pending.key, pending.clone());
        Ok(())
    }

    async fn get_pending_match(&self, key: MatchKey) -> Result<Option<PendingMatch>> {
        self.check("get_pending_match")?;
        Ok(self.read()?.pending.get(&key).cloned())
    }

    async fn pending_matches(&self) -> Result<Vec<PendingMatch>> {
        self.check("pending_matches")?;
        let mut pending: Vec<PendingMatch> = self.read()?.pending.values().cloned().collect();
        pending.sort_by_key(|p| p.key);
        Ok(pending)
    }

    async fn set_stage(&self, key: MatchKey, stage: Stage) -> Result<()> {
        self.update_pending("set_stage", key, |pending| {
            pending.stage = stage;
            pending.stage_iteration = 0;
            pending.stage_entered_at = current_timestamp();
        })
    }

    async fn increment_iteration(&self, key: MatchKey) -> Result<u32> {
        let mut iteration = 0;
        self.update_pending("increment_iteration", key, |pending| {
            pending.stage_iteration += 1;
            iteration = pending.stage_iteration;
        })?;
        Ok(iteration)
    }

    async fn set_unresponsive(&self, key: MatchKey, player_ids: &[PlayerId]) -> Result<()> {
        self.update_pending("set_unresponsive", key, |pending| {
            pending.unresponsive = player_ids.to_vec();
        })
    }

    async fn record_teams(
        &self,
        key: MatchKey,
        teams: &[Team],
        captains: Option<&[PlayerId]>,
    ) -> Result<()> {
        self.update_pending("record_teams", key, |pending| {
            pending.teams = teams.to_vec();
            if let Some(captains) = captains {
                pending.captains = captains.to_vec();
            }
        })
    }

    async fn set_captain_turn(&self, key: MatchKey, captain: Option<&PlayerId>) -> Result<()> {
        self.update_pending("set_captain_turn", key, |pending| {
            pending.captain_turn = captain.cloned();
        })
    }

    async fn set_match_quality(&self, key: MatchKey, quality: Option<f64>) -> Result<()> {
        self.update_pending("set_match_quality", key, |pending| {
            pending.match_quality = quality;
        })
    }

    async fn set_map(&self, key: MatchKey, map: Option<&str>) -> Result<()> {
        self.update_pending("set_map", key, |pending| {
            pending.map = map.map(str::to_string);
        })
    }

    async fn clear_match(&self, key: MatchKey) -> Result<()> {
        self.check("clear_match")?;
        self.write()?.pending.remove(&key);
        Ok(())
    }

    async fn record_started_match(&self, started: &StartedMatch) -> Result<()> {
        self.check("record_started_match")?;
        let mut state = self.write()?;
        let ids: Vec<PlayerId> = started.participants.iter().map(|p| p.id.clone()).collect();

        if let Some(queue) = state.queues.get_mut(&started.key) {
            queue.retain(|p| !ids.contains(&p.id));
        }
        for id in ids {
            *state.play_counts.entry((started.key, id)).or_insert(0) += 1;
        }
        if let Some(map) = &started.map {
            state
                .map_history
                .entry(started.key)
                .or_default()
                .insert(0, map.clone());
        }
        state.started.push(started.clone());
        Ok(())
    }

    async fn play_counts(
        &self,
        key: MatchKey,
        player_ids: &[PlayerId],
    ) -> Result<HashMap<PlayerId, u32>> {
        self.check("play_counts")?;
        let state = self.read()?;
        Ok(player_ids
            .iter()
            .filter_map(|id| {
                state
                    .play_counts
                    .get(&(key, id.clone()))
                    .map(|count| (id.clone(), *count))
            })
            .collect())
    }

    async fn recent_maps(&self, key: MatchKey, limit: usize) -> Result<Vec<String>> {
        self.check("recent_maps")?;
        Ok(self
            .read()?
            .map_history
            .get(&key)
            .map(|history| history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn map_pool(&self, pool_id: MapPoolId) -> Result<Vec<String>> {
        self.check("map_pool")?;
        Ok(self.read()?.map_pools.get(&pool_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PickMode;
    use chrono::Duration;

    fn participant(id: &str, minutes_ago: i64) -> Participant {
        Participant {
            id: id.to_string(),
            display_name: id.to_string(),
            rating: Default::default(),
            joined_at: current_timestamp() - Duration::minutes(minutes_ago),
            captain_role: false,
        }
    }

    #[tokio::test]
    async fn test_pending_match_lifecycle() {
        let gateway = InMemoryGateway::new();
        let key = gateway
            .add_match_config(1, MatchConfig::new(2, "2v2", 4, 2, PickMode::Random))
            .unwrap();
        let pending = PendingMatch::new(key, vec![participant("a", 1)], current_timestamp());

        gateway.create_pending_match(&pending).await.unwrap();
        assert!(gateway.create_pending_match(&pending).await.is_err());

        gateway.set_stage(key, Stage::ReadinessCheck).await.unwrap();
        assert_eq!(gateway.increment_iteration(key).await.unwrap(), 1);
        assert_eq!(gateway.increment_iteration(key).await.unwrap(), 2);
        gateway.set_stage(key, Stage::TeamFormation).await.unwrap();

        let stored = gateway.get_pending_match(key).await.unwrap().unwrap();
        assert_eq!(stored.stage, Stage::TeamFormation);
        assert_eq!(stored.stage_iteration, 0);

        gateway.clear_match(key).await.unwrap();
        assert!(gateway.get_pending_match(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_join_timestamps() {
        let gateway = InMemoryGateway::new();
        let key = MatchKey::new(1, 1);
        let original = participant("a", 30);
        let mut bumped = original.clone();
        bumped.joined_at = current_timestamp();

        gateway.add_queue_member(key, participant("b", 10)).unwrap();
        gateway.add_queue_member(key, bumped).unwrap();
        gateway
            .restore_queue_join_timestamps(key, &[original.clone()])
            .await
            .unwrap();

        let members = gateway.queue_members(key).await.unwrap();
        assert_eq!(members[0].id, "a");
        assert_eq!(members[0].joined_at, original.joined_at);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let gateway = InMemoryGateway::new();
        let key = MatchKey::new(1, 1);
        gateway.fail_on("clear_match");

        let err = gateway.clear_match(key).await.unwrap_err();
        assert!(err.to_string().contains("clear_match"));

        gateway.recover();
        assert!(gateway.clear_match(key).await.is_ok());
    }

    #[tokio::test]
    async fn test_queues_with_member_stays_within_guild() {
        let gateway = InMemoryGateway::new();
        gateway.add_queue_member(MatchKey::new(1, 2), participant("a", 5)).unwrap();
        gateway.add_queue_member(MatchKey::new(1, 1), participant("a", 5)).unwrap();
        gateway.add_queue_member(MatchKey::new(1, 3), participant("b", 5)).unwrap();
        gateway.add_queue_member(MatchKey::new(2, 1), participant("a", 5)).unwrap();

        let keys = gateway.queues_with_member(1, &"a".to_string()).await.unwrap();
        assert_eq!(keys, vec![MatchKey::new(1, 1), MatchKey::new(1, 2)]);
        assert!(gateway
            .queues_with_member(1, &"c".to_string())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_recent_maps_newest_first() {
        let gateway = InMemoryGateway::new();
        let key = MatchKey::new(1, 1);
        for map in ["dust2", "nuke", "inferno", "mirage"] {
            gateway.push_recent_map(key, map).unwrap();
        }
        let recent = gateway.recent_maps(key, 3).await.unwrap();
        assert_eq!(recent, vec!["mirage", "inferno", "nuke"]);
    }
}
