//! Pending match registry
//!
//! In-memory index of the pending matches this process drives, keyed by
//! `(guild, config)`. It caches the queue config and the process-local stage
//! state; persisted rows stay authoritative.

use crate::config::MatchConfig;
use crate::stage::StageState;
use crate::types::{GuildId, MatchKey, Stage};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub config: MatchConfig,
    pub stage: Stage,
    pub state: StageState,
}

#[derive(Debug, Default)]
pub struct PendingMatchRegistry {
    entries: BTreeMap<MatchKey, RegistryEntry>,
    /// Queues to check for a new progression once the current operation ends
    refills: VecDeque<MatchKey>,
}

impl PendingMatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: MatchKey, config: MatchConfig, stage: Stage) {
        self.entries.insert(
            key,
            RegistryEntry {
                config,
                stage,
                state: StageState::None,
            },
        );
    }

    pub fn get(&self, key: &MatchKey) -> Option<&RegistryEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &MatchKey) -> Option<&mut RegistryEntry> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &MatchKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &MatchKey) -> Option<RegistryEntry> {
        self.entries.remove(key)
    }

    /// Record the stage and its state after a step
    pub fn update(&mut self, key: MatchKey, stage: Stage, state: StageState) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.stage = stage;
            entry.state = state;
        }
    }

    /// Take the stage state out for a controller call
    pub fn take_state(&mut self, key: &MatchKey) -> StageState {
        self.entries
            .get_mut(key)
            .map(|entry| std::mem::take(&mut entry.state))
            .unwrap_or_default()
    }

    pub fn put_state(&mut self, key: &MatchKey, state: StageState) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.state = state;
        }
    }

    pub fn keys(&self) -> Vec<MatchKey> {
        self.entries.keys().copied().collect()
    }

    pub fn keys_for_guild(&self, guild_id: GuildId) -> Vec<MatchKey> {
        self.entries
            .keys()
            .filter(|key| key.guild_id == guild_id)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of tracked matches per stage
    pub fn stage_counts(&self) -> BTreeMap<Stage, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.stage).or_insert(0) += 1;
        }
        counts
    }

    pub fn queue_refill(&mut self, key: MatchKey) {
        if !self.refills.contains(&key) {
            self.refills.push_back(key);
        }
    }

    pub fn next_refill(&mut self) -> Option<MatchKey> {
        self.refills.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PickMode;

    #[test]
    fn test_entries_by_guild() {
        let mut registry = PendingMatchRegistry::new();
        let config = MatchConfig::new(1, "2v2", 4, 2, PickMode::Random);
        registry.insert(MatchKey::new(1, 1), config.clone(), Stage::ReadinessCheck);
        registry.insert(MatchKey::new(1, 2), config.clone(), Stage::MapVote);
        registry.insert(MatchKey::new(2, 1), config, Stage::MapVote);

        assert_eq!(registry.keys_for_guild(1).len(), 2);
        assert_eq!(registry.stage_counts().get(&Stage::MapVote), Some(&2));

        registry.remove(&MatchKey::new(1, 2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_refills_are_deduplicated() {
        let mut registry = PendingMatchRegistry::new();
        let key = MatchKey::new(1, 1);
        registry.queue_refill(key);
        registry.queue_refill(key);
        assert_eq!(registry.next_refill(), Some(key));
        assert_eq!(registry.next_refill(), None);
    }
}
