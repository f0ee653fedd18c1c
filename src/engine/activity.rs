//! Participant activity tracking for readiness checks

use crate::error::{EngineError, Result};
use crate::types::{GuildId, Participant, PlayerId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Last time each participant was seen active, per guild
#[derive(Debug, Default)]
pub struct ActivityTracker {
    last_seen: RwLock<HashMap<(GuildId, PlayerId), DateTime<Utc>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, guild_id: GuildId, player_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut last_seen = self.last_seen.write().map_err(|_| EngineError::Internal {
            message: "Failed to acquire activity write lock".to_string(),
        })?;
        let entry = last_seen
            .entry((guild_id, player_id.to_string()))
            .or_insert(at);
        if at > *entry {
            *entry = at;
        }
        Ok(())
    }

    pub fn last_active(&self, guild_id: GuildId, player_id: &str) -> Result<Option<DateTime<Utc>>> {
        let last_seen = self.last_seen.read().map_err(|_| EngineError::Internal {
            message: "Failed to acquire activity read lock".to_string(),
        })?;
        Ok(last_seen.get(&(guild_id, player_id.to_string())).copied())
    }

    /// Whether a participant was active within `window`; joining the queue
    /// counts as activity
    pub fn is_active(
        &self,
        guild_id: GuildId,
        participant: &Participant,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<bool> {
        let last = match self.last_active(guild_id, &participant.id)? {
            Some(seen) => seen.max(participant.joined_at),
            None => participant.joined_at,
        };
        Ok(now - last <= window)
    }
}
