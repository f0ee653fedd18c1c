//! Queue (match configuration) definitions
//!
//! A `MatchConfig` is created by guild admins and stays immutable while a
//! pending match for it is in flight. Every stage controller reads it.

use crate::error::{EngineError, Result};
use crate::types::{CaptainSelectionMode, ConfigId, GuildId, MapPoolId, PickMode};
use serde::{Deserialize, Serialize};

/// Static per-queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub id: ConfigId,
    pub name: String,
    /// Number of participants needed to fill the queue
    pub player_count: usize,
    pub team_count: usize,
    pub pick_mode: PickMode,
    #[serde(default)]
    pub readiness_check: bool,
    #[serde(default = "default_captain_selection")]
    pub captain_selection: CaptainSelectionMode,
    #[serde(default)]
    pub map_pool_id: Option<MapPoolId>,
    /// Upper bound applied to rating means used for balancing
    #[serde(default)]
    pub rating_cap: Option<f64>,
}

fn default_captain_selection() -> CaptainSelectionMode {
    CaptainSelectionMode::Automatic
}

impl MatchConfig {
    /// Create a configuration without readiness check, map vote or rating cap
    pub fn new(
        id: ConfigId,
        name: impl Into<String>,
        player_count: usize,
        team_count: usize,
        pick_mode: PickMode,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            player_count,
            team_count,
            pick_mode,
            readiness_check: false,
            captain_selection: CaptainSelectionMode::Automatic,
            map_pool_id: None,
            rating_cap: None,
        }
    }

    pub fn with_readiness_check(mut self, enabled: bool) -> Self {
        self.readiness_check = enabled;
        self
    }

    pub fn with_captain_selection(mut self, mode: CaptainSelectionMode) -> Self {
        self.captain_selection = mode;
        self
    }

    pub fn with_map_pool(mut self, pool_id: MapPoolId) -> Self {
        self.map_pool_id = Some(pool_id);
        self
    }

    pub fn with_rating_cap(mut self, cap: f64) -> Self {
        self.rating_cap = Some(cap);
        self
    }

    /// Members per team once teams are formed
    pub fn team_size(&self) -> usize {
        if self.team_count == 0 {
            return 0;
        }
        self.player_count / self.team_count
    }

    /// Validate the configuration before it is used by the engine
    pub fn validate(&self) -> Result<()> {
        if self.player_count == 0 {
            return Err(EngineError::Configuration {
                message: format!("Queue '{}' must have a positive player count", self.name),
            }
            .into());
        }

        if self.pick_mode == PickMode::None {
            return self.validate_rating_cap();
        }

        if self.team_count < 2 {
            return Err(EngineError::Configuration {
                message: format!("Queue '{}' needs at least two teams", self.name),
            }
            .into());
        }

        if self.player_count % self.team_count != 0 {
            return Err(EngineError::Configuration {
                message: format!(
                    "Queue '{}' player count {} is not divisible by team count {}",
                    self.name, self.player_count, self.team_count
                ),
            }
            .into());
        }

        if self.pick_mode.uses_captains() && self.player_count < self.team_count * 2 {
            return Err(EngineError::Configuration {
                message: format!(
                    "Queue '{}' needs at least two players per team for captain drafts",
                    self.name
                ),
            }
            .into());
        }

        self.validate_rating_cap()
    }

    fn validate_rating_cap(&self) -> Result<()> {
        match self.rating_cap {
            Some(cap) if cap <= 0.0 => Err(EngineError::Configuration {
                message: format!("Queue '{}' rating cap must be positive", self.name),
            }
            .into()),
            _ => Ok(()),
        }
    }
}

/// Queue declaration in the service config file, scoped to a guild
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDeclaration {
    pub guild_id: GuildId,
    #[serde(flatten)]
    pub config: MatchConfig,
}

/// Map pool declaration in the service config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapPoolDeclaration {
    pub id: MapPoolId,
    pub maps: Vec<String>,
}
