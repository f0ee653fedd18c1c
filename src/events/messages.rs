//! Event payloads published by the engine

use crate::error::{EngineError, Result};
use crate::formation::DraftPick;
use crate::types::{AbortReason, MatchKey, PlayerId, Stage, StartedMatch, Team};
use serde::{Deserialize, Serialize};

/// Votes for one map candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapTally {
    pub map: String,
    pub votes: usize,
}

/// Everything the engine tells the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    StageEntered {
        key: MatchKey,
        stage: Stage,
        time_left_ms: u64,
    },
    /// Ready list puts captain-role holders first
    ReadinessStatus {
        key: MatchKey,
        ready: Vec<PlayerId>,
        unresponsive: Vec<PlayerId>,
        time_left_ms: u64,
    },
    CaptainStatus {
        key: MatchKey,
        captains: Vec<PlayerId>,
        needed: usize,
        time_left_ms: u64,
    },
    DraftTurn {
        key: MatchKey,
        captain: PlayerId,
        pick_size: usize,
        undrafted: Vec<PlayerId>,
        teams: Vec<Team>,
        time_left_ms: u64,
    },
    DraftPicked {
        key: MatchKey,
        pick: DraftPick,
    },
    VoteTally {
        key: MatchKey,
        tallies: Vec<MapTally>,
        time_left_ms: u64,
    },
    MatchStarted {
        started: StartedMatch,
    },
    MatchAborted {
        key: MatchKey,
        reason: AbortReason,
        /// Removed from the queue
        removed: Vec<PlayerId>,
        /// Back in the queue with their original join time
        returned: Vec<PlayerId>,
    },
    /// Internal failure an operator should look at
    OperatorError {
        key: MatchKey,
        message: String,
    },
}

impl EngineEvent {
    pub fn key(&self) -> MatchKey {
        match self {
            EngineEvent::StageEntered { key, .. }
            | EngineEvent::ReadinessStatus { key, .. }
            | EngineEvent::CaptainStatus { key, .. }
            | EngineEvent::DraftTurn { key, .. }
            | EngineEvent::DraftPicked { key, .. }
            | EngineEvent::VoteTally { key, .. }
            | EngineEvent::MatchAborted { key, .. }
            | EngineEvent::OperatorError { key, .. } => *key,
            EngineEvent::MatchStarted { started } => started.key,
        }
    }

    /// Event name for logs and test assertions
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::StageEntered { .. } => "stage_entered",
            EngineEvent::ReadinessStatus { .. } => "readiness_status",
            EngineEvent::CaptainStatus { .. } => "captain_status",
            EngineEvent::DraftTurn { .. } => "draft_turn",
            EngineEvent::DraftPicked { .. } => "draft_picked",
            EngineEvent::VoteTally { .. } => "vote_tally",
            EngineEvent::MatchStarted { .. } => "match_started",
            EngineEvent::MatchAborted { .. } => "match_aborted",
            EngineEvent::OperatorError { .. } => "operator_error",
        }
    }
}

/// Event with delivery metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: EngineEvent,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl EventEnvelope {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            event,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Serialize the envelope to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            EngineError::Internal {
                message: format!("Failed to serialize event: {}", e),
            }
            .into()
        })
    }
}
