//! Common types used throughout the pickup engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillratings::weng_lin::WengLinRating;
use uuid::Uuid;

/// Unique identifier for participants
pub type PlayerId = String;

/// Chat-platform guild (server) identifier
pub type GuildId = u64;

/// Identifier of a queue definition within a guild
pub type ConfigId = u64;

/// Identifier of a map pool
pub type MapPoolId = u64;

/// Unique identifier for started matches
pub type MatchId = Uuid;

/// Registry key: one pending match per queue definition per guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    pub guild_id: GuildId,
    pub config_id: ConfigId,
}

impl MatchKey {
    pub fn new(guild_id: GuildId, config_id: ConfigId) -> Self {
        Self {
            guild_id,
            config_id,
        }
    }
}

impl std::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "guild={} config={}", self.guild_id, self.config_id)
    }
}

/// Rating information for a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub rating: f64,
    pub uncertainty: f64,
}

impl Default for PlayerRating {
    fn default() -> Self {
        Self {
            rating: 1500.0,
            uncertainty: 200.0,
        }
    }
}

impl From<WengLinRating> for PlayerRating {
    fn from(rating: WengLinRating) -> Self {
        Self {
            rating: rating.rating,
            uncertainty: rating.uncertainty,
        }
    }
}

impl From<PlayerRating> for WengLinRating {
    fn from(rating: PlayerRating) -> Self {
        Self {
            rating: rating.rating,
            uncertainty: rating.uncertainty,
        }
    }
}

/// A queued participant as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: PlayerId,
    pub display_name: String,
    pub rating: PlayerRating,
    /// Original queue-join time, restored when a match unwinds
    pub joined_at: DateTime<Utc>,
    /// Holds the designated captain role for this queue
    pub captain_role: bool,
}

/// Stages a pending match moves through before it starts, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Filling,
    ReadinessCheck,
    CaptainSelection,
    TeamFormation,
    MapVote,
    Starting,
}

impl Stage {
    /// Stable label used for logs, metrics and persisted rows
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Filling => "filling",
            Stage::ReadinessCheck => "readiness_check",
            Stage::CaptainSelection => "captain_selection",
            Stage::TeamFormation => "team_formation",
            Stage::MapVote => "map_vote",
            Stage::Starting => "starting",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How teams are formed once the match is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickMode {
    /// No teams; the match starts with a flat participant list
    None,
    /// Captains draft their teams interactively
    Manual,
    Random,
    /// Minimum skill difference between teams
    SkillBased,
    /// Captains are chosen and the draft is played out automatically
    AutoPick,
}

impl PickMode {
    /// Whether this mode needs captains
    pub fn uses_captains(&self) -> bool {
        matches!(self, PickMode::Manual | PickMode::AutoPick)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PickMode::None => "none",
            PickMode::Manual => "manual",
            PickMode::Random => "random",
            PickMode::SkillBased => "skill_based",
            PickMode::AutoPick => "auto_pick",
        }
    }
}

/// How captains are gathered before a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptainSelectionMode {
    /// Eligible participants volunteer during a timed stage
    Manual,
    /// Captains are determined when team formation begins
    Automatic,
}

/// A team, built incrementally during team formation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub captain: Option<PlayerId>,
    /// Includes the captain when there is one
    pub members: Vec<PlayerId>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            captain: None,
            members: Vec::new(),
        }
    }

    /// Create a team led by a captain
    pub fn with_captain(name: impl Into<String>, captain: PlayerId) -> Self {
        Self {
            name: name.into(),
            captain: Some(captain.clone()),
            members: vec![captain],
        }
    }
}

/// One queue instance progressing toward start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMatch {
    pub key: MatchKey,
    pub stage: Stage,
    pub stage_entered_at: DateTime<Utc>,
    /// Elapsed timer ticks within the current stage
    pub stage_iteration: u32,
    pub participants: Vec<Participant>,
    pub teams: Vec<Team>,
    /// Draft order once captains are known
    pub captains: Vec<PlayerId>,
    pub captain_turn: Option<PlayerId>,
    /// Participants still failing the readiness check
    pub unresponsive: Vec<PlayerId>,
    pub map: Option<String>,
    pub match_quality: Option<f64>,
}

impl PendingMatch {
    pub fn new(key: MatchKey, participants: Vec<Participant>, now: DateTime<Utc>) -> Self {
        Self {
            key,
            stage: Stage::Filling,
            stage_entered_at: now,
            stage_iteration: 0,
            participants,
            teams: Vec::new(),
            captains: Vec::new(),
            captain_turn: None,
            unresponsive: Vec::new(),
            map: None,
            match_quality: None,
        }
    }

    pub fn participant(&self, player_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == player_id)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.participant(player_id).is_some()
    }

    pub fn participant_ids(&self) -> Vec<PlayerId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }
}

/// Why a pending match was unwound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// A participant left the queue, the server, or went offline
    ParticipantUnavailable { player_id: PlayerId },
    /// Participants failed the readiness check in time
    Unresponsive { player_ids: Vec<PlayerId> },
    /// A captain did not pick before the turn timed out
    CaptainTimedOut { captain: PlayerId },
    /// Cancelled by an operator, e.g. the queue definition was deleted
    ForceCancelled { reason: String },
    /// In-flight state could not be rebuilt after a restart
    RecoveryGap,
    PersistenceFailure,
    /// Progression failed for a reason other than storage, e.g. a queue
    /// whose size cannot be split into its teams
    InternalError,
}

impl AbortReason {
    /// Stable label for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::ParticipantUnavailable { .. } => "participant_unavailable",
            AbortReason::Unresponsive { .. } => "unresponsive",
            AbortReason::CaptainTimedOut { .. } => "captain_timed_out",
            AbortReason::ForceCancelled { .. } => "force_cancelled",
            AbortReason::RecoveryGap => "recovery_gap",
            AbortReason::PersistenceFailure => "persistence_failure",
            AbortReason::InternalError => "internal_error",
        }
    }

    /// Participants the unwind removes from the queue
    pub fn departing(&self) -> Vec<PlayerId> {
        match self {
            AbortReason::ParticipantUnavailable { player_id } => vec![player_id.clone()],
            AbortReason::Unresponsive { player_ids } => player_ids.clone(),
            AbortReason::CaptainTimedOut { captain } => vec![captain.clone()],
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::ParticipantUnavailable { player_id } => {
                write!(f, "{} is no longer available", player_id)
            }
            AbortReason::Unresponsive { player_ids } => {
                write!(f, "{} did not ready up", player_ids.join(", "))
            }
            AbortReason::CaptainTimedOut { captain } => write!(f, "captain {} did not pick in time", captain),
            AbortReason::ForceCancelled { reason } => write!(f, "cancelled: {}", reason),
            AbortReason::RecoveryGap => f.write_str("match could not be recovered after a restart"),
            AbortReason::PersistenceFailure => f.write_str("match state could not be saved"),
            AbortReason::InternalError => f.write_str("match could not continue after an internal error"),
        }
    }
}

/// Final payload of a match that made it through every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedMatch {
    pub match_id: MatchId,
    pub key: MatchKey,
    pub queue_name: String,
    pub participants: Vec<Participant>,
    pub teams: Vec<Team>,
    pub captains: Vec<PlayerId>,
    pub map: Option<String>,
    pub match_quality: Option<f64>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_key_display() {
        let key = MatchKey::new(7, 42);
        assert_eq!(key.to_string(), "guild=7 config=42");
    }

    #[test]
    fn test_stage_labels_round_trip_through_serde() {
        let json = serde_json::to_string(&Stage::ReadinessCheck).unwrap();
        assert_eq!(json, "\"readiness_check\"");
        assert_eq!(Stage::MapVote.to_string(), "map_vote");
    }

    #[test]
    fn test_pick_mode_captains() {
        assert!(PickMode::Manual.uses_captains());
        assert!(PickMode::AutoPick.uses_captains());
        assert!(!PickMode::SkillBased.uses_captains());
        assert!(!PickMode::None.uses_captains());
    }

    #[test]
    fn test_abort_reason_departing() {
        let reason = AbortReason::Unresponsive {
            player_ids: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(reason.departing().len(), 2);
        assert_eq!(reason.as_str(), "unresponsive");
        assert!(AbortReason::RecoveryGap.departing().is_empty());
    }

    #[test]
    fn test_team_with_captain_includes_captain() {
        let team = Team::with_captain("A", "cap".to_string());
        assert_eq!(team.members, vec!["cap".to_string()]);
        assert_eq!(team.captain.as_deref(), Some("cap"));
    }
}
