//! Stage controllers
//!
//! Each pre-start stage is a controller driven by the engine: `enter` runs
//! once when the stage becomes active, `tick` runs on every timer fire and
//! `handle` processes adapter callbacks (volunteers, picks, votes, activity).
//! Controllers report a `StageResult`; the engine owns transitions, timers
//! and persistence of stage handoffs.

pub mod captain;
pub mod map_vote;
pub mod readiness;
pub mod team;

pub use captain::CaptainSelectionStage;
pub use map_vote::{draw_candidates, MapVoteSession, MapVoteStage};
pub use readiness::ReadinessStage;
pub use team::TeamFormationStage;

use crate::config::{MatchConfig, StageSettings};
use crate::engine::activity::ActivityTracker;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventPublisher};
use crate::formation::{DraftSession, RandomFormer};
use crate::persistence::PersistenceGateway;
use crate::rating::RatingProvider;
use crate::types::{AbortReason, CaptainSelectionMode, PendingMatch, PickMode, PlayerId, Stage, Team};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Outcome of one controller step
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// Stay in the stage; a tick reschedules the timer
    Continue,
    /// Exit condition met, move on with the stage output
    Advance(Handoff),
    /// Unwind the match
    Abort(AbortReason),
}

/// Output handed from a finished stage to the rest of the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Handoff {
    None,
    /// Captains gathered by captain selection, possibly fewer than needed
    Captains(Vec<PlayerId>),
    Teams {
        teams: Vec<Team>,
        captains: Vec<PlayerId>,
        quality: Option<f64>,
    },
    Map(Option<String>),
}

/// Adapter callbacks routed to the active stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageInput {
    Volunteer { player_id: PlayerId, withdraw: bool },
    Pick { captain: PlayerId, players: Vec<PlayerId> },
    VoteToggle { player_id: PlayerId, map: String },
    Activity { player_id: PlayerId },
}

/// Process-local state of the active stage
#[derive(Debug, Clone, Default)]
pub enum StageState {
    #[default]
    None,
    Captains {
        eligible: Vec<PlayerId>,
        volunteers: Vec<PlayerId>,
    },
    Draft(DraftSession),
    MapVote(MapVoteSession),
}

/// Collaborators shared by every controller
pub struct StageContext {
    pub gateway: Arc<dyn PersistenceGateway>,
    pub ratings: Arc<dyn RatingProvider>,
    pub publisher: Arc<dyn EventPublisher>,
    pub activity: Arc<ActivityTracker>,
    pub settings: StageSettings,
    pub random_former: RandomFormer,
    rng: Mutex<StdRng>,
}

impl StageContext {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        ratings: Arc<dyn RatingProvider>,
        publisher: Arc<dyn EventPublisher>,
        activity: Arc<ActivityTracker>,
        settings: StageSettings,
    ) -> Self {
        Self {
            gateway,
            ratings,
            publisher,
            activity,
            settings,
            random_former: RandomFormer::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Make every random choice reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_former = RandomFormer::seeded(seed);
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Run a closure with the shared random generator
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> Result<T> {
        let mut rng = self.rng.lock().map_err(|_| EngineError::Internal {
            message: "Stage rng lock poisoned".to_string(),
        })?;
        Ok(f(&mut *rng))
    }

    /// Remaining stage time in milliseconds
    pub fn time_left_ms(&self, max_iterations: u32, iteration: u32) -> u64 {
        self.settings.time_left(max_iterations, iteration).as_millis() as u64
    }

    /// Publish an event; delivery failures are logged, never fatal
    pub async fn notify(&self, event: EngineEvent) {
        let key = event.key();
        let kind = event.kind();
        if let Err(e) = self.publisher.publish(event).await {
            warn!("Failed to publish {} for {}: {}", kind, key, e);
        }
    }
}

/// Contract every stage controller implements
#[async_trait]
pub trait StageController: Send + Sync {
    fn stage(&self) -> Stage;

    /// Iteration budget of the stage, used for time-left displays
    fn max_iterations(&self, settings: &StageSettings) -> u32;

    /// Called once when the stage becomes active
    async fn enter(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult>;

    /// Called on every timer fire after the engine re-validated the stage
    /// and bumped `pending.stage_iteration`
    async fn tick(
        &self,
        ctx: &StageContext,
        config: &MatchConfig,
        pending: &mut PendingMatch,
        state: &mut StageState,
    ) -> Result<StageResult>;

    /// Adapter callback; inputs the stage does not accept are validation
    /// failures
    async fn handle(
        &self,
        _ctx: &StageContext,
        _config: &MatchConfig,
        _pending: &mut PendingMatch,
        _state: &mut StageState,
        input: StageInput,
    ) -> Result<StageResult> {
        Err(EngineError::validation(format!(
            "{:?} is not accepted during {}",
            input,
            self.stage()
        ))
        .into())
    }

    /// Rebuild process-local state after a restart
    async fn resume(
        &self,
        _ctx: &StageContext,
        _config: &MatchConfig,
        _pending: &mut PendingMatch,
        _state: &mut StageState,
    ) -> Result<StageResult> {
        Ok(StageResult::Continue)
    }
}

static READINESS: ReadinessStage = ReadinessStage;
static CAPTAIN_SELECTION: CaptainSelectionStage = CaptainSelectionStage;
static TEAM_FORMATION: TeamFormationStage = TeamFormationStage;
static MAP_VOTE: MapVoteStage = MapVoteStage;

/// Controller for a stage; `Filling` and `Starting` have none
pub fn controller_for(stage: Stage) -> Option<&'static dyn StageController> {
    match stage {
        Stage::ReadinessCheck => Some(&READINESS),
        Stage::CaptainSelection => Some(&CAPTAIN_SELECTION),
        Stage::TeamFormation => Some(&TEAM_FORMATION),
        Stage::MapVote => Some(&MAP_VOTE),
        Stage::Filling | Stage::Starting => None,
    }
}

/// Stages a queue goes through, in order, ending with `Starting`
pub fn route(config: &MatchConfig) -> Vec<Stage> {
    let mut stages = Vec::with_capacity(5);
    if config.readiness_check {
        stages.push(Stage::ReadinessCheck);
    }
    if config.pick_mode.uses_captains()
        && config.captain_selection == CaptainSelectionMode::Manual
    {
        stages.push(Stage::CaptainSelection);
    }
    if config.pick_mode != PickMode::None {
        stages.push(Stage::TeamFormation);
    }
    if config.map_pool_id.is_some() {
        stages.push(Stage::MapVote);
    }
    stages.push(Stage::Starting);
    stages
}

/// Stage following `current` for this queue
pub fn next_stage(config: &MatchConfig, current: Stage) -> Stage {
    let route = route(config);
    let position = match current {
        Stage::Filling => return route[0],
        _ => route.iter().position(|s| *s == current),
    };
    match position {
        Some(index) => route.get(index + 1).copied().unwrap_or(Stage::Starting),
        // Not on this queue's route: skip to the first later stage
        None => route
            .into_iter()
            .find(|s| *s > current)
            .unwrap_or(Stage::Starting),
    }
}
