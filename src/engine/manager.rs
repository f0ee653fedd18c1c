//! Pickup engine: adapter entry points, stage transitions and timers
//!
//! Every inbound operation takes the registry lock for its whole duration, so
//! ticks and adapter callbacks for the same queue never interleave. Stage
//! timers live in a virtual-clock `TimerQueue`; `advance` drives it in tests
//! and `run` maps it onto tokio time in the service.

use crate::config::{MatchConfig, StageSettings};
use crate::engine::registry::PendingMatchRegistry;
use crate::engine::scheduler::{Timer, TimerQueue};
use crate::error::{is_validation, EngineError, Result};
use crate::events::EngineEvent;
use crate::metrics::{MetricsCollector, MetricsTimer};
use crate::stage::{
    controller_for, next_stage, Handoff, StageContext, StageController, StageInput, StageResult,
    StageState,
};
use crate::types::{
    AbortReason, ConfigId, GuildId, MatchKey, Participant, PendingMatch, PlayerId, Stage,
    StartedMatch,
};
use crate::utils::{current_timestamp, generate_match_id};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

/// How long the driver sleeps when no timer is scheduled
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Result of an adapter operation that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied,
    /// Nothing changed; the message says why
    Ignored(String),
}

impl Outcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Outcome::Ignored(reason.into())
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

/// Snapshot of engine activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub pending_matches: usize,
    pub by_stage: BTreeMap<String, usize>,
    pub scheduled_timers: usize,
    /// Virtual clock position in milliseconds
    pub clock_ms: u64,
}

/// What a startup reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub resumed: usize,
    pub recovery_gaps: usize,
    /// Rows cleared without resuming (filling matches, vanished queues)
    pub cleared: usize,
    /// Registry entries dropped because their row was gone
    pub dropped: usize,
    pub failed: usize,
}

/// Drives pending matches from a full queue to a started match
pub struct PickupEngine {
    pub(super) ctx: StageContext,
    pub(super) registry: Mutex<PendingMatchRegistry>,
    pub(super) timers: StdMutex<TimerQueue>,
    /// Real-time origin of the virtual clock once `run` is active
    realtime_origin: StdMutex<Option<(tokio::time::Instant, Duration)>>,
    timer_changed: Notify,
    pub(super) metrics: Arc<MetricsCollector>,
}

impl PickupEngine {
    pub fn new(ctx: StageContext, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            ctx,
            registry: Mutex::new(PendingMatchRegistry::new()),
            timers: StdMutex::new(TimerQueue::new()),
            realtime_origin: StdMutex::new(None),
            timer_changed: Notify::new(),
            metrics,
        }
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub fn settings(&self) -> &StageSettings {
        &self.ctx.settings
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    // ---- timers ----

    /// Current position of the virtual clock
    pub fn now(&self) -> Duration {
        self.timers.lock().map(|t| t.now()).unwrap_or_default()
    }

    pub fn is_scheduled(&self, key: MatchKey) -> bool {
        self.timers
            .lock()
            .map(|t| t.is_scheduled(key))
            .unwrap_or(false)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.lock().ok().and_then(|t| t.next_deadline())
    }

    fn schedule(&self, key: MatchKey, stage: Stage) -> Result<()> {
        let realtime_now = self
            .realtime_origin
            .lock()
            .ok()
            .and_then(|origin| origin.map(|(start, base)| base + start.elapsed()));

        let mut timers = self.timers.lock().map_err(|_| EngineError::Internal {
            message: "Failed to acquire timer queue lock".to_string(),
        })?;
        if let Some(now) = realtime_now {
            timers.advance_clock(now);
        }
        timers.schedule(key, stage, self.ctx.settings.iteration_time());
        drop(timers);

        self.timer_changed.notify_one();
        Ok(())
    }

    pub(super) fn cancel_timer(&self, key: MatchKey) {
        match self.timers.lock() {
            Ok(mut timers) => {
                timers.cancel(key);
            }
            Err(_) => error!("Failed to acquire timer queue lock to cancel {}", key),
        }
    }

    fn pop_due(&self, until: Duration) -> Option<Timer> {
        self.timers.lock().ok().and_then(|mut t| t.pop_due(until))
    }

    /// Move the virtual clock forward, firing every timer that falls due
    pub async fn advance(&self, by: Duration) {
        let target = self.now() + by;
        self.advance_to(target).await;
    }

    /// Fire every timer due up to `target`, in deadline order
    pub async fn advance_to(&self, target: Duration) {
        while let Some(timer) = self.pop_due(target) {
            if let Err(e) = self.tick(timer.key, timer.stage).await {
                warn!("Tick for {} in {} failed: {:#}", timer.key, timer.stage, e);
            }
        }
        if let Ok(mut timers) = self.timers.lock() {
            timers.advance_clock(target);
        }
    }

    /// Fire timers against wall-clock time until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now();
        let base = self.now();
        if let Ok(mut origin) = self.realtime_origin.lock() {
            *origin = Some((start, base));
        }
        info!("Pickup engine driver started");

        loop {
            let elapsed = base + start.elapsed();
            self.advance_to(elapsed).await;

            let wait = self
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(elapsed))
                .unwrap_or(IDLE_POLL);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.timer_changed.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Ok(mut origin) = self.realtime_origin.lock() {
            *origin = None;
        }
        info!("Pickup engine driver stopped");
    }

    // ---- inbound operations ----

    /// A queue reached capacity; start a pending match for it
    pub async fn on_capacity_reached(&self, key: MatchKey) -> Result<Outcome> {
        let timer = self.metrics.start_timer();
        let mut registry = self.registry.lock().await;
        let outcome = self.begin_progression(&mut registry, key).await;
        self.finish(&mut registry, "capacity_reached", timer).await;
        outcome
    }

    pub async fn on_captain_volunteer(
        &self,
        key: MatchKey,
        player_id: impl Into<PlayerId>,
        withdraw: bool,
    ) -> Result<Outcome> {
        let input = StageInput::Volunteer {
            player_id: player_id.into(),
            withdraw,
        };
        self.dispatch(key, input, "captain_volunteer").await
    }

    pub async fn on_draft_pick(
        &self,
        key: MatchKey,
        captain: impl Into<PlayerId>,
        players: Vec<PlayerId>,
    ) -> Result<Outcome> {
        let input = StageInput::Pick {
            captain: captain.into(),
            players,
        };
        self.dispatch(key, input, "draft_pick").await
    }

    pub async fn on_map_vote_toggle(
        &self,
        key: MatchKey,
        player_id: impl Into<PlayerId>,
        map: impl Into<String>,
    ) -> Result<Outcome> {
        let input = StageInput::VoteToggle {
            player_id: player_id.into(),
            map: map.into(),
        };
        self.dispatch(key, input, "map_vote_toggle").await
    }

    /// Record activity and let any readiness check in the guild re-evaluate
    pub async fn on_participant_activity(
        &self,
        guild_id: GuildId,
        player_id: impl Into<PlayerId>,
    ) -> Result<Outcome> {
        let player_id = player_id.into();
        self.ctx
            .activity
            .record(guild_id, &player_id, current_timestamp())?;

        let timer = self.metrics.start_timer();
        let mut registry = self.registry.lock().await;
        let keys: Vec<MatchKey> = registry
            .keys_for_guild(guild_id)
            .into_iter()
            .filter(|key| {
                registry
                    .get(key)
                    .map(|entry| entry.stage == Stage::ReadinessCheck)
                    .unwrap_or(false)
            })
            .collect();

        let mut outcome = Ok(Outcome::Applied);
        for key in keys {
            let input = StageInput::Activity {
                player_id: player_id.clone(),
            };
            match self.dispatch_locked(&mut registry, key, input).await {
                Ok(_) => {}
                Err(e) => outcome = Err(e),
            }
        }

        self.finish(&mut registry, "participant_activity", timer).await;
        outcome
    }

    /// Clock tick for one pending match; stale timers are ignored without
    /// touching the iteration counter
    pub async fn tick(&self, key: MatchKey, expected: Stage) -> Result<Outcome> {
        let timer = self.metrics.start_timer();
        let mut registry = self.registry.lock().await;
        let outcome = self.tick_locked(&mut registry, key, expected).await;
        self.finish(&mut registry, "tick", timer).await;
        outcome
    }

    /// Rebuild the registry from persisted pending matches after a restart
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let timer = self.metrics.start_timer();
        let mut registry = self.registry.lock().await;
        let outcome = self.reconcile_locked(&mut registry).await;
        self.finish(&mut registry, "reconcile", timer).await;

        if let Ok(report) = &outcome {
            info!(
                "Reconciled pending matches: {} resumed, {} recovery gaps, {} cleared, {} dropped, {} failed",
                report.resumed, report.recovery_gaps, report.cleared, report.dropped, report.failed
            );
        }
        outcome
    }

    pub async fn stats(&self) -> EngineStats {
        let registry = self.registry.lock().await;
        let (scheduled_timers, clock) = self
            .timers
            .lock()
            .map(|t| (t.len(), t.now()))
            .unwrap_or_default();

        EngineStats {
            pending_matches: registry.len(),
            by_stage: registry
                .stage_counts()
                .into_iter()
                .map(|(stage, count)| (stage.as_str().to_string(), count))
                .collect(),
            scheduled_timers,
            clock_ms: clock.as_millis() as u64,
        }
    }

    /// Stage the engine currently tracks for a queue
    pub async fn stage_of(&self, key: MatchKey) -> Option<Stage> {
        self.registry.lock().await.get(&key).map(|entry| entry.stage)
    }

    pub async fn pending_keys(&self) -> Vec<MatchKey> {
        self.registry.lock().await.keys()
    }

    // ---- internals ----

    async fn dispatch(&self, key: MatchKey, input: StageInput, operation: &str) -> Result<Outcome> {
        let timer = self.metrics.start_timer();
        let mut registry = self.registry.lock().await;
        let outcome = self.dispatch_locked(&mut registry, key, input).await;
        self.finish(&mut registry, operation, timer).await;
        outcome
    }

    async fn dispatch_locked(
        &self,
        registry: &mut PendingMatchRegistry,
        key: MatchKey,
        input: StageInput,
    ) -> Result<Outcome> {
        let Some(entry) = registry.get(&key) else {
            return Ok(Outcome::ignored(format!("No pending match for {}", key)));
        };
        let stage = entry.stage;
        let config = entry.config.clone();
        let Some(controller) = controller_for(stage) else {
            return Ok(Outcome::ignored(format!("{} takes no input during {}", key, stage)));
        };

        let mut pending = match self.ctx.gateway.get_pending_match(key).await {
            Ok(Some(pending)) if pending.stage == stage => pending,
            Ok(_) => {
                return Ok(Outcome::ignored(format!(
                    "Pending match for {} is no longer in {}",
                    key, stage
                )))
            }
            Err(e) => {
                self.fail_safe(registry, key, &e).await;
                return Err(e);
            }
        };

        let mut state = registry.take_state(&key);
        match controller
            .handle(&self.ctx, &config, &mut pending, &mut state, input)
            .await
        {
            Ok(result) => {
                if let Err(e) = self
                    .drive(registry, &config, pending, state, result, false)
                    .await
                {
                    self.fail_safe(registry, key, &e).await;
                    return Err(e);
                }
                Ok(Outcome::Applied)
            }
            Err(e) if is_validation(&e) => {
                registry.put_state(&key, state);
                debug!("Rejected input for {}: {}", key, e);
                Ok(Outcome::Ignored(e.to_string()))
            }
            Err(e) => {
                self.fail_safe(registry, key, &e).await;
                Err(e)
            }
        }
    }

    async fn tick_locked(
        &self,
        registry: &mut PendingMatchRegistry,
        key: MatchKey,
        expected: Stage,
    ) -> Result<Outcome> {
        let Some(entry) = registry.get(&key) else {
            debug!("Stale tick for {}: no pending match", key);
            return Ok(Outcome::ignored("No pending match"));
        };
        if entry.stage != expected {
            debug!(
                "Stale tick for {}: expected {}, match is in {}",
                key, expected, entry.stage
            );
            return Ok(Outcome::ignored("Pending match already left the stage"));
        }
        let config = entry.config.clone();
        let Some(controller) = controller_for(expected) else {
            return Ok(Outcome::ignored(format!("{} has no timer", expected)));
        };

        let pending = match self.ctx.gateway.get_pending_match(key).await {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                warn!("Pending match row for {} disappeared, dropping it", key);
                self.cancel_timer(key);
                registry.remove(&key);
                return Ok(Outcome::ignored("No persisted pending match"));
            }
            Err(e) => {
                self.fail_safe(registry, key, &e).await;
                return Err(e);
            }
        };
        if pending.stage != expected {
            debug!(
                "Stale tick for {}: persisted stage is {}",
                key, pending.stage
            );
            return Ok(Outcome::ignored("Persisted stage changed"));
        }

        if let Err(e) = self
            .run_tick(registry, &config, controller, pending)
            .await
        {
            self.fail_safe(registry, key, &e).await;
            return Err(e);
        }
        Ok(Outcome::Applied)
    }

    async fn run_tick(
        &self,
        registry: &mut PendingMatchRegistry,
        config: &MatchConfig,
        controller: &'static dyn StageController,
        mut pending: PendingMatch,
    ) -> Result<()> {
        let key = pending.key;
        pending.stage_iteration = self.ctx.gateway.increment_iteration(key).await?;
        debug!(
            "Tick {} for {} in {}",
            pending.stage_iteration, key, pending.stage
        );

        let mut state = registry.take_state(&key);
        let result = controller
            .tick(&self.ctx, config, &mut pending, &mut state)
            .await?;
        self.drive(registry, config, pending, state, result, true)
            .await
    }

    pub(super) async fn begin_progression(
        &self,
        registry: &mut PendingMatchRegistry,
        key: MatchKey,
    ) -> Result<Outcome> {
        if registry.contains(&key) {
            return Ok(Outcome::ignored(format!("{} is already progressing", key)));
        }
        let gateway = &self.ctx.gateway;
        let Some(config) = gateway.match_config(key).await? else {
            return Ok(Outcome::ignored(format!("Unknown queue {}", key)));
        };
        if gateway.get_pending_match(key).await?.is_some() {
            return Ok(Outcome::ignored(format!(
                "{} already has a persisted pending match",
                key
            )));
        }

        let members = gateway.queue_members(key).await?;
        if members.len() < config.player_count {
            return Ok(Outcome::ignored(format!(
                "Queue {} has {}/{} members",
                key,
                members.len(),
                config.player_count
            )));
        }

        let mut participants: Vec<Participant> =
            members.into_iter().take(config.player_count).collect();
        for participant in participants.iter_mut() {
            participant.rating = self.ctx.ratings.rating_of(&participant.id).await?;
        }

        let pending = PendingMatch::new(key, participants, current_timestamp());
        gateway.create_pending_match(&pending).await?;
        registry.insert(key, config.clone(), Stage::Filling);
        info!(
            "Queue '{}' ({}) is full with {} participants, starting progression",
            config.name, key, config.player_count
        );

        if let Err(e) = self
            .drive(
                registry,
                &config,
                pending,
                StageState::None,
                StageResult::Advance(Handoff::None),
                false,
            )
            .await
        {
            self.fail_safe(registry, key, &e).await;
            return Err(e);
        }
        Ok(Outcome::Applied)
    }

    async fn reconcile_locked(
        &self,
        registry: &mut PendingMatchRegistry,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let persisted = self.ctx.gateway.pending_matches().await?;
        let persisted_keys: HashSet<MatchKey> = persisted.iter().map(|p| p.key).collect();

        for key in registry.keys() {
            if !persisted_keys.contains(&key) {
                warn!("Dropping {} from the registry: its pending row is gone", key);
                self.cancel_timer(key);
                registry.remove(&key);
                report.dropped += 1;
            }
        }

        for mut pending in persisted {
            let key = pending.key;
            if registry.contains(&key) {
                continue;
            }

            // A failing row is force-cleared on its own; the rest still resume
            let config = match self.ctx.gateway.match_config(key).await {
                Ok(Some(config)) => config,
                Ok(None) => {
                    warn!("Queue {} no longer exists, clearing its pending match", key);
                    match self.ctx.gateway.clear_match(key).await {
                        Ok(()) => report.cleared += 1,
                        Err(e) => {
                            self.fail_safe(registry, key, &e).await;
                            report.failed += 1;
                        }
                    }
                    continue;
                }
                Err(e) => {
                    self.fail_safe(registry, key, &e).await;
                    report.failed += 1;
                    continue;
                }
            };

            match pending.stage {
                Stage::Filling => {
                    debug!("Clearing filling pending match for {}", key);
                    match self.ctx.gateway.clear_match(key).await {
                        Ok(()) => {
                            registry.queue_refill(key);
                            report.cleared += 1;
                        }
                        Err(e) => {
                            self.fail_safe(registry, key, &e).await;
                            report.failed += 1;
                        }
                    }
                }
                Stage::Starting => {
                    registry.insert(key, config.clone(), Stage::Starting);
                    match self.start_match(registry, &config, pending).await {
                        Ok(()) => report.resumed += 1,
                        Err(e) => {
                            self.fail_safe(registry, key, &e).await;
                            report.failed += 1;
                        }
                    }
                }
                stage => {
                    let Some(controller) = controller_for(stage) else {
                        continue;
                    };
                    registry.insert(key, config.clone(), stage);

                    let mut state = StageState::None;
                    let resumed = match controller
                        .resume(&self.ctx, &config, &mut pending, &mut state)
                        .await
                    {
                        Ok(result) => {
                            if result == StageResult::Abort(AbortReason::RecoveryGap) {
                                warn!("{}", EngineError::RecoveryGap { key });
                                report.recovery_gaps += 1;
                            } else {
                                info!("Resumed {} in {} at tick {}", key, stage, pending.stage_iteration);
                                report.resumed += 1;
                            }
                            self.drive(registry, &config, pending, state, result, true)
                                .await
                        }
                        Err(e) => Err(e),
                    };

                    if let Err(e) = resumed {
                        self.fail_safe(registry, key, &e).await;
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Apply a controller result, following advances until a stage settles
    async fn drive(
        &self,
        registry: &mut PendingMatchRegistry,
        config: &MatchConfig,
        mut pending: PendingMatch,
        mut state: StageState,
        mut result: StageResult,
        mut reschedule: bool,
    ) -> Result<()> {
        let key = pending.key;
        loop {
            match result {
                StageResult::Continue => {
                    registry.update(key, pending.stage, state);
                    if reschedule {
                        self.schedule(key, pending.stage)?;
                    }
                    return Ok(());
                }
                StageResult::Abort(reason) => {
                    return self.unwind(registry, pending, reason).await;
                }
                StageResult::Advance(handoff) => {
                    self.cancel_timer(key);
                    self.apply_handoff(&mut pending, handoff).await?;

                    let next = next_stage(config, pending.stage);
                    if next == Stage::Starting {
                        return self.start_match(registry, config, pending).await;
                    }

                    self.ctx.gateway.set_stage(key, next).await?;
                    pending.stage = next;
                    pending.stage_iteration = 0;
                    pending.stage_entered_at = current_timestamp();
                    registry.update(key, next, StageState::None);
                    self.metrics.record_stage_entered(next.as_str());

                    let controller = controller_for(next).ok_or_else(|| EngineError::Internal {
                        message: format!("No controller for stage {}", next),
                    })?;
                    info!("Pending match {} entered {}", key, next);
                    self.ctx
                        .notify(EngineEvent::StageEntered {
                            key,
                            stage: next,
                            time_left_ms: self
                                .ctx
                                .time_left_ms(controller.max_iterations(&self.ctx.settings), 0),
                        })
                        .await;

                    state = StageState::None;
                    result = controller
                        .enter(&self.ctx, config, &mut pending, &mut state)
                        .await?;
                    reschedule = true;
                }
            }
        }
    }

    async fn apply_handoff(&self, pending: &mut PendingMatch, handoff: Handoff) -> Result<()> {
        let key = pending.key;
        let gateway = &self.ctx.gateway;
        match handoff {
            Handoff::None => {}
            Handoff::Captains(captains) => {
                gateway
                    .record_teams(key, &pending.teams, Some(&captains))
                    .await?;
                pending.captains = captains;
            }
            Handoff::Teams {
                teams,
                captains,
                quality,
            } => {
                gateway.record_teams(key, &teams, Some(&captains)).await?;
                gateway.set_match_quality(key, quality).await?;
                gateway.set_captain_turn(key, None).await?;
                pending.teams = teams;
                pending.captains = captains;
                pending.match_quality = quality;
                pending.captain_turn = None;
            }
            Handoff::Map(map) => {
                gateway.set_map(key, map.as_deref()).await?;
                pending.map = map;
            }
        }
        Ok(())
    }

    /// Finalize a pending match into a started match
    async fn start_match(
        &self,
        registry: &mut PendingMatchRegistry,
        config: &MatchConfig,
        pending: PendingMatch,
    ) -> Result<()> {
        let key = pending.key;
        let gateway = &self.ctx.gateway;
        if pending.stage != Stage::Starting {
            gateway.set_stage(key, Stage::Starting).await?;
        }

        let started = StartedMatch {
            match_id: generate_match_id(),
            key,
            queue_name: config.name.clone(),
            participants: pending.participants,
            teams: pending.teams,
            captains: pending.captains,
            map: pending.map,
            match_quality: pending.match_quality,
            started_at: current_timestamp(),
        };
        gateway.record_started_match(&started).await?;
        gateway.clear_match(key).await?;

        self.cancel_timer(key);
        registry.remove(&key);
        self.metrics.record_stage_entered(Stage::Starting.as_str());
        self.metrics.record_match_started(config.pick_mode.as_str());
        info!(
            "Match {} started for queue '{}' ({}) with {} participants on {}",
            started.match_id,
            config.name,
            key,
            started.participants.len(),
            started.map.as_deref().unwrap_or("no map")
        );

        self.ctx
            .notify(EngineEvent::MatchStarted { started })
            .await;
        registry.queue_refill(key);
        Ok(())
    }

    /// Restart progressions for queues freed by starts and aborts
    async fn process_refills(&self, registry: &mut PendingMatchRegistry) {
        while let Some(key) = registry.next_refill() {
            match self.begin_progression(registry, key).await {
                Ok(Outcome::Applied) => info!("Queue {} refilled, progression restarted", key),
                Ok(Outcome::Ignored(reason)) => debug!("No refill for {}: {}", key, reason),
                Err(e) => warn!("Refill for {} failed: {:#}", key, e),
            }
        }
    }

    async fn finish(&self, registry: &mut PendingMatchRegistry, operation: &str, timer: MetricsTimer) {
        self.process_refills(registry).await;
        self.metrics.set_pending_matches(registry.len());
        self.metrics.record_operation(operation, timer.stop());
    }

    /// Unwind matches of a guild (or one queue) that include the player
    pub async fn on_participant_unavailable(
        &self,
        guild_id: GuildId,
        player_id: impl Into<PlayerId>,
        config_id: Option<ConfigId>,
    ) -> Result<Outcome> {
        let player_id = player_id.into();
        let timer = self.metrics.start_timer();
        let mut registry = self.registry.lock().await;
        let outcome = self
            .participant_unavailable_locked(&mut registry, guild_id, &player_id, config_id)
            .await;
        self.finish(&mut registry, "participant_unavailable", timer)
            .await;
        outcome
    }

    /// Operator cancel; nobody is removed from the queue
    pub async fn force_cancel(&self, keys: &[MatchKey], reason: &str) -> Result<usize> {
        let timer = self.metrics.start_timer();
        let mut registry = self.registry.lock().await;
        let outcome = self.force_cancel_locked(&mut registry, keys, reason).await;
        self.finish(&mut registry, "force_cancel", timer).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ActivityTracker;
    use crate::events::MockEventPublisher;
    use crate::persistence::{InMemoryGateway, PersistenceGateway};
    use crate::rating::provider::MockRatingProvider;
    use crate::types::{PickMode, PlayerRating};
    use chrono::Duration as ChronoDuration;

    fn member(id: &str, minutes_ago: i64) -> Participant {
        Participant {
            id: id.to_string(),
            display_name: id.to_string(),
            rating: PlayerRating::default(),
            joined_at: current_timestamp() - ChronoDuration::minutes(minutes_ago),
            captain_role: false,
        }
    }

    fn engine_with(ratings: MockRatingProvider) -> (PickupEngine, Arc<InMemoryGateway>, MatchKey) {
        let gateway = Arc::new(InMemoryGateway::new());
        let key = gateway
            .add_match_config(1, MatchConfig::new(1, "2v2", 4, 2, PickMode::SkillBased))
            .unwrap();
        for (index, id) in ["a", "b", "c", "d"].iter().enumerate() {
            gateway.add_queue_member(key, member(id, 10 - index as i64)).unwrap();
        }

        let ctx = StageContext::new(
            gateway.clone(),
            Arc::new(ratings),
            Arc::new(MockEventPublisher::new()),
            Arc::new(ActivityTracker::new()),
            StageSettings::default(),
        )
        .with_seed(5);
        let engine = PickupEngine::new(ctx, Arc::new(MetricsCollector::new().unwrap()));
        (engine, gateway, key)
    }

    #[tokio::test]
    async fn test_ratings_are_refreshed_when_the_match_begins() {
        let mut ratings = MockRatingProvider::new();
        ratings.expect_rating_of().times(4).returning(|id| {
            let rating = match id.as_str() {
                "a" => 1900.0,
                "b" => 1100.0,
                "c" => 1500.0,
                _ => 1500.0,
            };
            Ok(PlayerRating {
                rating,
                uncertainty: 100.0,
            })
        });
        ratings.expect_match_quality().returning(|_| 0.75);
        let (engine, gateway, key) = engine_with(ratings);

        let outcome = engine.on_capacity_reached(key).await.unwrap();
        assert!(outcome.is_applied());

        let started = gateway.started_matches().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].match_quality, Some(0.75));
        // 1900 + 1100 against 1500 + 1500
        let team_of = |id: &str| {
            started[0]
                .teams
                .iter()
                .position(|t| t.members.iter().any(|m| m == id))
        };
        assert_eq!(team_of("a"), team_of("b"));
        assert_eq!(team_of("c"), team_of("d"));
    }

    #[tokio::test]
    async fn test_rating_failure_leaves_the_queue_untouched() {
        let mut ratings = MockRatingProvider::new();
        ratings
            .expect_rating_of()
            .returning(|_| Err(anyhow::anyhow!("rating service unavailable")));
        ratings.expect_match_quality().never();
        let (engine, gateway, key) = engine_with(ratings);

        assert!(engine.on_capacity_reached(key).await.is_err());
        assert!(gateway.get_pending_match(key).await.unwrap().is_none());
        assert_eq!(gateway.queue_members(key).await.unwrap().len(), 4);
        assert_eq!(engine.stats().await.pending_matches, 0);
    }

    #[tokio::test]
    async fn test_stale_tick_without_pending_match_is_ignored() {
        let (engine, _gateway, key) = engine_with(MockRatingProvider::new());
        let outcome = engine.tick(key, Stage::MapVote).await.unwrap();
        assert!(matches!(outcome, Outcome::Ignored(_)));
        assert_eq!(engine.next_deadline(), None);
    }
}
