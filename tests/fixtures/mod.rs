//! Test fixtures for engine integration tests

#![allow(dead_code)]

use chrono::Duration as ChronoDuration;
use pickup_engine::config::{MatchConfig, RatingSettings, StageSettings};
use pickup_engine::engine::{ActivityTracker, PickupEngine};
use pickup_engine::events::{EngineEvent, MapTally, MockEventPublisher};
use pickup_engine::metrics::MetricsCollector;
use pickup_engine::persistence::{InMemoryGateway, PersistenceGateway};
use pickup_engine::rating::{InMemoryRatingStorage, RatingEntry, RatingStorage, WengLinRatingProvider};
use pickup_engine::stage::StageContext;
use pickup_engine::types::{
    AbortReason, GuildId, MatchKey, Participant, PendingMatch, PlayerId, PlayerRating, StartedMatch,
};
use pickup_engine::utils::current_timestamp;
use std::sync::Arc;
use std::time::Duration;

pub const GUILD: GuildId = 1;
pub const SEED: u64 = 42;

/// Stage settings with a one-second tick
pub fn test_settings() -> StageSettings {
    StageSettings {
        iteration_time_ms: 1_000,
        ..StageSettings::default()
    }
}

/// Participant who joined `minutes_ago` minutes ago
pub fn participant(id: &str, rating: f64, minutes_ago: i64) -> Participant {
    Participant {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        rating: PlayerRating {
            rating,
            uncertainty: 200.0,
        },
        joined_at: current_timestamp() - ChronoDuration::minutes(minutes_ago),
        captain_role: false,
    }
}

/// Engine wired to in-memory collaborators with a fixed seed
pub struct TestSystem {
    pub engine: Arc<PickupEngine>,
    pub gateway: Arc<InMemoryGateway>,
    pub publisher: Arc<MockEventPublisher>,
    pub ratings: Arc<InMemoryRatingStorage>,
    pub activity: Arc<ActivityTracker>,
    pub metrics: Arc<MetricsCollector>,
    settings: StageSettings,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: StageSettings) -> Self {
        Self::assemble(
            Arc::new(InMemoryGateway::new()),
            Arc::new(InMemoryRatingStorage::new()),
            settings,
        )
    }

    fn assemble(
        gateway: Arc<InMemoryGateway>,
        ratings: Arc<InMemoryRatingStorage>,
        settings: StageSettings,
    ) -> Self {
        let publisher = Arc::new(MockEventPublisher::new());
        let activity = Arc::new(ActivityTracker::new());
        let provider = Arc::new(
            WengLinRatingProvider::new(&RatingSettings::default(), ratings.clone()).unwrap(),
        );
        let ctx = StageContext::new(
            gateway.clone(),
            provider,
            publisher.clone(),
            activity.clone(),
            settings.clone(),
        )
        .with_seed(SEED);
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let engine = Arc::new(PickupEngine::new(ctx, metrics.clone()));

        Self {
            engine,
            gateway,
            publisher,
            ratings,
            activity,
            metrics,
            settings,
        }
    }

    /// Fresh engine over the same persisted state, as after a process restart
    pub fn restart(&self) -> Self {
        Self::assemble(
            self.gateway.clone(),
            self.ratings.clone(),
            self.settings.clone(),
        )
    }

    pub fn add_queue(&self, config: MatchConfig) -> MatchKey {
        self.gateway.add_match_config(GUILD, config).unwrap()
    }

    /// Add a queue member and register their rating
    pub fn join(&self, key: MatchKey, participant: Participant) {
        self.ratings
            .store_rating(RatingEntry::new(
                participant.id.clone(),
                participant.rating.clone(),
            ))
            .unwrap();
        self.gateway.add_queue_member(key, participant).unwrap();
    }

    /// Queue `p0..pN` in join order with the given ratings
    pub fn fill_queue(&self, key: MatchKey, ratings: &[f64]) -> Vec<PlayerId> {
        let count = ratings.len() as i64;
        ratings
            .iter()
            .enumerate()
            .map(|(index, rating)| {
                let id = format!("p{}", index);
                self.join(key, participant(&id, *rating, count - index as i64));
                id
            })
            .collect()
    }

    pub fn tick_length(&self) -> Duration {
        self.settings.iteration_time()
    }

    /// Advance the virtual clock by `ticks` stage ticks
    pub async fn advance_ticks(&self, ticks: u32) {
        for _ in 0..ticks {
            self.engine.advance(self.tick_length()).await;
        }
    }

    pub async fn pending(&self, key: MatchKey) -> Option<PendingMatch> {
        self.gateway.get_pending_match(key).await.unwrap()
    }

    pub async fn queue_ids(&self, key: MatchKey) -> Vec<PlayerId> {
        self.gateway
            .queue_members(key)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    pub fn started(&self) -> Vec<StartedMatch> {
        self.gateway.started_matches().unwrap()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.publisher.get_published_events()
    }

    pub fn event_kinds(&self) -> Vec<&'static str> {
        self.publisher.event_kinds()
    }

    /// Every abort as (reason, removed, returned)
    pub fn aborts(&self) -> Vec<(AbortReason, Vec<PlayerId>, Vec<PlayerId>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::MatchAborted {
                    reason,
                    removed,
                    returned,
                    ..
                } => Some((reason, removed, returned)),
                _ => None,
            })
            .collect()
    }

    /// Tallies from the most recent vote render
    pub fn last_tally(&self) -> Option<Vec<MapTally>> {
        self.events().into_iter().rev().find_map(|event| match event {
            EngineEvent::VoteTally { tallies, .. } => Some(tallies),
            _ => None,
        })
    }
}
