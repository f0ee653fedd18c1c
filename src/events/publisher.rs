//! Event publishers

use crate::error::Result;
use crate::events::messages::{EngineEvent, EventEnvelope};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{debug, info};

/// Trait for delivering engine events to the adapter
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EngineEvent) -> Result<()>;
}

/// Publisher that writes every event to the log as JSON
#[derive(Debug, Default)]
pub struct LoggingEventPublisher;

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: EngineEvent) -> Result<()> {
        let kind = event.kind();
        let key = event.key();
        let envelope = EventEnvelope::new(event);
        match kind {
            "match_started" | "match_aborted" | "operator_error" => {
                info!("Event {} for {}: {}", kind, key, envelope.to_json()?)
            }
            _ => debug!("Event {} for {}: {}", kind, key, envelope.to_json()?),
        }
        Ok(())
    }
}

/// Mock event publisher capturing events for tests
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: Mutex<Vec<EngineEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published events
    pub fn get_published_events(&self) -> Vec<EngineEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of all published events, in order
    pub fn event_kinds(&self) -> Vec<&'static str> {
        self.get_published_events().iter().map(|e| e.kind()).collect()
    }

    /// Clear published events
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, event: EngineEvent) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
