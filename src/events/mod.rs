//! Outbound events rendered by the chat-platform adapter

pub mod messages;
pub mod publisher;

pub use messages::{EngineEvent, EventEnvelope, MapTally};
pub use publisher::{EventPublisher, LoggingEventPublisher, MockEventPublisher};
