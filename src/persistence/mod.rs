//! Persistence boundary
//!
//! The engine treats durable storage as a transactional record store behind
//! the `PersistenceGateway` trait. Persisted rows are the source of truth on
//! restart; the in-memory registry is only a cache of them.

pub mod gateway;
pub mod memory;

pub use gateway::PersistenceGateway;
pub use memory::InMemoryGateway;
