//! Append-only event store boundary.
//!
//! Storage collaborator of the command side: it persists encoded events and
//! their unique claims atomically and answers [`irongate_events::SearchQuery`]s.
//! It knows nothing about payloads or business rules.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
