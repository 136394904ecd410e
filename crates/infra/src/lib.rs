//! Infrastructure layer: event storage, the typed eventstore, command entry points.

pub mod commands;
pub mod config;
pub mod context;
pub mod event_store;
pub mod eventstore;
pub mod retry;

mod integration_tests;

pub use commands::{Commands, Created, HumanUser, InstanceSetup, OrgAdmin, SetupAdmin, SetupInstance};
pub use config::{ConfigError, EngineConfig};
pub use context::Ctx;
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
pub use eventstore::Eventstore;
pub use retry::{retry_on_conflict, RetryPolicy};
