use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use irongate_core::{AggregateRef, CommandError, ExpectedVersion, StreamKey};
use irongate_events::{EventMetadata, SearchQuery, UniqueConstraint};

/// An event ready to be pushed (not yet assigned a sequence or position).
///
/// The payload is already encoded; the store never looks inside it. Unique
/// constraint operations and the version expectation travel with the event and
/// are applied in the same atomic unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UncommittedEvent {
    pub aggregate: AggregateRef,
    pub event_type: String,
    pub creator: String,
    pub payload: JsonValue,
    pub expected: ExpectedVersion,
    pub unique_constraints: Vec<UniqueConstraint>,
}

/// A committed event as the store keeps it.
///
/// - `sequence` is per aggregate, starting at 1 without gaps
/// - `position` is global and strictly increasing in commit order
/// - all events of one push share `created_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub aggregate: AggregateRef,
    pub event_type: String,
    pub sequence: u64,
    pub position: u64,
    pub created_at: DateTime<Utc>,
    pub creator: String,
    pub payload: JsonValue,
}

impl EventMetadata for StoredEvent {
    fn aggregate(&self) -> &AggregateRef {
        &self.aggregate
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn creator(&self) -> &str {
        &self.creator
    }
}

/// Event store operation error.
///
/// Storage level only. The eventstore façade maps it into [`CommandError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// An aggregate moved past the expected sequence (retryable).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A unique claim collided; `message` is the one supplied with the claim.
    #[error("unique constraint violated: {message}")]
    UniqueConstraint { message: String },

    #[error("invalid push: {0}")]
    InvalidPush(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<EventStoreError> for CommandError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::Concurrency(msg) => CommandError::conflict(msg),
            EventStoreError::UniqueConstraint { message } => CommandError::already_exists(message),
            e @ EventStoreError::InvalidPush(_) => CommandError::internal("Errors.Eventstore.InvalidPush", e),
            e @ EventStoreError::Database(_) => CommandError::internal("Errors.Eventstore.Database", e),
        }
    }
}

/// Append-only, instance-scoped event log with unique constraints.
///
/// Implementations must:
/// - apply a push atomically: every event and every constraint operation, or nothing
/// - check each aggregate's `Exact` expectation against its current sequence
/// - assign per-aggregate sequences (`current + 1`, ...) and global positions
/// - apply constraint operations in event order, failing the whole push with
///   [`EventStoreError::UniqueConstraint`] on a colliding `Add`
/// - return committed events in the order they were given
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn filter(&self, query: &SearchQuery) -> Result<Vec<StoredEvent>, EventStoreError>;

    async fn push(&self, events: Vec<UncommittedEvent>) -> Result<Vec<StoredEvent>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn filter(&self, query: &SearchQuery) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).filter(query).await
    }

    async fn push(&self, events: Vec<UncommittedEvent>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).push(events).await
    }
}

/// What a batch expects of one aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamExpectation {
    pub owner: String,
    pub sequence: Option<u64>,
}

/// Validates a batch before anything is read or written and groups the
/// expectations per aggregate.
///
/// Rejected as [`EventStoreError::InvalidPush`]:
/// - aggregate references missing type, id or instance
/// - two owners for one aggregate
/// - two different `Exact` expectations for one aggregate (`Any` mixes freely)
pub(crate) fn stream_expectations(
    events: &[UncommittedEvent],
) -> Result<BTreeMap<StreamKey, StreamExpectation>, EventStoreError> {
    let mut streams: BTreeMap<StreamKey, StreamExpectation> = BTreeMap::new();
    for (idx, e) in events.iter().enumerate() {
        if !e.aggregate.is_persistable() {
            return Err(EventStoreError::InvalidPush(format!(
                "event {idx} ({}) has an incomplete aggregate reference",
                e.event_type
            )));
        }
        let expected = match e.expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(seq) => Some(seq),
        };
        let entry = streams
            .entry(e.aggregate.stream_key())
            .or_insert_with(|| StreamExpectation {
                owner: e.aggregate.owner.clone(),
                sequence: None,
            });
        if entry.owner != e.aggregate.owner {
            return Err(EventStoreError::InvalidPush(format!(
                "aggregate {} pushed with owners '{}' and '{}'",
                e.aggregate, entry.owner, e.aggregate.owner
            )));
        }
        match (entry.sequence, expected) {
            (Some(a), Some(b)) if a != b => {
                return Err(EventStoreError::InvalidPush(format!(
                    "aggregate {} pushed with expectations {a} and {b}",
                    e.aggregate
                )));
            }
            (None, Some(b)) => entry.sequence = Some(b),
            _ => {}
        }
    }
    Ok(streams)
}
