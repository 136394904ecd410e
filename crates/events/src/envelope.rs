use chrono::{DateTime, Utc};

use irongate_core::{AggregateRef, ExpectedVersion, ObjectDetails};

use crate::event::EventPayload;
use crate::unique::UniqueConstraint;

/// A committed, immutable fact that happened to one aggregate.
///
/// Notes:
/// - `sequence` is strictly increasing per aggregate and assigned by the store.
/// - `position` is strictly increasing across the whole log and orders events of
///   different aggregates.
/// - Events handed to a write model by a transactional read set may still be
///   pending. Those carry `sequence == 0` and `position == 0`; see
///   [`Event::is_pending`].
#[derive(Debug, Clone, PartialEq)]
pub struct Event<E> {
    aggregate: AggregateRef,
    event_type: String,
    sequence: u64,
    position: u64,
    created_at: DateTime<Utc>,
    creator: String,
    payload: E,
}

impl<E> Event<E> {
    pub fn committed(
        aggregate: AggregateRef,
        event_type: impl Into<String>,
        sequence: u64,
        position: u64,
        created_at: DateTime<Utc>,
        creator: impl Into<String>,
        payload: E,
    ) -> Self {
        Self {
            aggregate,
            event_type: event_type.into(),
            sequence,
            position,
            created_at,
            creator: creator.into(),
            payload,
        }
    }

    pub fn aggregate(&self) -> &AggregateRef {
        &self.aggregate
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn creator(&self) -> &str {
        &self.creator
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Not yet committed: seen through a transactional read set.
    pub fn is_pending(&self) -> bool {
        self.position == 0
    }

    pub fn details(&self) -> ObjectDetails {
        ObjectDetails {
            sequence: self.sequence,
            event_date: self.created_at,
            resource_owner: self.aggregate.owner.clone(),
        }
    }
}

/// Object details of a push result: taken from its last committed event.
pub fn details_of<E>(events: &[Event<E>]) -> Option<ObjectDetails> {
    events.last().map(Event::details)
}

/// An event produced by a preparation step, not yet pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent<E> {
    aggregate: AggregateRef,
    payload: E,
    expected: ExpectedVersion,
    unique_constraints: Vec<UniqueConstraint>,
}

impl<E: EventPayload> PendingEvent<E> {
    /// Wraps `payload` for `aggregate`; unique constraint ops are taken from the payload.
    pub fn new(aggregate: AggregateRef, payload: E) -> Self {
        let unique_constraints = payload.unique_constraints(&aggregate);
        Self {
            aggregate,
            payload,
            expected: ExpectedVersion::Any,
            unique_constraints,
        }
    }

    /// Require the aggregate to still be at `expected` when the batch commits.
    pub fn expect(mut self, expected: ExpectedVersion) -> Self {
        self.expected = expected;
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn aggregate(&self) -> &AggregateRef {
        &self.aggregate
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn expected(&self) -> ExpectedVersion {
        self.expected
    }

    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    /// How this event looks to later steps of the same command.
    pub fn preview(&self) -> Event<E> {
        Event {
            aggregate: self.aggregate.clone(),
            event_type: self.event_type().to_string(),
            sequence: 0,
            position: 0,
            created_at: Utc::now(),
            creator: String::new(),
            payload: self.payload.clone(),
        }
    }

    pub fn into_parts(self) -> (AggregateRef, E, ExpectedVersion, Vec<UniqueConstraint>) {
        (
            self.aggregate,
            self.payload,
            self.expected,
            self.unique_constraints,
        )
    }
}
