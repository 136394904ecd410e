//! Aggregate identity and optimistic concurrency expectations.

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, CommandResult};

/// Identifies *what* is being changed.
///
/// - `aggregate_type` + `id` + `instance_id` name one event stream.
/// - `owner` scopes the aggregate to a sub-tenant (an organization inside an
///   instance). It is recorded with the aggregate's first event and never changes
///   afterwards; the event store rejects pushes that try to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRef {
    pub aggregate_type: String,
    pub id: String,
    pub instance_id: String,
    pub owner: String,
}

impl AggregateRef {
    pub fn new(
        aggregate_type: impl Into<String>,
        id: impl Into<String>,
        instance_id: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            id: id.into(),
            instance_id: instance_id.into(),
            owner: owner.into(),
        }
    }

    /// Whether events for this reference may be persisted.
    pub fn is_persistable(&self) -> bool {
        !self.aggregate_type.is_empty() && !self.id.is_empty() && !self.instance_id.is_empty()
    }

    /// Key of the stream this aggregate writes to.
    pub fn stream_key(&self) -> StreamKey {
        StreamKey {
            instance_id: self.instance_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.id.clone(),
        }
    }
}

impl core::fmt::Display for AggregateRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}@{}", self.aggregate_type, self.id, self.instance_id)
    }
}

/// Identity of one event stream (one aggregate within one instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub instance_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ExpectedVersion {
    /// Skip version checking. Used by write models that only read a subset of an
    /// aggregate's events and rely on unique constraints instead.
    #[default]
    Any,
    /// Require the aggregate's highest committed sequence to be exactly this.
    /// `Exact(0)` means the aggregate must not have any events yet.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> CommandResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(CommandError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}
