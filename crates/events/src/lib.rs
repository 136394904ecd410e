//! `irongate-events`: the event-sourcing contracts of the command side.
//!
//! - [`Event`] / [`PendingEvent`]: committed facts and facts about to be pushed
//! - [`EventPayload`] / [`EventCodec`]: closed event families and their explicit codec
//! - [`UniqueConstraint`]: claims enforced by the store at push time
//! - [`SearchQuery`]: declarative event selection
//! - [`WriteModel`]: query + reduce
//! - [`ReadSet`] / [`Preparation`]: the validate-then-emit pipeline

pub mod envelope;
pub mod event;
pub mod preparation;
pub mod query;
pub mod read_set;
pub mod unique;
pub mod write_model;

pub use envelope::{details_of, Event, PendingEvent};
pub use event::{CodecError, EventCodec, EventPayload};
pub use preparation::{prepare_commands, Preparation};
pub use query::{EventMetadata, Order, SearchQuery, SearchQueryBuilder, SubQuery, SubQueryBuilder};
pub use read_set::{load, InMemoryReadSet, PendingOverlay, ReadSet};
pub use unique::{ConstraintKey, ConstraintScope, UniqueAction, UniqueConstraint};
pub use write_model::{AggregateState, ReduceError, WriteModel, WriteModelBase};
