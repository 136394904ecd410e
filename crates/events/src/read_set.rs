//! Read access handed to preparation steps.
//!
//! A step never reaches for a global filter function: everything it reads goes
//! through the [`ReadSet`] it is given. Production code binds the read set to the
//! eventstore; tests inject an [`InMemoryReadSet`].

use async_trait::async_trait;

use irongate_core::CommandResult;

use crate::envelope::{Event, PendingEvent};
use crate::event::EventPayload;
use crate::query::SearchQuery;
use crate::write_model::WriteModel;

#[async_trait]
pub trait ReadSet<E: EventPayload>: Send + Sync {
    /// Events selected by `query`, in the order it asks for.
    ///
    /// A failure must propagate: "could not read" is never "no events".
    async fn filter(&self, query: &SearchQuery) -> CommandResult<Vec<Event<E>>>;
}

/// Runs `model`'s query against `reads` and folds the result into it.
pub async fn load<E, W>(reads: &dyn ReadSet<E>, mut model: W) -> CommandResult<W>
where
    E: EventPayload,
    W: WriteModel<E>,
{
    let events = reads.filter(&model.query()).await?;
    model.reduce(&events)?;
    Ok(model)
}

/// A fixed set of committed events.
#[derive(Debug, Clone)]
pub struct InMemoryReadSet<E> {
    events: Vec<Event<E>>,
}

impl<E> InMemoryReadSet<E> {
    pub fn new(events: Vec<Event<E>>) -> Self {
        Self { events }
    }

    pub fn empty() -> Self {
        Self { events: Vec::new() }
    }
}

#[async_trait]
impl<E: EventPayload> ReadSet<E> for InMemoryReadSet<E> {
    async fn filter(&self, query: &SearchQuery) -> CommandResult<Vec<Event<E>>> {
        let selected = self
            .events
            .iter()
            .filter(|e| query.matches(*e))
            .cloned()
            .collect();
        Ok(query.arrange(selected))
    }
}

/// Committed events plus the events earlier steps of the same command emitted.
///
/// Pending events follow every committed one, in emission order.
pub struct PendingOverlay<'a, E: EventPayload> {
    committed: &'a dyn ReadSet<E>,
    pending: &'a [PendingEvent<E>],
}

impl<'a, E: EventPayload> PendingOverlay<'a, E> {
    pub fn new(committed: &'a dyn ReadSet<E>, pending: &'a [PendingEvent<E>]) -> Self {
        Self { committed, pending }
    }
}

#[async_trait]
impl<'a, E: EventPayload> ReadSet<E> for PendingOverlay<'a, E> {
    async fn filter(&self, query: &SearchQuery) -> CommandResult<Vec<Event<E>>> {
        let mut events = self.committed.filter(query).await?;
        if self.pending.is_empty() {
            return Ok(events);
        }
        events.extend(
            self.pending
                .iter()
                .map(PendingEvent::preview)
                .filter(|e| query.matches(e)),
        );
        Ok(query.arrange(events))
    }
}
