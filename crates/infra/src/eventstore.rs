//! Typed façade over the storage collaborator.
//!
//! The store moves opaque JSON; this layer owns the codec. It:
//!
//! - decodes filtered events into the payload family `C::Event`
//! - encodes pending events, pushes them atomically and hands back the
//!   committed events with their payloads
//! - maps storage errors into the caller-facing [`CommandError`] taxonomy
//! - races every store call against the caller's [`Ctx`]

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, field, instrument, Span};

use irongate_core::{CommandError, CommandResult};
use irongate_events::{Event, EventCodec, PendingEvent, ReadSet, SearchQuery, WriteModel};

use crate::context::Ctx;
use crate::event_store::{EventStore, StoredEvent, UncommittedEvent};

pub struct Eventstore<C: EventCodec> {
    store: Arc<dyn EventStore>,
    codec: C,
}

impl<C: EventCodec> Eventstore<C> {
    pub fn new(store: Arc<dyn EventStore>, codec: C) -> Self {
        Self { store, codec }
    }

    /// Events selected by `query`, decoded, in the order the query asks for.
    #[instrument(skip(self, ctx, query), fields(instance_id = %ctx.instance_id, found = field::Empty), err)]
    pub async fn filter(&self, ctx: &Ctx, query: &SearchQuery) -> CommandResult<Vec<Event<C::Event>>> {
        let stored = ctx
            .guard(async { self.store.filter(query).await.map_err(CommandError::from) })
            .await?;
        Span::current().record("found", stored.len());
        stored.into_iter().map(|e| self.decode(e)).collect()
    }

    /// Pushes `pending` as one atomic batch.
    ///
    /// The committed events come back in the order given, carrying the payloads
    /// that went in.
    #[instrument(skip(self, ctx, pending), fields(instance_id = %ctx.instance_id, events = pending.len()), err)]
    pub async fn push(
        &self,
        ctx: &Ctx,
        pending: Vec<PendingEvent<C::Event>>,
    ) -> CommandResult<Vec<Event<C::Event>>> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let creator = ctx.creator().to_string();
        let mut payloads = Vec::with_capacity(pending.len());
        let mut uncommitted = Vec::with_capacity(pending.len());
        for event in pending {
            let event_type = event.event_type().to_string();
            let (aggregate, payload, expected, unique_constraints) = event.into_parts();
            uncommitted.push(UncommittedEvent {
                aggregate,
                event_type,
                creator: creator.clone(),
                payload: self.codec.encode(&payload)?,
                expected,
                unique_constraints,
            });
            payloads.push(payload);
        }

        let stored = ctx
            .guard(async { self.store.push(uncommitted).await.map_err(CommandError::from) })
            .await?;
        if stored.len() != payloads.len() {
            return Err(CommandError::internal(
                "Errors.Eventstore.InvalidPush",
                ResultMismatch {
                    pushed: payloads.len(),
                    committed: stored.len(),
                },
            ));
        }

        debug!(committed = stored.len(), "events pushed");
        Ok(stored
            .into_iter()
            .zip(payloads)
            .map(|(s, payload)| {
                Event::committed(s.aggregate, s.event_type, s.sequence, s.position, s.created_at, s.creator, payload)
            })
            .collect())
    }

    /// Runs `model`'s query and folds the result into it.
    pub async fn filter_to_query_reducer<W>(&self, ctx: &Ctx, mut model: W) -> CommandResult<W>
    where
        W: WriteModel<C::Event>,
    {
        let events = self.filter(ctx, &model.query()).await?;
        model.reduce(&events)?;
        Ok(model)
    }

    /// Read access for preparation steps, bound to `ctx`.
    pub fn reads<'a>(&'a self, ctx: &'a Ctx) -> BoundReads<'a, C> {
        BoundReads { eventstore: self, ctx }
    }

    fn decode(&self, stored: StoredEvent) -> CommandResult<Event<C::Event>> {
        let payload = self.codec.decode(&stored.event_type, &stored.payload)?;
        Ok(Event::committed(
            stored.aggregate,
            stored.event_type,
            stored.sequence,
            stored.position,
            stored.created_at,
            stored.creator,
            payload,
        ))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("pushed {pushed} events, store returned {committed}")]
struct ResultMismatch {
    pushed: usize,
    committed: usize,
}

/// The eventstore seen as a [`ReadSet`] for one call.
pub struct BoundReads<'a, C: EventCodec> {
    eventstore: &'a Eventstore<C>,
    ctx: &'a Ctx,
}

#[async_trait]
impl<'a, C: EventCodec> ReadSet<C::Event> for BoundReads<'a, C> {
    async fn filter(&self, query: &SearchQuery) -> CommandResult<Vec<Event<C::Event>>> {
        self.eventstore.filter(self.ctx, query).await
    }
}
