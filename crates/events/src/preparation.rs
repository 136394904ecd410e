//! The validate-then-emit pipeline.
//!
//! A [`Preparation`] turns one desired change into events:
//!
//! 1. [`Preparation::validate`] checks the input alone (no I/O) and rejects it
//!    with `InvalidArgument`.
//! 2. [`Preparation::prepare`] reads the write models it needs through the given
//!    [`ReadSet`], applies the business rules and returns the events to push.
//!    When the desired state already holds it fails with `PreconditionFailed`
//!    instead of returning nothing.
//!
//! [`prepare_commands`] composes several steps into one batch: every static
//! validation runs first, then the stateful parts in order. Each step reads the
//! events of the steps before it, so "add org" followed by "add member" sees the
//! org.

use async_trait::async_trait;
use tracing::debug;

use irongate_core::CommandResult;

use crate::envelope::PendingEvent;
use crate::event::EventPayload;
use crate::read_set::{PendingOverlay, ReadSet};

#[async_trait]
pub trait Preparation<E: EventPayload>: Send + Sync {
    fn validate(&self) -> CommandResult<()> {
        Ok(())
    }

    async fn prepare(&self, reads: &dyn ReadSet<E>) -> CommandResult<Vec<PendingEvent<E>>>;
}

/// Runs `steps` against `reads` and concatenates their events.
///
/// Nothing is pushed here; the caller pushes the returned batch atomically.
pub async fn prepare_commands<E: EventPayload>(
    reads: &dyn ReadSet<E>,
    steps: &[&dyn Preparation<E>],
) -> CommandResult<Vec<PendingEvent<E>>> {
    for step in steps {
        step.validate()?;
    }

    let mut pending: Vec<PendingEvent<E>> = Vec::new();
    for step in steps {
        let emitted = {
            let overlay = PendingOverlay::new(reads, &pending);
            step.prepare(&overlay).await?
        };
        pending.extend(emitted);
    }

    debug!(steps = steps.len(), events = pending.len(), "commands prepared");
    Ok(pending)
}
