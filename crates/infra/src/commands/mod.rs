//! Command entry points of the IAM write side.
//!
//! Each command builds its preparation steps, runs them against the
//! eventstore, pushes the resulting batch atomically and answers with the
//! [`ObjectDetails`] of the last committed event:
//!
//! ```text
//! steps ──validate──▶ prepare (reads via Ctx) ──▶ push ──▶ ObjectDetails
//!                         ▲                         │
//!                         └──── conflict: retry ────┘
//! ```
//!
//! A plain sequence conflict re-runs the whole read-validate-emit cycle
//! according to the configured [`RetryPolicy`]; unique constraint collisions
//! surface as `AlreadyExists` and are never retried.

mod instance;
mod member;
mod org;
mod user;

use std::sync::Arc;

use tracing::debug;

use irongate_core::{CommandError, CommandResult, IdGenerator, ObjectDetails};
use irongate_events::{details_of, prepare_commands, Preparation};
use irongate_identity::{DomainPolicy, IamCodec, IamEvent};

use crate::context::Ctx;
use crate::event_store::EventStore;
use crate::eventstore::Eventstore;
use crate::retry::{retry_on_conflict, RetryPolicy};

pub use instance::{InstanceSetup, SetupAdmin, SetupInstance};
pub use org::OrgAdmin;
pub use user::HumanUser;

/// Result of a command that created a new aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: String,
    pub details: ObjectDetails,
}

pub struct Commands {
    eventstore: Eventstore<IamCodec>,
    ids: Arc<dyn IdGenerator>,
    domain_policy: DomainPolicy,
    retry: RetryPolicy,
}

impl Commands {
    pub fn new(store: Arc<dyn EventStore>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            eventstore: Eventstore::new(store, IamCodec),
            ids,
            domain_policy: DomainPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_domain_policy(mut self, policy: DomainPolicy) -> Self {
        self.domain_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn eventstore(&self) -> &Eventstore<IamCodec> {
        &self.eventstore
    }

    fn next_id(&self) -> CommandResult<String> {
        Ok(self.ids.next_id()?)
    }

    /// Prepares `steps` as one batch and pushes it, retrying on conflicts.
    async fn execute(&self, ctx: &Ctx, steps: &[&dyn Preparation<IamEvent>]) -> CommandResult<ObjectDetails> {
        retry_on_conflict(ctx, self.retry, move || async move {
            let reads = self.eventstore.reads(ctx);
            let pending = prepare_commands::<IamEvent>(&reads, steps).await?;
            if pending.is_empty() {
                return Err(CommandError::not_changed());
            }
            let committed = self.eventstore.push(ctx, pending).await?;
            debug!(events = committed.len(), "command committed");
            details_of(&committed).ok_or_else(CommandError::not_changed)
        })
        .await
    }
}
