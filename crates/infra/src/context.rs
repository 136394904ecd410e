//! Per-call context: who acts, on which instance, and until when.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use irongate_core::{CommandError, CommandResult};
use irongate_identity::Authz;

/// Carried by every command.
///
/// Cancellation is cooperative: [`Ctx::guard`] races an I/O future against the
/// token and the deadline. Dropping a push future before it commits leaves no
/// events behind.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub instance_id: String,
    /// Domain the request came in on; default org domains are derived from it.
    pub requested_domain: String,
    pub authz: Authz,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Ctx {
    pub fn new(instance_id: impl Into<String>, requested_domain: impl Into<String>, authz: Authz) -> Self {
        Self {
            instance_id: instance_id.into(),
            requested_domain: requested_domain.into(),
            authz,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The creator recorded on pushed events.
    pub fn creator(&self) -> &str {
        self.authz.principal().principal_id.as_str()
    }

    /// Fails if the context is already cancelled or past its deadline.
    pub fn check(&self) -> CommandResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CommandError::cancelled("Errors.Context.Cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CommandError::cancelled("Errors.Context.DeadlineExceeded"));
        }
        Ok(())
    }

    /// Runs `fut` unless the context ends first.
    pub async fn guard<T, F>(&self, fut: F) -> CommandResult<T>
    where
        F: Future<Output = CommandResult<T>>,
    {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CommandError::cancelled("Errors.Context.Cancelled")),
            _ = deadline => Err(CommandError::cancelled("Errors.Context.DeadlineExceeded")),
            result = fut => result,
        }
    }
}
