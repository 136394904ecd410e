//! Bounded re-execution of whole commands on sequence conflicts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use irongate_core::{CommandError, CommandResult};

use crate::context::Ctx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Multiplied by the attempt number before each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

/// Runs `command` and re-runs it from scratch while it fails with a conflict.
///
/// Only [`CommandError::is_conflict`] is retried. Every other error, and the
/// last conflict once retries are spent, is returned as is. The backoff sleep is
/// raced against `ctx`.
pub async fn retry_on_conflict<T, F, Fut>(ctx: &Ctx, policy: RetryPolicy, mut command: F) -> CommandResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CommandResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match command().await {
            Err(err) if err.is_conflict() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(attempt, max_retries = policy.max_retries, error = %err, "conflict; retrying command");
                let delay = policy.backoff * attempt;
                ctx.guard(async {
                    tokio::time::sleep(delay).await;
                    Ok::<_, CommandError>(())
                })
                .await?;
            }
            result => return result,
        }
    }
}
