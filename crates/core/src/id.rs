//! Identifier generation for new aggregates.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use uuid::Uuid;

use crate::error::CommandError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("id generation failed: {0}")]
pub struct IdError(pub String);

impl From<IdError> for CommandError {
    fn from(err: IdError) -> Self {
        CommandError::internal("Errors.Id.Generate", err)
    }
}

/// Produces globally unique identifiers for new aggregates.
///
/// Called before constructing a new aggregate's first event.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<String, IdError>;
}

/// Time-ordered UUIDv7 identifiers, rendered without hyphens.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn next_id(&self) -> Result<String, IdError> {
        Ok(Uuid::now_v7().simple().to_string())
    }
}

/// Deterministic `prefix-1`, `prefix-2`, ... identifiers.
///
/// Prefer this in tests so expected events can name their aggregates.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> Result<String, IdError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{}-{n}", self.prefix))
    }
}

impl<T: IdGenerator + ?Sized> IdGenerator for std::sync::Arc<T> {
    fn next_id(&self) -> Result<String, IdError> {
        (**self).next_id()
    }
}
