use serde_json::Value as JsonValue;
use thiserror::Error;

use irongate_core::{AggregateRef, CommandError};

use crate::unique::UniqueConstraint;

/// Payload of a domain event.
///
/// Payloads are:
/// - **immutable** (treat them as facts)
/// - tagged with a stable type identifier (e.g. `"org.domain.verified"`)
/// - the source of the unique constraint operations they imply
pub trait EventPayload: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event type identifier.
    fn event_type(&self) -> &'static str;

    /// Unique constraint claims/releases that must commit together with this event.
    fn unique_constraints(&self, _aggregate: &AggregateRef) -> Vec<UniqueConstraint> {
        Vec::new()
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("event type '{0}' cannot be encoded")]
    NotEncodable(String),

    #[error("malformed payload for '{event_type}': {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<CodecError> for CommandError {
    fn from(err: CodecError) -> Self {
        CommandError::internal("Errors.Event.Codec", err)
    }
}

/// Explicit encode/decode pair for one closed family of events.
///
/// Handed to the eventstore façade at construction; there is no process-wide
/// registry of decoders. Stored payloads are JSON and opaque to the store itself.
///
/// `decode` must not fail for event types it does not know: return a catch-all
/// variant instead so write models can still advance past them.
pub trait EventCodec: Send + Sync + 'static {
    type Event: EventPayload;

    fn encode(&self, event: &Self::Event) -> Result<JsonValue, CodecError>;

    fn decode(&self, event_type: &str, payload: &JsonValue) -> Result<Self::Event, CodecError>;
}
