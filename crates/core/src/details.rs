//! Caller-visible result of a successful command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proof of what was durably written.
///
/// Derived from the last committed event of a push, or from a write model that
/// folded the committed events back in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetails {
    pub sequence: u64,
    pub event_date: DateTime<Utc>,
    pub resource_owner: String,
}
