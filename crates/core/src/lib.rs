//! `irongate-core`: foundation types of the command side.
//!
//! Pure values and contracts only: aggregate identity, concurrency expectations,
//! the error taxonomy and the identifier generator seam. No I/O lives here.

pub mod aggregate;
pub mod details;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRef, ExpectedVersion, StreamKey};
pub use details::ObjectDetails;
pub use error::{Cause, CommandError, CommandResult};
pub use id::{IdError, IdGenerator, SequentialIdGenerator, UuidV7Generator};
