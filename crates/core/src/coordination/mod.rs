//! Coordination requests, audit records and outcomes

mod interaction;
mod outcome;
mod request;

pub use interaction::{InteractionMetadata, InteractionRecord, USER_SENDER};
pub use outcome::{CoordinationOutcome, DegradedAgent};
pub use request::{CoordinationMode, CoordinationRequest};
