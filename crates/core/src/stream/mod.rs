//! Stream events delivered to live subscribers

mod event;

pub use event::{StreamEvent, StreamPayload};
