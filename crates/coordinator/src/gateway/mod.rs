//! Streaming gateway
//!
//! Turns an in-flight coordination run into an ordered event stream for one
//! subscriber, applying visibility rules, chunk coalescing and reconnection.

mod filter;
mod session;
mod transport;

pub use filter::{is_visible, visible_view, EventBuffer};
pub use session::{StreamOutcome, StreamSession, StreamingGateway};
pub use transport::{
    ChannelTransport, ControlFrame, NoReconnect, Reconnector, Transport, TransportError,
};
