//! Duplex stream gateway over WebSocket
//!
//! A socket starts a coordination stream, or resumes one whose previous socket
//! dropped, and carries `ping` / `cancel` control frames while it runs.

pub mod handler;
pub mod protocol;
mod resume;
mod socket;

pub use handler::ws_handler;
pub use resume::ResumeRegistry;
