//! Core library for the Conclave coordination engine
//!
//! This crate contains the shared data model and storage seams:
//! - Agent messages and responses
//! - Coordination requests and interaction records
//! - Job records and their lifecycle
//! - Stream events
//! - The fleet-shared key-value store abstraction

pub mod agent;
pub mod coordination;
pub mod error;
pub mod job;
pub mod store;
pub mod stream;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
