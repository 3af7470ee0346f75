//! Asynchronous job records

mod model;
mod store;

pub use model::{Job, JobFailure, JobResultView, JobStatus, JobStatusView};
pub use store::JobStore;
