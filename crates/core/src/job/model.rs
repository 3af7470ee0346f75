//! Job model definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordination::{CoordinationOutcome, CoordinationRequest};
use crate::{Error, Result};

/// Lifecycle of a job. Status only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed | Self::Timeout => 2,
        }
    }

    /// pending -> processing -> {completed | failed | timeout}; pending may also
    /// fail or time out directly. Terminal states accept nothing.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank() || (next == *self && !next.is_terminal())
    }
}

/// Why a job did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            agent: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// A trackable coordination run, independent of any one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: f32,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub request: CoordinationRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CoordinationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    /// Seconds a terminal job stays readable
    pub ttl_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Job {
    pub fn new(request: CoordinationRequest, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            progress: 0.0,
            submitted_at: now,
            updated_at: now,
            request,
            result: None,
            error: None,
            ttl_secs,
            worker_id: None,
        }
    }

    /// Move to `next`, rejecting any backward or post-terminal transition
    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start(&mut self, worker_id: impl Into<String>) -> Result<()> {
        self.advance(JobStatus::Processing)?;
        self.worker_id = Some(worker_id.into());
        Ok(())
    }

    /// Progress never decreases and is clamped to 0..=1
    pub fn set_progress(&mut self, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        if progress > self.progress {
            self.progress = progress;
            self.updated_at = Utc::now();
        }
    }

    pub fn complete(&mut self, outcome: CoordinationOutcome) -> Result<()> {
        self.advance(JobStatus::Completed)?;
        self.progress = 1.0;
        self.result = Some(outcome);
        Ok(())
    }

    pub fn fail(&mut self, failure: JobFailure) -> Result<()> {
        self.advance(JobStatus::Failed)?;
        self.error = Some(failure);
        Ok(())
    }

    pub fn time_out(&mut self, budget_secs: u64) -> Result<()> {
        self.advance(JobStatus::Timeout)?;
        self.error = Some(JobFailure::new(
            "timeout",
            format!("Job exceeded its {}s wall-clock budget", budget_secs),
        ));
        Ok(())
    }

    /// A terminal job whose ttl has elapsed must read as not found
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_terminal() && self.updated_at + secs(self.ttl_secs) <= now
    }

    /// A non-terminal job older than `limit_secs` has been orphaned by its worker
    pub fn is_overdue(&self, now: DateTime<Utc>, limit_secs: u64) -> bool {
        !self.status.is_terminal() && self.submitted_at + secs(limit_secs) <= now
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            status: self.status,
            progress: self.progress,
            updated_at: self.updated_at,
        }
    }

    pub fn result_view(&self) -> JobResultView {
        JobResultView {
            id: self.id,
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_SPAN_SECS) as i64)
}

/// Answer to a status poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: f32,
    pub updated_at: DateTime<Utc>,
}

/// Answer to a result fetch on a terminal job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultView {
    pub id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CoordinationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentResponse;

    fn job() -> Job {
        Job::new(CoordinationRequest::new("q", "pm"), 3600)
    }

    #[test]
    fn test_forward_transitions() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);
        job.start("worker-1").unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        job.complete(CoordinationOutcome {
            response: AgentResponse::new("pm", "done"),
            interactions: vec![],
            degraded: vec![],
        })
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn test_backward_transitions_rejected() {
        let mut job = job();
        job.start("w").unwrap();
        assert!(job.advance(JobStatus::Pending).is_err());

        job.fail(JobFailure::new("agent_unavailable", "down")).unwrap();
        assert!(job.advance(JobStatus::Processing).is_err());
        assert!(job.advance(JobStatus::Completed).is_err());
        assert!(job.time_out(10).is_err());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = job();
        job.set_progress(0.5);
        job.set_progress(0.2);
        assert_eq!(job.progress, 0.5);
        job.set_progress(7.0);
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn test_expiry_only_for_terminal_jobs() {
        let mut job = job();
        let later = Utc::now() + Duration::hours(2);
        assert!(!job.is_expired(later));

        job.start("w").unwrap();
        job.fail(JobFailure::new("x", "y")).unwrap();
        assert!(job.is_expired(later));
        assert!(!job.is_expired(Utc::now()));
    }

    #[test]
    fn test_overdue() {
        let job = job();
        assert!(!job.is_overdue(Utc::now(), 600));
        assert!(job.is_overdue(Utc::now() + Duration::seconds(601), 600));
    }
}
