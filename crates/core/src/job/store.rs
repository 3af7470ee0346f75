//! Job persistence in the shared store
//!
//! The shared store is the only authority on job state. Nothing here keeps a
//! copy in memory, so every fleet member reads the same record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::model::Job;
use crate::store::{get_json, set_json, KvStore};
use crate::Result;

const KEY_PREFIX: &str = "job:";

#[derive(Clone)]
pub struct JobStore {
    kv: Arc<dyn KvStore>,
    /// Expiry applied to records that are not yet terminal
    active_ttl: Duration,
}

impl JobStore {
    pub fn new(kv: Arc<dyn KvStore>, active_ttl: Duration) -> Self {
        Self { kv, active_ttl }
    }

    fn key(id: Uuid) -> String {
        format!("{}{}", KEY_PREFIX, id)
    }

    fn ttl_for(&self, job: &Job) -> Duration {
        if job.status.is_terminal() {
            Duration::from_secs(job.ttl_secs)
        } else {
            self.active_ttl
        }
    }

    /// Write the whole record, refreshing its expiry from its status
    pub async fn put(&self, job: &Job) -> Result<()> {
        set_json(self.kv.as_ref(), &Self::key(job.id), job, Some(self.ttl_for(job))).await
    }

    /// Like [`put`](Self::put), but only while the record still exists.
    /// Returns `false` when the job has been deleted.
    pub async fn update(&self, job: &Job) -> Result<bool> {
        let raw = serde_json::to_string(job)?;
        self.kv
            .replace(&Self::key(job.id), raw, Some(self.ttl_for(job)))
            .await
    }

    /// Load a job. Unknown and expired jobs both read as `None`.
    pub async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let job: Option<Job> = get_json(self.kv.as_ref(), &Self::key(id)).await?;
        Ok(job.filter(|job| {
            let expired = job.is_expired(Utc::now());
            if expired {
                debug!("Job {} is past its ttl", id);
            }
            !expired
        }))
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.kv.delete(&Self::key(id)).await
    }
}
