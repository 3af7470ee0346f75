//! Asynchronous job execution
//!
//! A submitted request is written to the shared store as a pending job and run
//! in the background. Any process sharing the store can answer status and
//! result queries; the store is the only source of truth.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use conclave_core::coordination::CoordinationRequest;
use conclave_core::job::{Job, JobFailure, JobResultView, JobStatus, JobStatusView, JobStore};
use conclave_core::store::KvStore;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::coordinator::{CoordinationEvent, Coordinator, RunControl, EVENT_BUFFER};
use crate::error::{CoordinationError, JobError};

#[derive(Clone)]
pub struct JobManager {
    store: JobStore,
    coordinator: Arc<Coordinator>,
    config: JobConfig,
    worker_id: String,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl JobManager {
    pub fn new(kv: Arc<dyn KvStore>, coordinator: Arc<Coordinator>, config: JobConfig) -> Self {
        Self {
            store: JobStore::new(kv, config.orphan_after()),
            coordinator,
            config,
            worker_id: generate_worker_id(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Persist a pending job and start running it in the background
    pub async fn submit(&self, request: CoordinationRequest) -> Result<Uuid, JobError> {
        request
            .validate()
            .map_err(|e| JobError::InvalidRequest(e.to_string()))?;

        let job = Job::new(request, self.config.ttl.as_secs());
        let job_id = job.id;
        self.store.put(&job).await?;

        let token = CancellationToken::new();
        self.running.lock().await.insert(job_id, token.clone());

        let manager = self.clone();
        tokio::spawn(async move {
            manager.execute(job, token).await;
            manager.running.lock().await.remove(&job_id);
        });

        info!("Submitted job {}", job_id);
        Ok(job_id)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<JobStatusView, JobError> {
        let job = self.load(job_id).await?;
        Ok(job.status_view())
    }

    /// Result of a terminal job. Pending and processing jobs are not ready.
    pub async fn result(&self, job_id: Uuid) -> Result<JobResultView, JobError> {
        let job = self.load(job_id).await?;
        if !job.status.is_terminal() {
            return Err(JobError::NotReady {
                job_id,
                status: job.status,
            });
        }
        Ok(job.result_view())
    }

    /// Remove a job. A run in progress stops before its next step and never
    /// writes the record back.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), JobError> {
        if let Some(token) = self.running.lock().await.get(&job_id) {
            token.cancel();
        }
        if !self.store.delete(job_id).await? {
            return Err(JobError::NotFound { job_id });
        }
        info!("Cancelled job {}", job_id);
        Ok(())
    }

    /// Read a live job. A non-terminal job past budget plus grace belongs to a
    /// worker that is gone and is reported as timed out; the record itself is
    /// left for its ttl to reap.
    async fn load(&self, job_id: Uuid) -> Result<Job, JobError> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or(JobError::NotFound { job_id })?;

        let limit = self.config.orphan_after().as_secs();
        if job.is_overdue(Utc::now(), limit) {
            debug!("Job {} is overdue; reporting timeout", job_id);
            job.status = JobStatus::Timeout;
            job.error = Some(JobFailure::new(
                "timeout",
                format!("Job did not finish within {}s", limit),
            ));
        }
        Ok(job)
    }

    async fn execute(&self, mut job: Job, token: CancellationToken) {
        let job_id = job.id;
        if let Err(e) = job.start(&self.worker_id) {
            error!("Job {} cannot start: {}", job_id, e);
            return;
        }
        match self.store.update(&job).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Job {} was cancelled before it started", job_id);
                return;
            }
            Err(e) => warn!("Failed to mark job {} as processing: {}", job_id, e),
        }

        let request = job.request.clone();
        let job = Arc::new(Mutex::new(job));
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let control = RunControl::new().with_events(tx).with_cancel(token.clone());

        let tracker = tokio::spawn(track_progress(
            self.store.clone(),
            job.clone(),
            rx,
            token.clone(),
        ));

        let run = tokio::time::timeout(
            self.config.budget,
            self.coordinator.coordinate_with(&request, &control),
        )
        .await;
        drop(control);
        if let Err(e) = tracker.await {
            warn!("Progress tracker for job {} ended abnormally: {}", job_id, e);
        }

        if token.is_cancelled() {
            info!("Job {} was cancelled; dropping its result", job_id);
            return;
        }

        let mut job = job.lock().await;
        let transition = match run {
            Ok(Ok(outcome)) => {
                info!("Job {} completed", job_id);
                job.complete(outcome)
            }
            Ok(Err(err)) => {
                warn!("Job {} failed: {}", job_id, err);
                job.fail(failure_for(&err))
            }
            Err(_) => {
                warn!("Job {} exceeded its budget", job_id);
                token.cancel();
                job.time_out(self.config.budget.as_secs())
            }
        };
        if let Err(e) = transition {
            error!("Job {} could not be finalized: {}", job_id, e);
            return;
        }
        // A record deleted by a cancel anywhere in the fleet stays deleted
        match self.store.update(&job).await {
            Ok(true) => {}
            Ok(false) => info!("Job {} was cancelled; dropping its result", job_id),
            Err(e) => error!("Failed to persist final state of job {}: {}", job_id, e),
        }
    }
}

/// Fold progress events into the job record. A record that disappeared from
/// the store means the job was cancelled elsewhere in the fleet; the write is
/// conditional so it never brings such a record back.
async fn track_progress(
    store: JobStore,
    job: Arc<Mutex<Job>>,
    mut events: mpsc::Receiver<CoordinationEvent>,
    token: CancellationToken,
) {
    while let Some(event) = events.recv().await {
        let CoordinationEvent::Progress { progress, .. } = event else {
            continue;
        };
        if token.is_cancelled() {
            continue;
        }
        let mut job = job.lock().await;
        job.set_progress(progress.min(0.99));
        match store.update(&job).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Job {} record removed; cancelling run", job.id);
                token.cancel();
            }
            Err(e) => debug!("Failed to write progress for job {}: {}", job.id, e),
        }
    }
}

fn generate_worker_id() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect();
    format!("worker-{}", suffix)
}

fn failure_for(err: &CoordinationError) -> JobFailure {
    let failure = JobFailure::new(err.kind(), err.to_string());
    match err.agent() {
        Some(agent) => failure.with_agent(agent),
        None => failure,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::time::Duration;

    use async_trait::async_trait;
    use conclave_core::store::{FaultInjectingStore, MemoryKvStore};

    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::error::AgentError;
    use crate::testing::{registry, ScriptedAgent};

    fn manager_with(kv: Arc<dyn KvStore>, agents: Vec<Arc<ScriptedAgent>>, config: JobConfig) -> JobManager {
        let coordinator = Coordinator::new(Arc::new(registry(agents)), CoordinatorConfig::default());
        JobManager::new(kv, Arc::new(coordinator), config)
    }

    fn manager(agents: Vec<Arc<ScriptedAgent>>) -> JobManager {
        manager_with(Arc::new(MemoryKvStore::new()), agents, JobConfig::default())
    }

    async fn wait_terminal(manager: &JobManager, id: Uuid) -> JobStatusView {
        loop {
            let view = manager.status(id).await.unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_pending_right_after_submit() {
        let manager = manager(vec![Arc::new(ScriptedAgent::new("pm", "hi"))]);
        let id = manager.submit(CoordinationRequest::new("q", "pm")).await.unwrap();

        let view = manager.status(id).await.unwrap();
        assert_eq!(view.status, JobStatus::Pending);
        assert_eq!(view.progress, 0.0);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let manager = manager(vec![Arc::new(ScriptedAgent::new("pm", "hi"))]);
        let mut ids = HashSet::new();
        for _ in 0..10_000 {
            let id = manager.submit(CoordinationRequest::new("q", "pm")).await.unwrap();
            assert!(ids.insert(id));
        }
        assert_eq!(ids.len(), 10_000);
    }

    #[tokio::test]
    async fn test_result_is_idempotent() {
        let manager = manager(vec![Arc::new(ScriptedAgent::new("pm", "the answer"))]);
        let id = manager.submit(CoordinationRequest::new("q", "pm")).await.unwrap();

        let view = wait_terminal(&manager, id).await;
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 1.0);

        let first = manager.result(id).await.unwrap();
        let second = manager.result(id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.result.unwrap().response.content, "the answer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_not_ready_while_processing() {
        let slow = Arc::new(ScriptedAgent::new("pm", "eventually").with_delay(Duration::from_secs(30)));
        let manager = manager(vec![slow]);
        let id = manager.submit(CoordinationRequest::new("q", "pm")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.status(id).await.unwrap().status, JobStatus::Processing);
        match manager.result(id).await {
            Err(JobError::NotReady { status, .. }) => assert_eq!(status, JobStatus::Processing),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_primary_fails_job() {
        let pm = Arc::new(ScriptedAgent::failing("pm", AgentError::capability("pm", "refused")));
        let manager = manager(vec![pm]);
        let id = manager.submit(CoordinationRequest::new("q", "pm")).await.unwrap();

        assert_eq!(wait_terminal(&manager, id).await.status, JobStatus::Failed);
        let error = manager.result(id).await.unwrap().error.unwrap();
        assert_eq!(error.kind, "primary_failed");
        assert_eq!(error.agent.as_deref(), Some("pm"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_overrun_times_out() {
        let slow = Arc::new(ScriptedAgent::new("pm", "late").with_delay(Duration::from_secs(20)));
        let config = JobConfig {
            budget: Duration::from_secs(5),
            ..JobConfig::default()
        };
        let manager = manager_with(Arc::new(MemoryKvStore::new()), vec![slow], config);
        let id = manager.submit(CoordinationRequest::new("q", "pm")).await.unwrap();

        assert_eq!(wait_terminal(&manager, id).await.status, JobStatus::Timeout);
        let error = manager.result(id).await.unwrap().error.unwrap();
        assert_eq!(error.kind, "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_removes_job() {
        let slow = Arc::new(ScriptedAgent::new("pm", "late").with_delay(Duration::from_secs(20)));
        let manager = manager(vec![slow]);
        let id = manager.submit(CoordinationRequest::new("q", "pm")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.cancel(id).await.unwrap();
        assert!(matches!(manager.status(id).await, Err(JobError::NotFound { .. })));

        // The run finishing later must not bring the record back
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(matches!(manager.status(id).await, Err(JobError::NotFound { .. })));
        assert!(matches!(manager.cancel(id).await, Err(JobError::NotFound { .. })));
    }

    /// Deletes the job record just before the tracker's first progress write,
    /// the way a cancel served by another worker would
    struct CancelledElsewhere {
        inner: MemoryKvStore,
        updates: AtomicU32,
    }

    #[async_trait]
    impl KvStore for CancelledElsewhere {
        async fn get(&self, key: &str) -> conclave_core::Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> conclave_core::Result<()> {
            self.inner.set(key, value, ttl).await
        }

        async fn replace(
            &self,
            key: &str,
            value: String,
            ttl: Option<Duration>,
        ) -> conclave_core::Result<bool> {
            // The first update marks the job as processing; the second is progress
            if self.updates.fetch_add(1, AtomicOrdering::SeqCst) == 1 {
                self.inner.delete(key).await?;
            }
            self.inner.replace(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> conclave_core::Result<bool> {
            self.inner.delete(key).await
        }

        async fn incr(&self, key: &str, ttl: Duration) -> conclave_core::Result<u64> {
            self.inner.incr(key, ttl).await
        }

        async fn decr(&self, key: &str) -> conclave_core::Result<u64> {
            self.inner.decr(key).await
        }

        fn name(&self) -> &'static str {
            "cancelled-elsewhere"
        }
    }

    #[tokio::test]
    async fn test_progress_write_does_not_resurrect_cancelled_job() {
        let kv = Arc::new(CancelledElsewhere {
            inner: MemoryKvStore::new(),
            updates: AtomicU32::new(0),
        });
        let pm = Arc::new(ScriptedAgent::new("pm", "draft"));
        let reviewer = Arc::new(ScriptedAgent::new("b", "review"));
        let manager = manager_with(kv.clone(), vec![pm, reviewer], JobConfig::default());
        let id = manager
            .submit(CoordinationRequest::new("q", "pm").with_supporting(["b"]))
            .await
            .unwrap();

        while !manager.running.lock().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(kv.updates.load(AtomicOrdering::SeqCst) >= 2);
        assert!(matches!(manager.status(id).await, Err(JobError::NotFound { .. })));
        assert!(kv.inner.get(&format!("job:{}", id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let manager = manager(vec![]);
        let err = manager.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_store_outage_is_transient_error() {
        let faulty = Arc::new(FaultInjectingStore::new(Arc::new(MemoryKvStore::new())));
        let manager = manager_with(
            faulty.clone(),
            vec![Arc::new(ScriptedAgent::new("pm", "hi"))],
            JobConfig::default(),
        );
        let id = manager.submit(CoordinationRequest::new("q", "pm")).await.unwrap();

        faulty.set_failing(true);
        let err = manager.status(id).await.unwrap_err();
        assert!(matches!(err, JobError::StoreUnavailable(_)));
        assert!(matches!(
            manager.submit(CoordinationRequest::new("q", "pm")).await,
            Err(JobError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_orphaned_job_reads_as_timeout() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let config = JobConfig::default();
        let store = JobStore::new(kv.clone(), config.orphan_after());

        let mut job = Job::new(CoordinationRequest::new("q", "pm"), 3600);
        job.submitted_at = Utc::now() - chrono::Duration::hours(2);
        job.start("crashed-worker").unwrap();
        store.put(&job).await.unwrap();

        let manager = manager_with(kv, vec![], config);
        assert_eq!(manager.status(job.id).await.unwrap().status, JobStatus::Timeout);
        // Nothing was written back
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Processing);
    }
}
