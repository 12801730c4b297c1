//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. Shared
//! counters use `Arc<Mutex<_>>`/atomics so tests can assert on recorded
//! calls across clones.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::agent::{AgentFactory, RegistryAgent, Resolution};
use crate::error::AppError;
use crate::job::{EnqueueRequest, JobStatus, LookupJob};
use crate::job_queue::JobQueue;

// ---------------------------------------------------------------------------
// MockAgent / MockAgentFactory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockFactoryState {
    created: AtomicUsize,
    closed: AtomicUsize,
    resolve_calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    /// Scripted responses shared by every agent from this factory.
    /// Each resolve pops the front; empty falls back to the default.
    script: Mutex<VecDeque<Result<serde_json::Value, AppError>>>,
    /// Scripted creation failures; each create pops the front.
    create_errors: Mutex<VecDeque<AppError>>,
}

/// Mock registry agent with configurable latency and scripted outcomes.
pub struct MockAgent {
    delay: Duration,
    cost: Option<f64>,
    fail_by_default: bool,
    state: Arc<MockFactoryState>,
}

impl RegistryAgent for MockAgent {
    async fn resolve(&self, citizen_id: &str) -> Result<Resolution, AppError> {
        self.state.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.state.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.state.current.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.state.script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(data)) => Ok(Resolution {
                data,
                cost: self.cost,
            }),
            Some(Err(e)) => Err(e),
            None if self.fail_by_default => {
                Err(AppError::AgentError("simulated registry failure".into()))
            }
            None => Ok(Resolution {
                data: serde_json::json!({ "citizen_id": citizen_id }),
                cost: self.cost,
            }),
        }
    }

    async fn close(&self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory producing [`MockAgent`]s that share one set of counters.
#[derive(Clone)]
pub struct MockAgentFactory {
    delay: Duration,
    cost: Option<f64>,
    fail_by_default: bool,
    state: Arc<MockFactoryState>,
}

impl MockAgentFactory {
    /// Every resolve succeeds with `{"citizen_id": ...}`.
    pub fn succeeding() -> Self {
        Self {
            delay: Duration::ZERO,
            cost: None,
            fail_by_default: false,
            state: Arc::new(MockFactoryState::default()),
        }
    }

    /// Every resolve fails with an agent error.
    pub fn failing() -> Self {
        Self {
            fail_by_default: true,
            ..Self::succeeding()
        }
    }

    /// Scripted responses, consumed across all agents in order.
    pub fn with_responses(responses: Vec<Result<serde_json::Value, AppError>>) -> Self {
        let factory = Self::succeeding();
        *factory.state.script.lock().unwrap() = responses.into();
        factory
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Queue a creation failure; the next `create` pops it.
    pub fn push_create_error(&self, error: AppError) {
        self.state.create_errors.lock().unwrap().push_back(error);
    }

    pub fn agents_created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn agents_closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> usize {
        self.state.resolve_calls.load(Ordering::SeqCst)
    }

    /// Highest number of resolves observed executing at once.
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

impl AgentFactory for MockAgentFactory {
    type Agent = MockAgent;

    async fn create(&self) -> Result<MockAgent, AppError> {
        if let Some(e) = self.state.create_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockAgent {
            delay: self.delay,
            cost: self.cost,
            fail_by_default: self.fail_by_default,
            state: self.state.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockJobQueue
// ---------------------------------------------------------------------------

/// Mock job queue backed by an in-memory Vec.
#[derive(Clone, Default)]
pub struct MockJobQueue {
    jobs: Arc<Mutex<Vec<LookupJob>>>,
    claim_errors: Arc<Mutex<VecDeque<AppError>>>,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<LookupJob>) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(jobs)),
            claim_errors: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue a claim failure; the next `claim_batch` pops it.
    pub fn push_claim_error(&self, error: AppError) {
        self.claim_errors.lock().unwrap().push_back(error);
    }

    /// Point-in-time copy of every job, for assertions.
    pub fn snapshot(&self) -> Vec<LookupJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl JobQueue for MockJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<LookupJob, AppError> {
        let job = LookupJob {
            id: Uuid::new_v4(),
            citizen_id: request.citizen_id,
            requested_by: request.requested_by,
            status: JobStatus::Queued,
            priority: request.priority,
            attempts: 0,
            max_attempts: request.max_attempts.unwrap_or(3),
            result: None,
            last_error: None,
            next_attempt_at: None,
            duration_ms: None,
            cost: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn claim_batch(&self, limit: usize) -> Result<Vec<LookupJob>, AppError> {
        if let Some(e) = self.claim_errors.lock().unwrap().pop_front() {
            return Err(e);
        }

        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();

        let mut eligible: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                j.status == JobStatus::Queued
                    && j.next_attempt_at.is_none_or(|at| at <= now)
            })
            .map(|(i, _)| i)
            .collect();
        eligible.sort_by(|&a, &b| {
            jobs[b]
                .priority
                .cmp(&jobs[a].priority)
                .then(jobs[a].created_at.cmp(&jobs[b].created_at))
        });

        let mut claimed = Vec::new();
        for i in eligible.into_iter().take(limit) {
            jobs[i].status = JobStatus::Processing;
            jobs[i].attempts += 1;
            claimed.push(jobs[i].clone());
        }
        Ok(claimed)
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        result: &serde_json::Value,
        duration: Duration,
        cost: Option<f64>,
    ) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Done;
            job.result = Some(result.clone());
            job.last_error = None;
            job.duration_ms = Some(duration.as_millis() as i64);
            job.cost = cost;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str, duration: Duration) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
            job.duration_ms = Some(duration.as_millis() as i64);
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn requeue_job(
        &self,
        job_id: Uuid,
        error: &str,
        next_attempt_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Queued;
            job.last_error = Some(error.to_string());
            job.next_attempt_at = next_attempt_at;
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<LookupJob>, AppError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<LookupJob>, AppError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.iter().filter(|j| j.status == status).count() as i64)
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a queued LookupJob for testing.
pub fn make_test_job(citizen_id: &str) -> LookupJob {
    LookupJob {
        id: Uuid::new_v4(),
        citizen_id: citizen_id.to_string(),
        requested_by: None,
        status: JobStatus::Queued,
        priority: 0,
        attempts: 0,
        max_attempts: 3,
        result: None,
        last_error: None,
        next_attempt_at: None,
        duration_ms: None,
        cost: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}
