//! Dispatcher: keeps the persisted queue flowing into the worker pool and
//! reconciles outcomes back into persisted job state.
//!
//! The poll loop is single-flight: one task owns claiming, event handling,
//! and breaker-watch logging through a `select!` loop, so no two poll
//! cycles ever overlap and the persisted job record has exactly one writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentFactory;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::AppError;
use crate::job::{DispatcherConfig, LookupJob};
use crate::job_queue::JobQueue;
use crate::pool::{PoolEvent, PoolStats, WorkItem, WorkerPool};

struct DispatcherInner<Q, F>
where
    Q: JobQueue,
    F: AgentFactory,
{
    queue: Q,
    pool: WorkerPool<F>,
    config: DispatcherConfig,
    running: AtomicBool,
    cancel: CancellationToken,
    events: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<PoolEvent>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Owns the lifecycle of the persisted job queue: claims pending jobs on a
/// fixed interval, hands them to the worker pool, and writes terminal or
/// retry state back as outcomes arrive.
pub struct Dispatcher<Q, F>
where
    Q: JobQueue,
    F: AgentFactory,
{
    inner: Arc<DispatcherInner<Q, F>>,
}

impl<Q, F> Clone for Dispatcher<Q, F>
where
    Q: JobQueue,
    F: AgentFactory,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Q, F> Dispatcher<Q, F>
where
    Q: JobQueue + 'static,
    F: AgentFactory,
{
    /// `events` is the receiver created alongside `pool`.
    pub fn new(
        queue: Q,
        pool: WorkerPool<F>,
        events: mpsc::UnboundedReceiver<PoolEvent>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queue,
                pool,
                config,
                running: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                events: tokio::sync::Mutex::new(Some(events)),
                task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Initialize the worker pool and begin the poll loop.
    ///
    /// Guarded against double-start: a second call while running is a
    /// logged no-op.
    pub async fn start(&self) -> Result<(), AppError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Dispatcher already running; start ignored");
            return Ok(());
        }

        let events = match self.inner.events.lock().await.take() {
            Some(events) => events,
            None => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(AppError::Generic(
                    "dispatcher cannot be restarted after stop".into(),
                ));
            }
        };

        self.inner.pool.init().await;

        let inner = self.inner.clone();
        let handle = tokio::spawn(run_loop(inner, events));
        *self.inner.task.lock().await = Some(handle);

        tracing::info!(
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            batch_size = self.inner.config.batch_size,
            "Dispatcher started"
        );
        Ok(())
    }

    /// Stop polling, shut the worker pool down, and wait for in-flight
    /// jobs to drain and be reconciled.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Dispatcher stopping");
        self.inner.cancel.cancel();

        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Dispatcher task failed during shutdown");
            }
        }
        tracing::info!("Dispatcher stopped");
    }

    /// Pool statistics including the breaker snapshot.
    pub async fn stats(&self) -> PoolStats {
        self.inner.pool.stats().await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.inner.pool.breaker()
    }
}

async fn run_loop<Q, F>(
    inner: Arc<DispatcherInner<Q, F>>,
    mut events: mpsc::UnboundedReceiver<PoolEvent>,
) where
    Q: JobQueue + 'static,
    F: AgentFactory,
{
    // Claimed jobs awaiting an outcome, keyed by id. Only this task
    // touches the map, so job reconciliation is race-free.
    let mut in_flight: HashMap<Uuid, LookupJob> = HashMap::new();

    let mut interval = tokio::time::interval(inner.config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut breaker_rx = inner.pool.breaker().subscribe();

    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            _ = interval.tick() => {
                poll_cycle(&inner, &mut in_flight).await;
            }
            Some(event) = events.recv() => {
                handle_event(&inner, event, &mut in_flight).await;
            }
            Ok(()) = breaker_rx.changed() => {
                match *breaker_rx.borrow_and_update() {
                    CircuitState::Open => {
                        tracing::warn!("Circuit breaker opened; pausing job claims");
                    }
                    CircuitState::HalfOpen => {
                        tracing::info!("Circuit breaker half-open; probing registry");
                    }
                    CircuitState::Closed => {
                        tracing::info!("Circuit breaker closed; resuming job claims");
                    }
                }
            }
        }
    }

    // Cooperative shutdown: the pool reports pending items as failed and
    // waits for in-flight executions, then every buffered outcome is
    // reconciled before returning.
    inner.pool.shutdown().await;
    while !in_flight.is_empty() {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Some(event)) => handle_event(&inner, event, &mut in_flight).await,
            _ => break,
        }
    }
    if !in_flight.is_empty() {
        tracing::warn!(jobs = in_flight.len(), "Unreconciled jobs left at shutdown");
    }
}

/// One poll cycle: claim up to `batch_size` queued jobs and submit them,
/// without waiting for their completion.
async fn poll_cycle<Q, F>(inner: &Arc<DispatcherInner<Q, F>>, in_flight: &mut HashMap<Uuid, LookupJob>)
where
    Q: JobQueue + 'static,
    F: AgentFactory,
{
    // While the breaker is open, claiming would only burn attempts on
    // guaranteed rejections. The breaker's lazy half-open transition means
    // the first tick past the reset timeout resumes claiming, which
    // supplies the probe calls.
    if inner.pool.breaker().state() == CircuitState::Open {
        tracing::debug!("Circuit breaker open; skipping claim cycle");
        return;
    }

    let jobs = match inner.queue.claim_batch(inner.config.batch_size).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(error = %e, "Failed to claim queued jobs");
            return;
        }
    };
    if jobs.is_empty() {
        return;
    }
    tracing::debug!(count = jobs.len(), "Claimed jobs for dispatch");

    for job in jobs {
        let item = WorkItem {
            job_id: job.id,
            citizen_id: job.citizen_id.clone(),
        };
        match inner.pool.submit(item).await {
            Ok(()) => {
                in_flight.insert(job.id, job);
            }
            Err(e) => {
                // Per-job submit errors do not abort the cycle; the job
                // goes through the normal bounded-retry path.
                tracing::warn!(job_id = %job.id, error = %e, "Failed to submit job to pool");
                reconcile_failure(inner, job, e.to_string(), Duration::ZERO).await;
            }
        }
    }
}

async fn handle_event<Q, F>(
    inner: &Arc<DispatcherInner<Q, F>>,
    event: PoolEvent,
    in_flight: &mut HashMap<Uuid, LookupJob>,
) where
    Q: JobQueue + 'static,
    F: AgentFactory,
{
    match event {
        PoolEvent::JobSucceeded {
            job_id,
            data,
            cost,
            duration,
        } => {
            if in_flight.remove(&job_id).is_none() {
                tracing::warn!(%job_id, "Success outcome for unknown job");
            }
            match inner.queue.complete_job(job_id, &data, duration, cost).await {
                Ok(()) => {
                    tracing::info!(
                        %job_id,
                        duration_ms = duration.as_millis() as u64,
                        "Lookup completed"
                    );
                }
                Err(e) => {
                    tracing::error!(%job_id, error = %e, "Failed to mark job done");
                }
            }
        }
        PoolEvent::JobFailed {
            job_id,
            error,
            duration,
        } => match in_flight.remove(&job_id) {
            Some(job) => reconcile_failure(inner, job, error, duration).await,
            None => tracing::warn!(%job_id, "Failure outcome for unknown job"),
        },
    }
}

/// Bounded retry via requeue: back to `queued` until the attempt budget is
/// spent, then a terminal failure with the last error preserved.
async fn reconcile_failure<Q, F>(
    inner: &Arc<DispatcherInner<Q, F>>,
    job: LookupJob,
    error: String,
    duration: Duration,
) where
    Q: JobQueue + 'static,
    F: AgentFactory,
{
    if job.attempts_exhausted() {
        tracing::warn!(
            job_id = %job.id,
            attempts = job.attempts,
            error = %error,
            "Job permanently failed"
        );
        if let Err(e) = inner.queue.fail_job(job.id, &error, duration).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job failed");
        }
    } else {
        let next_attempt_at = if inner.config.retry_delay.is_zero() {
            None
        } else {
            chrono::Duration::from_std(inner.config.retry_delay)
                .ok()
                .map(|delay| Utc::now() + delay)
        };
        tracing::info!(
            job_id = %job.id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            error = %error,
            "Requeueing failed job"
        );
        if let Err(e) = inner
            .queue
            .requeue_job(job.id, &error, next_attempt_at)
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to requeue job");
        }
    }
}
