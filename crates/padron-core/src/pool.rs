//! Bounded worker pool of registry agents.
//!
//! Owns the in-memory pending queue, limits concurrent executions, tracks
//! per-agent health, and wraps every agent call in the shared
//! [`CircuitBreaker`]. Outcomes are emitted as [`PoolEvent`]s on an
//! unbounded channel rather than returned to the submitter.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::agent::{AgentFactory, RegistryAgent};
use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerError, CircuitState};
use crate::error::AppError;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Agents pre-warmed at init.
    pub min_agents: usize,
    /// Hard cap on concurrently held agents.
    pub max_agents: usize,
    /// Hard cap on concurrent job executions (may be below `max_agents`).
    pub max_concurrent: usize,
    /// Consecutive errors before an agent is retired and replaced.
    pub agent_error_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_agents: 1,
            max_agents: 3,
            max_concurrent: 3,
            agent_error_threshold: 3,
        }
    }
}

impl PoolConfig {
    pub fn with_min_agents(mut self, min: usize) -> Self {
        self.min_agents = min;
        self
    }

    pub fn with_max_agents(mut self, max: usize) -> Self {
        self.max_agents = max;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }
}

/// One unit of work handed to the pool by the dispatcher.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: Uuid,
    pub citizen_id: String,
}

/// Outcome notifications emitted by the pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    JobSucceeded {
        job_id: Uuid,
        data: serde_json::Value,
        cost: Option<f64>,
        duration: Duration,
    },
    JobFailed {
        job_id: Uuid,
        error: String,
        duration: Duration,
    },
}

/// Read-only diagnostic snapshot of the pool.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_jobs: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub agents: usize,
    pub uptime: Duration,
    pub avg_job_duration: Option<Duration>,
    pub success_rate: f64,
    pub breaker: BreakerSnapshot,
}

/// One agent slot. The agent is taken out (`None`) while a job executes on
/// it, which doubles as the busy flag.
struct AgentSlot<A> {
    id: u64,
    agent: Option<A>,
    jobs_processed: u64,
    consecutive_errors: u32,
    created_at: Instant,
}

impl<A> AgentSlot<A> {
    fn new(id: u64, agent: A) -> Self {
        Self {
            id,
            agent: Some(agent),
            jobs_processed: 0,
            consecutive_errors: 0,
            created_at: Instant::now(),
        }
    }
}

struct PoolInner<A> {
    slots: Vec<AgentSlot<A>>,
    pending: VecDeque<WorkItem>,
    in_flight: usize,
    /// Agent creations currently underway, counted against `max_agents`.
    growing: usize,
    next_slot_id: u64,
    accepting: bool,
    total_jobs: u64,
    succeeded: u64,
    failed: u64,
    busy_time: Duration,
}

struct PoolShared<F: AgentFactory> {
    factory: F,
    config: PoolConfig,
    breaker: CircuitBreaker,
    inner: Mutex<PoolInner<F::Agent>>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    started_at: Instant,
}

/// Concurrency-bounded manager of registry agents and pending lookups.
pub struct WorkerPool<F: AgentFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: AgentFactory> Clone for WorkerPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F: AgentFactory> WorkerPool<F> {
    /// Create a pool and the receiving end of its outcome channel.
    ///
    /// No agents exist until [`WorkerPool::init`] is called.
    pub fn new(
        factory: F,
        config: PoolConfig,
        breaker: CircuitBreaker,
    ) -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PoolShared {
            factory,
            config,
            breaker,
            inner: Mutex::new(PoolInner {
                slots: Vec::new(),
                pending: VecDeque::new(),
                in_flight: 0,
                growing: 0,
                next_slot_id: 0,
                accepting: true,
                total_jobs: 0,
                succeeded: 0,
                failed: 0,
                busy_time: Duration::ZERO,
            }),
            events_tx,
            started_at: Instant::now(),
        });
        (Self { shared }, events_rx)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    /// Pre-warm `min_agents` agents. A failed creation is logged and does
    /// not abort the others.
    pub async fn init(&self) {
        for _ in 0..self.shared.config.min_agents {
            match self.shared.factory.create().await {
                Ok(agent) => {
                    let mut inner = self.shared.inner.lock().await;
                    let id = inner.next_slot_id;
                    inner.next_slot_id += 1;
                    inner.slots.push(AgentSlot::new(id, agent));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create registry agent during init");
                }
            }
        }
        let agents = self.shared.inner.lock().await.slots.len();
        tracing::info!(agents, "Worker pool initialized");
    }

    /// Queue a lookup for execution.
    ///
    /// Rejected immediately with [`AppError::BreakerOpen`] while the
    /// circuit breaker is open; the outcome of an accepted item arrives
    /// later as a [`PoolEvent`].
    pub async fn submit(&self, item: WorkItem) -> Result<(), AppError> {
        if self.shared.breaker.state() == CircuitState::Open {
            let retry_in = self.shared.breaker.retry_in().unwrap_or(Duration::ZERO);
            return Err(AppError::BreakerOpen(retry_in.as_secs()));
        }

        {
            let mut inner = self.shared.inner.lock().await;
            if !inner.accepting {
                return Err(AppError::PoolUnavailable("shutting down".into()));
            }
            inner.pending.push_back(item);
        }

        drain(&self.shared).await;
        Ok(())
    }

    /// Read-only diagnostic surface; no side effects.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.shared.inner.lock().await;
        let avg_job_duration = if inner.total_jobs > 0 {
            Some(inner.busy_time / inner.total_jobs as u32)
        } else {
            None
        };
        let success_rate = if inner.total_jobs > 0 {
            inner.succeeded as f64 / inner.total_jobs as f64
        } else {
            1.0
        };
        PoolStats {
            total_jobs: inner.total_jobs,
            succeeded: inner.succeeded,
            failed: inner.failed,
            queue_depth: inner.pending.len(),
            in_flight: inner.in_flight,
            agents: inner.slots.len(),
            uptime: self.shared.started_at.elapsed(),
            avg_job_duration,
            success_rate,
            breaker: self.shared.breaker.snapshot(),
        }
    }

    /// Stop accepting work, report never-dispatched items as failed so the
    /// dispatcher can requeue them, wait for in-flight executions to
    /// finish, then release every agent.
    pub async fn shutdown(&self) {
        let pending: Vec<WorkItem> = {
            let mut inner = self.shared.inner.lock().await;
            inner.accepting = false;
            inner.pending.drain(..).collect()
        };
        for item in pending {
            let _ = self.shared.events_tx.send(PoolEvent::JobFailed {
                job_id: item.job_id,
                error: "worker pool shutting down".to_string(),
                duration: Duration::ZERO,
            });
        }

        loop {
            let in_flight = self.shared.inner.lock().await.in_flight;
            if in_flight == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let slots: Vec<AgentSlot<F::Agent>> = {
            let mut inner = self.shared.inner.lock().await;
            inner.slots.drain(..).collect()
        };
        for slot in slots {
            if let Some(agent) = slot.agent {
                agent.close().await;
            }
        }
        tracing::info!("Worker pool shut down");
    }
}

/// Dispatch as many pending items as concurrency and agent availability
/// allow. Re-invoked on submission, completion, and growth.
async fn drain<F: AgentFactory>(shared: &Arc<PoolShared<F>>) {
    loop {
        let mut inner = shared.inner.lock().await;
        if !inner.accepting || inner.in_flight >= shared.config.max_concurrent {
            return;
        }
        let Some(item) = inner.pending.pop_front() else {
            return;
        };

        if let Some(pos) = inner.slots.iter().position(|s| s.agent.is_some()) {
            if let Some(agent) = inner.slots[pos].agent.take() {
                let slot_id = inner.slots[pos].id;
                inner.in_flight += 1;
                drop(inner);
                let shared = shared.clone();
                tokio::spawn(async move {
                    execute(shared, slot_id, agent, item).await;
                });
                continue;
            }
            inner.pending.push_front(item);
            return;
        }

        if inner.slots.len() + inner.growing < shared.config.max_agents {
            // Grow on demand, then retry the loop with the new idle agent.
            inner.pending.push_front(item);
            inner.growing += 1;
            drop(inner);
            match shared.factory.create().await {
                Ok(agent) => {
                    let mut inner = shared.inner.lock().await;
                    inner.growing -= 1;
                    if inner.accepting {
                        let id = inner.next_slot_id;
                        inner.next_slot_id += 1;
                        inner.slots.push(AgentSlot::new(id, agent));
                        tracing::debug!(slot = id, agents = inner.slots.len(), "Agent added to pool");
                        continue;
                    }
                    drop(inner);
                    agent.close().await;
                    return;
                }
                Err(e) => {
                    shared.inner.lock().await.growing -= 1;
                    tracing::error!(error = %e, "Failed to create registry agent");
                    return;
                }
            }
        }

        // No idle agent and the pool is at capacity; the pass resumes on
        // the next completion.
        inner.pending.push_front(item);
        return;
    }
}

fn execute<F: AgentFactory>(
    shared: Arc<PoolShared<F>>,
    slot_id: u64,
    agent: F::Agent,
    item: WorkItem,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
    tracing::debug!(job_id = %item.job_id, citizen_id = %item.citizen_id, slot = slot_id, "Resolving");
    let started = Instant::now();
    let result = shared
        .breaker
        .call(|| agent.resolve(&item.citizen_id))
        .await;
    let duration = started.elapsed();

    let mut retired: Option<F::Agent> = None;
    {
        let mut inner = shared.inner.lock().await;
        inner.in_flight -= 1;
        inner.total_jobs += 1;
        inner.busy_time += duration;

        match &result {
            Ok(_) => inner.succeeded += 1,
            Err(_) => inner.failed += 1,
        }

        match inner.slots.iter().position(|s| s.id == slot_id) {
            Some(pos) => match &result {
                Ok(_) => {
                    inner.slots[pos].jobs_processed += 1;
                    inner.slots[pos].consecutive_errors = 0;
                    inner.slots[pos].agent = Some(agent);
                }
                Err(CircuitBreakerError::Open { .. }) => {
                    // The agent was never invoked; its health is unchanged.
                    inner.slots[pos].agent = Some(agent);
                }
                Err(CircuitBreakerError::Inner(_)) => {
                    inner.slots[pos].jobs_processed += 1;
                    inner.slots[pos].consecutive_errors += 1;
                    if inner.slots[pos].consecutive_errors >= shared.config.agent_error_threshold {
                        let slot = inner.slots.remove(pos);
                        tracing::warn!(
                            slot = slot_id,
                            errors = slot.consecutive_errors,
                            age_secs = slot.created_at.elapsed().as_secs(),
                            "Retiring agent after repeated failures"
                        );
                        retired = Some(agent);
                    } else {
                        inner.slots[pos].agent = Some(agent);
                    }
                }
            },
            None => {
                // Slot already gone (shutdown); release the agent below.
                retired = Some(agent);
            }
        }
    }

    let event = match result {
        Ok(resolution) => PoolEvent::JobSucceeded {
            job_id: item.job_id,
            data: resolution.data,
            cost: resolution.cost,
            duration,
        },
        Err(e) => PoolEvent::JobFailed {
            job_id: item.job_id,
            error: e.to_string(),
            duration,
        },
    };
    let _ = shared.events_tx.send(event);

    if let Some(old) = retired {
        old.close().await;
        replace(&shared).await;
    }

    drain(&shared).await;
    })
}

/// Create a replacement agent after a retirement, respecting the agent cap.
async fn replace<F: AgentFactory>(shared: &Arc<PoolShared<F>>) {
    {
        let mut inner = shared.inner.lock().await;
        if !inner.accepting || inner.slots.len() + inner.growing >= shared.config.max_agents {
            return;
        }
        inner.growing += 1;
    }
    match shared.factory.create().await {
        Ok(agent) => {
            let mut inner = shared.inner.lock().await;
            inner.growing -= 1;
            if inner.accepting {
                let id = inner.next_slot_id;
                inner.next_slot_id += 1;
                inner.slots.push(AgentSlot::new(id, agent));
                tracing::info!(slot = id, "Replacement agent created");
            } else {
                drop(inner);
                agent.close().await;
            }
        }
        Err(e) => {
            shared.inner.lock().await.growing -= 1;
            tracing::error!(error = %e, "Failed to create replacement agent");
        }
    }
}
