pub mod agent;
pub mod circuit_breaker;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod job_queue;
pub mod pool;
pub mod testutil;

pub use agent::{AgentFactory, RegistryAgent, Resolution};
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};
pub use dispatcher::Dispatcher;
pub use error::AppError;
pub use job::{DispatcherConfig, EnqueueRequest, JobStatus, LookupJob};
pub use job_queue::JobQueue;
pub use pool::{PoolConfig, PoolEvent, PoolStats, WorkItem, WorkerPool};
