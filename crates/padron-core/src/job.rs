use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a lookup job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// A citizen-ID lookup job in the queue.
///
/// Claimed and reconciled exclusively by the [`crate::dispatcher::Dispatcher`];
/// a job is `Processing` for at most one in-flight dispatch at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupJob {
    pub id: Uuid,
    pub citizen_id: String,
    pub requested_by: Option<Uuid>,
    pub status: JobStatus,
    /// Higher values are claimed first.
    pub priority: i16,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Opaque payload returned by the registry agent on success.
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    /// Earliest time a requeued job may be claimed again.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Cost incurred resolving this job (e.g. CAPTCHA spend).
    pub cost: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LookupJob {
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Request to enqueue a new lookup job.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub citizen_id: String,
    pub requested_by: Option<Uuid>,
    pub priority: i16,
    pub max_attempts: Option<u32>,
}

impl EnqueueRequest {
    pub fn new(citizen_id: impl Into<String>) -> Self {
        Self {
            citizen_id: citizen_id.into(),
            requested_by: None,
            priority: 0,
            max_attempts: None,
        }
    }

    pub fn with_requested_by(mut self, requester: Uuid) -> Self {
        self.requested_by = Some(requester);
        self
    }

    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }
}

/// Configuration for the dispatcher's poll loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Interval between poll cycles. A cycle is re-armed only after the
    /// previous one's synchronous work completes.
    pub poll_interval: Duration,
    /// Maximum number of queued jobs claimed per poll cycle.
    pub batch_size: usize,
    /// Delay before a failed job becomes claimable again.
    /// `Duration::ZERO` requeues for the very next cycle.
    pub retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            retry_delay: Duration::ZERO,
        }
    }
}

impl DispatcherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
