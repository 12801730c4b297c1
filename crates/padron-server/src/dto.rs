use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use padron_core::circuit_breaker::BreakerSnapshot;
use padron_core::job::LookupJob;
use padron_core::pool::PoolStats;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    /// Citizen ID to resolve against the registry.
    pub citizen_id: String,
    pub requested_by: Option<Uuid>,
    /// Higher values are claimed first. Defaults to 0.
    pub priority: Option<i16>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub citizen_id: String,
    pub requested_by: Option<Uuid>,
    pub status: String,
    pub priority: i16,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub cost: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<LookupJob> for JobResponse {
    fn from(job: LookupJob) -> Self {
        Self {
            id: job.id,
            citizen_id: job.citizen_id,
            requested_by: job.requested_by,
            status: job.status.to_string(),
            priority: job.priority,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            result: job.result,
            last_error: job.last_error,
            next_attempt_at: job.next_attempt_at,
            duration_ms: job.duration_ms,
            cost: job.cost,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueueCountsResponse {
    pub queued: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BreakerResponse {
    pub state: String,
    pub consecutive_failures: u32,
    pub next_attempt_in_secs: Option<u64>,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub last_error: Option<String>,
}

impl From<BreakerSnapshot> for BreakerResponse {
    fn from(snap: BreakerSnapshot) -> Self {
        Self {
            state: snap.state.to_string(),
            consecutive_failures: snap.consecutive_failures,
            next_attempt_in_secs: snap.next_attempt_in.map(|d| d.as_secs()),
            total_calls: snap.total_calls,
            successful_calls: snap.successful_calls,
            failed_calls: snap.failed_calls,
            rejected_calls: snap.rejected_calls,
            last_error: snap.last_error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PoolStatsResponse {
    pub total_jobs: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub agents: usize,
    pub uptime_secs: u64,
    pub avg_job_ms: Option<u64>,
    pub success_rate: f64,
    pub breaker: BreakerResponse,
}

impl From<PoolStats> for PoolStatsResponse {
    fn from(stats: PoolStats) -> Self {
        Self {
            total_jobs: stats.total_jobs,
            succeeded: stats.succeeded,
            failed: stats.failed,
            queue_depth: stats.queue_depth,
            in_flight: stats.in_flight,
            agents: stats.agents,
            uptime_secs: stats.uptime.as_secs(),
            avg_job_ms: stats.avg_job_duration.map(|d| d.as_millis() as u64),
            success_rate: stats.success_rate,
            breaker: stats.breaker.into(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatsResponse {
    pub queue: QueueCountsResponse,
    /// `null` when this process does not host the dispatcher.
    pub pool: Option<PoolStatsResponse>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    /// Breaker state when the dispatcher runs in this process.
    pub breaker: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
