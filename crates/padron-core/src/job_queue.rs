use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{EnqueueRequest, JobStatus, LookupJob};

/// Persistent queue of lookup jobs.
///
/// Implementations must support atomic claiming via `SELECT FOR UPDATE SKIP
/// LOCKED` or equivalent: a claimed job transitions to `processing` with its
/// attempt count incremented in the same statement, so the next poll cycle
/// cannot claim it again.
pub trait JobQueue: Send + Sync + Clone {
    fn enqueue(
        &self,
        request: EnqueueRequest,
    ) -> impl Future<Output = Result<LookupJob, AppError>> + Send;

    /// Atomically claim up to `limit` queued jobs for processing.
    ///
    /// Jobs are selected in priority-descending then created-at-ascending
    /// order, skipping any whose `next_attempt_at` lies in the future.
    /// Each claimed job is returned already in `processing` state with
    /// `attempts` incremented.
    fn claim_batch(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LookupJob>, AppError>> + Send;

    /// Mark a job done, storing the result payload, execution duration,
    /// and incurred cost.
    fn complete_job(
        &self,
        job_id: Uuid,
        result: &serde_json::Value,
        duration: Duration,
        cost: Option<f64>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Mark a job permanently failed, preserving the terminal error.
    fn fail_job(
        &self,
        job_id: Uuid,
        error: &str,
        duration: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Revert a job to `queued` for another attempt, recording the error.
    /// If `next_attempt_at` is set, the job is not claimable before it.
    fn requeue_job(
        &self,
        job_id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<LookupJob>, AppError>> + Send;

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LookupJob>, AppError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}
