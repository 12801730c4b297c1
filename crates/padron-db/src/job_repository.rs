use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use padron_core::error::AppError;
use padron_core::job::{EnqueueRequest, JobStatus, LookupJob};
use padron_core::job_queue::JobQueue;

/// PostgreSQL-backed lookup job queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct LookupJobRepository {
    pool: Pool<Postgres>,
}

impl LookupJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Cheap connectivity probe for health endpoints.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct LookupJobRow {
    id: Uuid,
    citizen_id: String,
    requested_by: Option<Uuid>,
    status: String,
    priority: i16,
    attempts: i32,
    max_attempts: i32,
    result: Option<serde_json::Value>,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    cost: Option<f64>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<LookupJobRow> for LookupJob {
    fn from(row: LookupJobRow) -> Self {
        LookupJob {
            id: row.id,
            citizen_id: row.citizen_id,
            requested_by: row.requested_by,
            status: row.status.parse().unwrap_or(JobStatus::Queued),
            priority: row.priority,
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            result: row.result,
            last_error: row.last_error,
            next_attempt_at: row.next_attempt_at,
            duration_ms: row.duration_ms,
            cost: row.cost,
            created_at: row.created_at,
            completed_at: row.completed_at,
        }
    }
}

impl JobQueue for LookupJobRepository {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<LookupJob, AppError> {
        let row = sqlx::query_as::<_, LookupJobRow>(
            r#"
            INSERT INTO lookup_jobs (citizen_id, requested_by, priority, max_attempts)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&request.citizen_id)
        .bind(request.requested_by)
        .bind(request.priority)
        .bind(request.max_attempts.unwrap_or(3) as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn claim_batch(&self, limit: usize) -> Result<Vec<LookupJob>, AppError> {
        let rows = sqlx::query_as::<_, LookupJobRow>(
            r#"
            UPDATE lookup_jobs
            SET status = 'processing', attempts = attempts + 1
            WHERE id IN (
                SELECT id FROM lookup_jobs
                WHERE status = 'queued'
                  AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            RETURNING *
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // RETURNING does not preserve the claim order.
        let mut jobs: Vec<LookupJob> = rows.into_iter().map(Into::into).collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        result: &serde_json::Value,
        duration: Duration,
        cost: Option<f64>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE lookup_jobs
            SET status = 'done', result = $2, duration_ms = $3, cost = $4,
                completed_at = NOW(), last_error = NULL, next_attempt_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(result)
        .bind(duration.as_millis() as i64)
        .bind(cost)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str, duration: Duration) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE lookup_jobs
            SET status = 'failed', last_error = $2, duration_ms = $3,
                completed_at = NOW(), next_attempt_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(duration.as_millis() as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn requeue_job(
        &self,
        job_id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE lookup_jobs
            SET status = 'queued', last_error = $2, next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<LookupJob>, AppError> {
        let row = sqlx::query_as::<_, LookupJobRow>(r#"SELECT * FROM lookup_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<LookupJob>, AppError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, LookupJobRow>(
                r#"
                SELECT * FROM lookup_jobs
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, LookupJobRow>(
                r#"
                SELECT * FROM lookup_jobs
                ORDER BY created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM lookup_jobs WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}
