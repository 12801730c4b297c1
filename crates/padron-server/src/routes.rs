use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use padron_core::job::{EnqueueRequest, JobStatus};
use padron_core::job_queue::JobQueue;

use crate::dto::{
    CreateJobRequest, CreateJobResponse, ErrorResponse, HealthResponse, JobListResponse,
    JobResponse, ListJobsQuery, QueueCountsResponse, StatsResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/jobs", post(create_job))
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobs/{id}", get(get_job))
        .route("/v1/stats", get(get_stats))
        .route("/v1/breaker/reset", post(reset_breaker));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job queued", body = CreateJobResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let citizen_id = body.citizen_id.trim();
    if citizen_id.is_empty() {
        let body = ErrorResponse {
            error: "validation_error".to_string(),
            message: "citizen_id must not be empty".to_string(),
        };
        return Ok((StatusCode::BAD_REQUEST, axum::Json(body)).into_response());
    }

    let mut request = EnqueueRequest::new(citizen_id).with_priority(body.priority.unwrap_or(0));
    if let Some(requester) = body.requested_by {
        request = request.with_requested_by(requester);
    }
    if let Some(max) = body.max_attempts {
        request = request.with_max_attempts(max);
    }

    let job = state.db.job_repo().enqueue(request).await?;

    let response = CreateJobResponse {
        job_id: job.id,
        status: job.status.to_string(),
    };

    Ok((StatusCode::ACCEPTED, axum::Json(response)).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "List of jobs", body = JobListResponse),
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status_filter = query
        .status
        .map(|s| {
            s.parse()
                .map_err(|e: String| padron_core::error::AppError::Generic(e))
        })
        .transpose()?;

    let limit = query.limit.unwrap_or(20).min(100);
    let jobs = state.db.job_repo().list_jobs(status_filter, limit).await?;
    let total = jobs.len();

    let response = JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.db.job_repo().get_job(id).await?;

    match job {
        Some(job) => Ok(axum::Json(JobResponse::from(job)).into_response()),
        None => {
            let body = ErrorResponse {
                error: "not_found".to_string(),
                message: format!("Job not found: {id}"),
            };
            Ok((StatusCode::NOT_FOUND, axum::Json(body)).into_response())
        }
    }
}

// ---------------------------------------------------------------------------
// Stats / breaker
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/stats",
    responses(
        (status = 200, description = "Queue counts and pool statistics", body = StatsResponse),
    ),
    tag = "system"
)]
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.db.job_repo();
    let queue = QueueCountsResponse {
        queued: repo.count_by_status(JobStatus::Queued).await?,
        processing: repo.count_by_status(JobStatus::Processing).await?,
        done: repo.count_by_status(JobStatus::Done).await?,
        failed: repo.count_by_status(JobStatus::Failed).await?,
    };

    let pool = match &state.dispatcher {
        Some(dispatcher) => Some(dispatcher.stats().await.into()),
        None => None,
    };

    Ok(axum::Json(StatsResponse { queue, pool }))
}

#[utoipa::path(
    post,
    path = "/v1/breaker/reset",
    responses(
        (status = 204, description = "Breaker forced closed"),
        (status = 409, description = "No dispatcher in this process", body = ErrorResponse),
    ),
    tag = "system"
)]
pub async fn reset_breaker(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.dispatcher {
        Some(dispatcher) => {
            dispatcher.breaker().reset();
            StatusCode::NO_CONTENT.into_response()
        }
        None => {
            let body = ErrorResponse {
                error: "conflict".to_string(),
                message: "This process does not host the dispatcher".to_string(),
            };
            (StatusCode::CONFLICT, axum::Json(body)).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_status = match state.db.job_repo().health_check().await {
        Ok(()) => "ok",
        Err(_) => "error",
    };

    let breaker = match &state.dispatcher {
        Some(dispatcher) => Some(dispatcher.breaker().state().to_string()),
        None => None,
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if db_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        },
        database: db_status,
        breaker,
    };

    (status, axum::Json(response))
}
