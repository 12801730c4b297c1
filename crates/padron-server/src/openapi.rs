use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Padron API",
        version = "0.2.0",
        description = "Citizen-ID lookup queue with a bounded worker pool and circuit breaker."
    ),
    paths(
        crate::routes::create_job,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::get_stats,
        crate::routes::reset_breaker,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::CreateJobRequest,
        crate::dto::CreateJobResponse,
        crate::dto::JobResponse,
        crate::dto::JobListResponse,
        crate::dto::StatsResponse,
        crate::dto::QueueCountsResponse,
        crate::dto::PoolStatsResponse,
        crate::dto::BreakerResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "jobs", description = "Lookup job management"),
        (name = "system", description = "Health, statistics, and breaker control"),
    )
)]
pub struct ApiDoc;
