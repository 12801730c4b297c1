use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// SQL migration statements, executed one at a time.
const MIGRATIONS: &[&str] = &[
    // 0001_lookup_jobs.sql
    r#"CREATE TABLE IF NOT EXISTS lookup_jobs (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        citizen_id VARCHAR(32) NOT NULL,
        requested_by UUID,
        status VARCHAR(20) NOT NULL DEFAULT 'queued',
        priority SMALLINT NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        result JSONB,
        last_error TEXT,
        next_attempt_at TIMESTAMPTZ,
        duration_ms BIGINT,
        cost DOUBLE PRECISION,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        completed_at TIMESTAMPTZ,
        CONSTRAINT chk_lookup_jobs_status CHECK (
            status IN ('queued', 'processing', 'done', 'failed')
        )
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_lookup_jobs_claim
        ON lookup_jobs(priority DESC, created_at ASC) WHERE status = 'queued'"#,
    r#"CREATE INDEX IF NOT EXISTS idx_lookup_jobs_retry
        ON lookup_jobs(next_attempt_at) WHERE status = 'queued' AND next_attempt_at IS NOT NULL"#,
    r#"CREATE INDEX IF NOT EXISTS idx_lookup_jobs_status
        ON lookup_jobs(status, created_at DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_lookup_jobs_citizen
        ON lookup_jobs(citizen_id, created_at DESC)"#,
];

/// Spins up a PostgreSQL container and returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration —
/// dropping it will stop the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "padron_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/padron_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    // Run migrations one statement at a time
    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}
