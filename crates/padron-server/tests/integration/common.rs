use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use padron_db::Database;
use padron_server::routes;
use padron_server::state::AppState;

/// SQL migration statements, executed one at a time.
const MIGRATIONS: &[&str] = &[
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
];

pub struct TestApp {
    pub router: Router,
    _container: ContainerAsync<GenericImage>,
}

/// Spins up PostgreSQL and builds the app router in queue-API-only mode
/// (no dispatcher in the test process).
pub async fn setup_test_app() -> TestApp {
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

    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    let state = Arc::new(AppState {
        db: Database::from_pool(pool),
        dispatcher: None,
    });

    TestApp {
        router: routes::router(state),
        _container: container,
    }
}
