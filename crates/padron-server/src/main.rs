use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use padron_agent::{AgentConfig, HttpAgentFactory};
use padron_core::{
    AppError, CircuitBreaker, CircuitBreakerConfig, Dispatcher, DispatcherConfig, PoolConfig,
    WorkerPool,
};
use padron_db::{Database, DatabaseConfig};
use padron_server::routes;
use padron_server::state::{AppState, LookupDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("padron=info".parse()?))
        .with_target(false)
        .init();

    let port = std::env::var("PADRON_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let dispatcher = match std::env::var("PADRON_RESOLVER_URL") {
        Ok(_) => Some(build_dispatcher(&db)?),
        Err(_) => {
            tracing::warn!("PADRON_RESOLVER_URL not set; running in queue-API-only mode");
            None
        }
    };
    if let Some(dispatcher) = &dispatcher {
        dispatcher.start().await?;
    }

    let state = Arc::new(AppState {
        db,
        dispatcher: dispatcher.clone(),
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain in-flight lookups before the process exits.
    if let Some(dispatcher) = dispatcher {
        dispatcher.stop().await;
    }

    Ok(())
}

fn build_dispatcher(db: &Database) -> Result<LookupDispatcher, AppError> {
    let factory = HttpAgentFactory::new(AgentConfig::from_env()?)?;
    let breaker = CircuitBreaker::new("registry", CircuitBreakerConfig::default());

    let pool_config = PoolConfig::default()
        .with_min_agents(env_or("PADRON_MIN_AGENTS", 1)?)
        .with_max_agents(env_or("PADRON_MAX_AGENTS", 3)?)
        .with_max_concurrent(env_or("PADRON_MAX_CONCURRENT", 3)?);
    let (pool, events) = WorkerPool::new(factory, pool_config, breaker);

    let config = DispatcherConfig::default()
        .with_poll_interval(Duration::from_secs(env_or("PADRON_POLL_INTERVAL_SECS", 5)?))
        .with_batch_size(env_or("PADRON_BATCH_SIZE", 10)?)
        .with_retry_delay(Duration::from_secs(env_or("PADRON_RETRY_DELAY_SECS", 0)?));

    Ok(Dispatcher::new(db.job_repo(), pool, events, config))
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::ConfigError(format!("Invalid {name} '{raw}'"))),
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutdown signal received");
}
