use std::future::Future;

use crate::error::AppError;

/// Successful outcome of one registry resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Opaque record extracted from the registry, stored verbatim on the job.
    pub data: serde_json::Value,
    /// Cost incurred by this resolution (e.g. CAPTCHA solving spend).
    pub cost: Option<f64>,
}

/// One extraction agent: resolves a single citizen ID per call against the
/// external registry, handling page navigation and CAPTCHA solving behind
/// this interface.
///
/// A returned `Err` and a registry-side "not resolvable" failure are the
/// same thing to the worker pool: both count against the circuit breaker
/// and surface as a failed job outcome.
pub trait RegistryAgent: Send + Sync + 'static {
    fn resolve(
        &self,
        citizen_id: &str,
    ) -> impl Future<Output = Result<Resolution, AppError>> + Send;

    /// Release underlying resources (sessions, browser contexts).
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Factory for registry agents, used by the worker pool to pre-warm its
/// minimum set and to grow or replace agents on demand.
///
/// `create` returns a ready agent or an error: initialization is part of
/// construction.
pub trait AgentFactory: Send + Sync + Clone + 'static {
    type Agent: RegistryAgent;

    fn create(&self) -> impl Future<Output = Result<Self::Agent, AppError>> + Send;
}
