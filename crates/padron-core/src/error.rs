use thiserror::Error;

/// Application-wide error types for Padron.
#[derive(Error, Debug)]
pub enum AppError {
    /// The registry agent reported a failed resolution.
    #[error("Agent error: {0}")]
    AgentError(String),

    /// Network/connection error talking to the agent or the registry.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Guarded call did not settle within the breaker's call timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Submission rejected because the circuit breaker is open.
    #[error("Circuit breaker open, retry after {0} seconds")]
    BreakerOpen(u64),

    /// The worker pool is no longer accepting work.
    #[error("Worker pool unavailable: {0}")]
    PoolUnavailable(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_operator_readable() {
        assert_eq!(
            AppError::Timeout(60).to_string(),
            "Request timed out after 60 seconds"
        );
        assert_eq!(
            AppError::BreakerOpen(30).to_string(),
            "Circuit breaker open, retry after 30 seconds"
        );
        assert_eq!(
            AppError::AgentError("captcha rejected".into()).to_string(),
            "Agent error: captcha rejected"
        );
    }
}
