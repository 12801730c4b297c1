use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use padron_core::agent::{AgentFactory, RegistryAgent, Resolution};
use padron_core::error::AppError;

/// Configuration for the resolver-agent service client.
///
/// The service performs the actual page navigation and CAPTCHA solving;
/// this crate only speaks its HTTP contract: `GET /health` for readiness
/// and `POST /resolve` for one lookup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub base_url: Url,
    /// Bearer token for the resolver service, if it requires one.
    pub token: Option<String>,
    /// Client-side bound on one resolve call. Should exceed the circuit
    /// breaker's call timeout so the breaker accounts the failure first.
    pub timeout: Duration,
}

impl AgentConfig {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid resolver URL '{base_url}': {e}")))?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::ConfigError(format!(
                    "Resolver URL scheme '{scheme}' is not allowed (only http/https)"
                )));
            }
        }
        Ok(Self {
            base_url,
            token: None,
            timeout: Duration::from_secs(120),
        })
    }

    /// Read configuration from environment variables.
    ///
    /// - `PADRON_RESOLVER_URL` (required)
    /// - `PADRON_RESOLVER_TOKEN` (optional)
    /// - `PADRON_RESOLVER_TIMEOUT_SECS` (optional, defaults to 120)
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("PADRON_RESOLVER_URL").map_err(|_| {
            AppError::ConfigError("PADRON_RESOLVER_URL not set. Required for dispatching.".into())
        })?;
        let mut config = Self::new(&url)?;

        if let Ok(token) = std::env::var("PADRON_RESOLVER_TOKEN") {
            config.token = Some(token);
        }
        if let Ok(raw) = std::env::var("PADRON_RESOLVER_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid PADRON_RESOLVER_TIMEOUT_SECS '{raw}': must be a positive integer"
                ))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::ConfigError(format!("Invalid resolver endpoint '{path}': {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    data: serde_json::Value,
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Registry agent backed by one slot on the remote resolver service.
pub struct HttpResolverAgent {
    client: Client,
    config: AgentConfig,
}

impl HttpResolverAgent {
    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl RegistryAgent for HttpResolverAgent {
    async fn resolve(&self, citizen_id: &str) -> Result<Resolution, AppError> {
        let endpoint = self.config.endpoint("resolve")?;
        let response = self
            .auth(self.client.post(endpoint))
            .json(&serde_json::json!({ "citizen_id": citizen_id }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.config.timeout.as_secs())
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|e| e.error)
                .unwrap_or_else(|| format!("resolver returned HTTP {}", status.as_u16()));
            return Err(AppError::AgentError(message));
        }

        let body: ResolveResponse = response
            .json()
            .await
            .map_err(|e| AppError::AgentError(format!("Malformed resolver response: {e}")))?;

        Ok(Resolution {
            data: body.data,
            cost: body.cost,
        })
    }

    async fn close(&self) {
        // The service owns the browser session; nothing held client-side.
        tracing::debug!("Resolver agent released");
    }
}

/// Factory creating [`HttpResolverAgent`]s against one resolver service.
///
/// All agents share a single connection pool; creation probes the
/// service's health endpoint, so a created agent is ready or creation
/// fails.
#[derive(Clone)]
pub struct HttpAgentFactory {
    client: Client,
    config: AgentConfig,
}

impl HttpAgentFactory {
    pub fn new(config: AgentConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("Padron/0.2")
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::NetworkError(e.to_string()))?;
        Ok(Self { client, config })
    }
}

impl AgentFactory for HttpAgentFactory {
    type Agent = HttpResolverAgent;

    async fn create(&self) -> Result<HttpResolverAgent, AppError> {
        let agent = HttpResolverAgent {
            client: self.client.clone(),
            config: self.config.clone(),
        };

        let endpoint = agent.config.endpoint("health")?;
        let response = agent
            .auth(agent.client.get(endpoint))
            .send()
            .await
            .map_err(|e| AppError::NetworkError(format!("Resolver health check failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::AgentError(format!(
                "Resolver unhealthy: HTTP {}",
                response.status().as_u16()
            )));
        }

        Ok(agent)
    }
}
