pub mod http_agent;

pub use http_agent::{AgentConfig, HttpAgentFactory, HttpResolverAgent};
