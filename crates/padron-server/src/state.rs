use padron_agent::HttpAgentFactory;
use padron_core::Dispatcher;
use padron_db::{Database, LookupJobRepository};

/// The dispatcher as hosted by this server process.
pub type LookupDispatcher = Dispatcher<LookupJobRepository, HttpAgentFactory>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    /// Present when this process hosts the dispatcher (a resolver service
    /// is configured); `None` leaves the server in queue-API-only mode.
    pub dispatcher: Option<LookupDispatcher>,
}
