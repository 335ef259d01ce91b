use std::sync::Arc;

use shared::config::server::Config;

use crate::stream::SessionRegistry;

/// State shared by every route.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Every live and lingering session.
    pub registry: Arc<SessionRegistry>,
    /// Loaded configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Fresh state with an empty registry.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    /// Registry key for the stream attached to `thread_id`.
    #[must_use]
    pub fn session_id(&self, thread_id: &str) -> String {
        self.config.session_id(thread_id)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(Config::with_defaults()))
    }
}
