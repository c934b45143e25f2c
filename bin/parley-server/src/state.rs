//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::backend::CompletionBackend;
use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Upstream that produces completion deltas.
    pub backend: Arc<dyn CompletionBackend>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}
