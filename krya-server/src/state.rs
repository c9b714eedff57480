//! Shared application state for the API server.

use std::sync::Arc;

use krya::coordinator::Coordinator;
use krya::io::config::ConfigHandle;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Live configuration shared with the code generator.
    pub fn config(&self) -> &ConfigHandle {
        self.coordinator.config()
    }
}
