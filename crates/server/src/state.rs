//! Application state shared across handlers and connections.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::services::Services;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; the HTTP router and every TCP connection
/// hold a copy.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    dispatcher: Dispatcher,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(config: ServerConfig, services: Services) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                dispatcher: Dispatcher::new(services),
            }),
        }
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the command dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Get a reference to the services.
    #[must_use]
    pub fn services(&self) -> &Services {
        self.inner.dispatcher.services()
    }
}
