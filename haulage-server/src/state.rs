//! Application state shared across all request handlers.

use haulage_core::clock::Clock;
use haulage_core::engine::Engine;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    /// Secret for inbound payment webhooks, if any are accepted.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.engine.settings().payments.webhook_secret.as_deref()
    }
}
