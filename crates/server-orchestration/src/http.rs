//! Trait boundary to the external HTTP layer
//!
//! The orchestrator supervises an HTTP service it does not implement.
//! `HttpFacade` is the seam: real deployments plug a server in, tests and
//! headless setups use [`NullHttpFacade`].

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A named HTTP route handler registered through the orchestrator
pub trait RouteHandler: Send + Sync {
    /// Identifier used in logs and diagnostics
    fn name(&self) -> &str;
}

/// Lifecycle surface of the supervised HTTP service
#[async_trait]
pub trait HttpFacade: Send + Sync {
    /// Start serving
    async fn start(&self) -> Result<()>;

    /// Stop serving
    async fn stop(&self) -> Result<()>;

    /// Whether the service is up
    async fn is_running(&self) -> bool;

    /// Register a route handler
    async fn add_route_handler(&self, handler: Arc<dyn RouteHandler>) -> Result<()>;
}

/// Push-notification surface exposed to HTTP route handlers
///
/// Implemented by the orchestrator by forwarding to the session gateway.
#[async_trait]
pub trait WebSocketNotifier: Send + Sync {
    /// Fan a data-change notification out to every session
    async fn notify_data_change(&self, event: &str, data: Value) -> Result<()>;

    /// Fan a system message out to every session
    async fn broadcast_system_message(&self, message: &str, level: &str) -> Result<()>;
}

/// No-op facade for tests and headless deployments
#[derive(Debug, Default)]
pub struct NullHttpFacade {
    running: AtomicBool,
}

impl NullHttpFacade {
    /// Create a stopped facade
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpFacade for NullHttpFacade {
    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn add_route_handler(&self, handler: Arc<dyn RouteHandler>) -> Result<()> {
        debug!(handler = handler.name(), "route handler registered on null facade");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_null_facade_lifecycle() {
        let facade = NullHttpFacade::new();
        assert!(!facade.is_running().await);
        facade.start().await.unwrap();
        assert!(facade.is_running().await);
        facade.stop().await.unwrap();
        assert!(!facade.is_running().await);
    }
}
