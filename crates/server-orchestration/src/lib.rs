//! Lifecycle orchestration for the local-network connectivity stack
//!
//! This crate supervises three services: the UDP discovery server from
//! `lan-discovery`, the WebSocket session gateway from `session-gateway`,
//! and an external HTTP service reached through the [`HttpFacade`] trait.
//! It drives them through one lifecycle state machine, probes their
//! health on a timer, and restarts failed services a bounded number of
//! times.
//!
//! # Example
//!
//! ```no_run
//! use server_orchestration::{Orchestrator, OrchestratorConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = OrchestratorConfig::from_file("server.yaml").await?;
//! let orchestrator = Orchestrator::new(config);
//! orchestrator.start().await?;
//!
//! let stats = orchestrator.statistics().await;
//! println!("{:?} with {} sessions", stats.status, stats.session_count);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod orchestrator;
pub mod recovery;
pub mod status;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use events::OrchestratorEvent;
pub use http::{HttpFacade, NullHttpFacade, RouteHandler, WebSocketNotifier};
pub use orchestrator::{
    DISCOVERY_SERVICE, HTTP_SERVICE, Orchestrator, OrchestratorStats, SESSION_SERVICE,
};
pub use recovery::{RecoveryDecision, RecoveryTracker};
pub use status::{HealthState, OrchestratorStatus, ServiceHealthRecord, aggregate_health};
