//! Runtime-agnostic WebSocket session engine
//!
//! This crate accepts WebSocket upgrades, tracks each connection as a
//! session with metadata, keeps sessions alive with a periodic heartbeat
//! broadcast, evicts sessions that go idle, and fans messages out to all
//! or selected sessions. Inbound application messages are surfaced on a
//! monitoring stream so a supervisor can observe traffic without owning
//! the sockets.
//!
//! # Architecture
//!
//! The gateway is runtime-agnostic: `async-net` for the listener,
//! `async-tungstenite` for the upgrade (no runtime features), `smol` for
//! timers and background tasks. Each session owns a bounded outbound
//! channel drained by a writer task; a send failure to one session only
//! ever evicts that session.
//!
//! # Example
//!
//! ```no_run
//! use session_gateway::{SessionConfig, SessionMessage, SessionServer};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let gateway = SessionServer::new(SessionConfig::default());
//! gateway.start().await?;
//!
//! // Fan a system message out to every connected session
//! gateway
//!     .broadcast(SessionMessage::system_message("maintenance at noon", "info"))
//!     .await?;
//!
//! // Observe inbound traffic
//! let messages = gateway.messages();
//! while let Ok((session_id, message)) = messages.recv().await {
//!     println!("{} sent {:?}", session_id, message.message_type);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod server;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use models::{MessageType, SessionEvent, SessionInfo, SessionMessage};
pub use registry::SessionRegistry;
pub use server::SessionServer;
