//! Runtime-agnostic UDP discovery for local-network servers
//!
//! This crate lets servers announce themselves on the local network and
//! lets clients find them without a central registry. A server binds a
//! UDP socket, periodically broadcasts its announcement, and answers
//! discovery requests with a unicast response. A client broadcasts a
//! request on every local subnet and collects unique responses within a
//! bounded number of timed attempts.
//!
//! # Architecture
//!
//! Everything is runtime-agnostic: sockets come from `async-net`, timers
//! and background tasks from `smol`, so the crate works under any
//! executor that can drive them.
//!
//! # Example
//!
//! ```no_run
//! use lan_discovery::{DiscoveryConfig, DiscoveryServer, ServerInfo, discover_servers};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = DiscoveryConfig::default();
//!
//! // Server side: announce ourselves
//! let server = DiscoveryServer::new(config.clone());
//! let info = ServerInfo::new("my-server", "1.0.0", "192.168.1.10".parse()?, 8080, 8081);
//! server.start(info).await?;
//!
//! // Client side: find servers on the network
//! let servers = discover_servers(&config).await?;
//! for found in servers {
//!     println!("found {} at {}", found.name, found.http_url());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod server;
pub mod subnet;

pub use client::discover_servers;
pub use config::DiscoveryConfig;
pub use error::{Error, Result};
pub use models::{DiscoveryMessage, ServerInfo};
pub use server::DiscoveryServer;
