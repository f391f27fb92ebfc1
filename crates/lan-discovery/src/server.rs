//! Server role: announce and answer discovery requests

use crate::{
    config::DiscoveryConfig,
    error::{Error, Result},
    models::{DiscoveryMessage, ServerInfo},
    subnet,
};
use async_net::UdpSocket;
use futures::lock::Mutex;
use smol::Timer;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 8192;

/// UDP discovery engine, server role
///
/// While running, the engine periodically broadcasts its announcement to
/// the limited broadcast address and every subnet-derived broadcast
/// address, and answers `discovery_request` datagrams with a unicast
/// `server_discovery_response`. Foreign or malformed datagrams are
/// ignored; the discovery port is shared best-effort territory.
#[derive(Clone)]
pub struct DiscoveryServer {
    inner: Arc<Inner>,
}

struct Inner {
    config: DiscoveryConfig,
    state: Mutex<Option<Running>>,
}

struct Running {
    socket: UdpSocket,
    info: ServerInfo,
    // Tasks are cancelled when dropped on stop
    _broadcast_task: smol::Task<()>,
    _responder_task: smol::Task<()>,
}

impl DiscoveryServer {
    /// Create a stopped discovery engine
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(None),
            }),
        }
    }

    /// Start announcing `info`
    ///
    /// Fails with [`Error::AlreadyRunning`] if called twice without an
    /// intervening [`stop`](Self::stop), and with [`Error::Bind`] if the
    /// discovery port is unavailable; in both cases the engine state is
    /// unchanged.
    pub async fn start(&self, info: ServerInfo) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let socket = UdpSocket::bind(("0.0.0.0", self.inner.config.port))
            .await
            .map_err(Error::Bind)?;
        socket.set_broadcast(true).map_err(Error::Bind)?;

        info!(
            "Discovery server announcing '{}' on UDP port {}",
            info.name, self.inner.config.port
        );

        let broadcast_task = smol::spawn(broadcast_loop(
            socket.clone(),
            info.clone(),
            self.inner.config.clone(),
        ));
        let responder_task = smol::spawn(respond_loop(socket.clone(), info.clone()));

        *state = Some(Running {
            socket,
            info,
            _broadcast_task: broadcast_task,
            _responder_task: responder_task,
        });
        Ok(())
    }

    /// Stop announcing
    ///
    /// Cancels the broadcast and responder tasks, closes the socket and
    /// clears the held announcement. Stopping a stopped engine is a no-op.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if state.take().is_some() {
            info!("Discovery server stopped");
        }
    }

    /// Whether the engine is currently announcing
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.is_some()
    }

    /// The announcement currently held, if running
    pub async fn announcement(&self) -> Option<ServerInfo> {
        self.inner
            .state
            .lock()
            .await
            .as_ref()
            .map(|running| running.info.clone())
    }

    /// Local address of the bound discovery socket, if running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .state
            .lock()
            .await
            .as_ref()
            .and_then(|running| running.socket.local_addr().ok())
    }
}

/// Broadcast destinations: the limited broadcast address plus one
/// directed broadcast per local subnet.
pub(crate) fn broadcast_targets(config: &DiscoveryConfig) -> Vec<SocketAddr> {
    let mut targets = vec![SocketAddr::new(
        IpAddr::V4(Ipv4Addr::BROADCAST),
        config.port,
    )];
    for address in subnet::local_broadcast_addresses(config.effective_mask()) {
        let target = SocketAddr::new(IpAddr::V4(address), config.port);
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

async fn broadcast_loop(socket: UdpSocket, info: ServerInfo, config: DiscoveryConfig) {
    let payload = match serde_json::to_vec(&DiscoveryMessage::broadcast(info)) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to serialize announcement: {}", e);
            return;
        }
    };

    loop {
        for target in broadcast_targets(&config) {
            if let Err(e) = socket.send_to(&payload, target).await {
                // Best-effort; some interfaces refuse broadcast traffic
                debug!("Broadcast to {} failed: {}", target, e);
            }
        }
        Timer::after(config.broadcast_interval()).await;
    }
}

async fn respond_loop(socket: UdpSocket, info: ServerInfo) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, sender) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Discovery receive error: {}", e);
                break;
            }
        };

        match serde_json::from_slice::<DiscoveryMessage>(&buf[..len]) {
            Ok(DiscoveryMessage::DiscoveryRequest { .. }) => {
                debug!("Discovery request from {}", sender);
                let response = DiscoveryMessage::response(info.clone());
                match serde_json::to_vec(&response) {
                    Ok(payload) => {
                        if let Err(e) = socket.send_to(&payload, sender).await {
                            debug!("Discovery response to {} failed: {}", sender, e);
                        }
                    }
                    Err(e) => warn!("Failed to serialize discovery response: {}", e),
                }
            }
            // Our own broadcasts and other servers' traffic
            Ok(_) => {}
            // Foreign UDP traffic on the discovery port is expected
            Err(e) => debug!("Ignoring malformed datagram from {}: {}", sender, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig {
            port: 0,
            ..DiscoveryConfig::default()
        }
    }

    fn test_info() -> ServerInfo {
        ServerInfo::new("test-server", "1.0.0", "127.0.0.1".parse().unwrap(), 8080, 8081)
    }

    #[smol_potat::test]
    async fn test_double_start_fails() {
        let server = DiscoveryServer::new(test_config());
        server.start(test_info()).await.unwrap();
        assert!(matches!(
            server.start(test_info()).await,
            Err(Error::AlreadyRunning)
        ));
        server.stop().await;
    }

    #[smol_potat::test]
    async fn test_stop_is_idempotent() {
        let server = DiscoveryServer::new(test_config());
        server.stop().await;
        server.start(test_info()).await.unwrap();
        server.stop().await;
        server.stop().await;
        assert!(!server.is_running().await);
    }

    #[smol_potat::test]
    async fn test_restart_after_stop() {
        let server = DiscoveryServer::new(test_config());
        server.start(test_info()).await.unwrap();
        server.stop().await;
        server.start(test_info()).await.unwrap();
        assert!(server.is_running().await);
        assert_eq!(
            server.announcement().await.map(|info| info.name),
            Some("test-server".to_string())
        );
        server.stop().await;
        assert!(server.announcement().await.is_none());
    }

    #[test]
    fn test_broadcast_targets_include_limited_broadcast() {
        let config = DiscoveryConfig {
            port: 45_710,
            ..DiscoveryConfig::default()
        };
        let targets = broadcast_targets(&config);
        assert!(targets.contains(&"255.255.255.255:45710".parse().unwrap()));
    }
}
