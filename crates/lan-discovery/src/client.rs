//! Client role: broadcast a request and collect responses

use crate::{
    config::DiscoveryConfig,
    error::Result,
    models::{DiscoveryMessage, ServerInfo},
    server::broadcast_targets,
};
use async_net::UdpSocket;
use futures::future::{self, Either};
use futures::pin_mut;
use smol::Timer;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 8192;

/// Discover servers on the local network
///
/// Performs up to `max_attempts` rounds; each round broadcasts one
/// `discovery_request` from an ephemeral socket and listens until
/// `discovery_timeout` elapses. Responses merge into a de-dup map keyed
/// by server address (last response for an address wins), and rounds
/// stop early once at least one server has answered. A single round's
/// socket or send error is logged and the next round proceeds; the call
/// itself only fails on announcement serialization, which is static.
///
/// Always returns within `discovery_timeout × max_attempts` plus
/// scheduling slack, responders or not.
pub async fn discover_servers(config: &DiscoveryConfig) -> Result<Vec<ServerInfo>> {
    let mut found: HashMap<String, ServerInfo> = HashMap::new();
    let payload = serde_json::to_vec(&DiscoveryMessage::request())?;

    for attempt in 1..=config.max_attempts.max(1) {
        debug!(
            "Discovery attempt {}/{} on port {}",
            attempt, config.max_attempts, config.port
        );

        if let Err(e) = run_round(config, &payload, &mut found).await {
            warn!("Discovery attempt {} failed: {}", attempt, e);
        }

        if !found.is_empty() {
            break;
        }
    }

    info!("Discovered {} server(s)", found.len());
    Ok(found.into_values().collect())
}

/// One broadcast-and-collect round
async fn run_round(
    config: &DiscoveryConfig,
    payload: &[u8],
    found: &mut HashMap<String, ServerInfo>,
) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    for target in broadcast_targets(config) {
        if let Err(e) = socket.send_to(payload, target).await {
            debug!("Discovery request to {} failed: {}", target, e);
        }
    }

    let deadline = Instant::now() + config.discovery_timeout();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        if Instant::now() >= deadline {
            break;
        }

        let received = {
            let recv = socket.recv_from(&mut buf);
            pin_mut!(recv);
            match future::select(recv, Timer::at(deadline)).await {
                Either::Left((result, _)) => result,
                Either::Right(_) => break,
            }
        };

        match received {
            Ok((len, sender)) => match serde_json::from_slice::<DiscoveryMessage>(&buf[..len]) {
                Ok(DiscoveryMessage::ServerDiscoveryResponse { server_info, .. }) => {
                    debug!("Response from {} ({})", server_info.name, sender);
                    merge_response(found, server_info);
                }
                // Requests (possibly our own echo) and broadcasts are not answers
                Ok(_) => {}
                Err(e) => debug!("Ignoring malformed datagram from {}: {}", sender, e),
            },
            Err(e) => {
                debug!("Discovery receive error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

/// Merge a response into the de-dup map, keyed by server address
pub(crate) fn merge_response(found: &mut HashMap<String, ServerInfo>, info: ServerInfo) {
    found.insert(info.ip_address.to_string(), info);
}
