//! Wire format and announcement model for discovery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Announcement record describing a reachable server
///
/// Immutable once constructed. Created when the orchestrator starts and
/// discarded on stop; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Human-readable server name
    pub name: String,

    /// Server version
    pub version: String,

    /// Address the server is reachable on
    pub ip_address: IpAddr,

    /// HTTP API port
    pub http_port: u16,

    /// WebSocket session port
    pub web_socket_port: u16,

    /// When the server started
    pub start_time: DateTime<Utc>,

    /// Advertised capability set
    #[serde(default)]
    pub capabilities: HashMap<String, serde_json::Value>,
}

impl ServerInfo {
    /// Create a new announcement with `start_time` set to now
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        ip_address: IpAddr,
        http_port: u16,
        web_socket_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ip_address,
            http_port,
            web_socket_port,
            start_time: Utc::now(),
            capabilities: HashMap::new(),
        }
    }

    /// Attach a capability entry
    pub fn with_capability(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.capabilities.insert(key.into(), value);
        self
    }

    /// Base HTTP URL, derived from the address and HTTP port
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.ip_address, self.http_port)
    }

    /// WebSocket URL, derived from the address and session port
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.ip_address, self.web_socket_port)
    }
}

/// Discovery wire message (JSON over a UDP datagram)
///
/// Transient; exists only on the wire. `serverInfo` is carried on
/// broadcasts and responses, never on requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryMessage {
    /// Client asking servers to identify themselves
    DiscoveryRequest {
        /// When the request was sent
        timestamp: DateTime<Utc>,
    },
    /// Unsolicited periodic server announcement
    ServerDiscoveryBroadcast {
        /// When the broadcast was sent
        timestamp: DateTime<Utc>,
        /// The announcing server
        #[serde(rename = "serverInfo")]
        server_info: ServerInfo,
    },
    /// Unicast answer to a discovery request
    ServerDiscoveryResponse {
        /// When the response was sent
        timestamp: DateTime<Utc>,
        /// The answering server
        #[serde(rename = "serverInfo")]
        server_info: ServerInfo,
    },
}

impl DiscoveryMessage {
    /// Create a discovery request stamped with the current time
    pub fn request() -> Self {
        Self::DiscoveryRequest {
            timestamp: Utc::now(),
        }
    }

    /// Create a periodic broadcast for `info`
    pub fn broadcast(info: ServerInfo) -> Self {
        Self::ServerDiscoveryBroadcast {
            timestamp: Utc::now(),
            server_info: info,
        }
    }

    /// Create a unicast response for `info`
    pub fn response(info: ServerInfo) -> Self {
        Self::ServerDiscoveryResponse {
            timestamp: Utc::now(),
            server_info: info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ServerInfo {
        ServerInfo::new("atlas", "0.3.1", "192.168.1.10".parse().unwrap(), 8080, 8081)
            .with_capability("sync", serde_json::json!(true))
    }

    #[test]
    fn test_server_info_urls() {
        let info = sample_info();
        assert_eq!(info.http_url(), "http://192.168.1.10:8080");
        assert_eq!(info.ws_url(), "ws://192.168.1.10:8081");
    }

    #[test]
    fn test_wire_field_names() {
        let info = sample_info();
        let value = serde_json::to_value(&info).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("ipAddress"));
        assert!(object.contains_key("httpPort"));
        assert!(object.contains_key("webSocketPort"));
        assert!(object.contains_key("startTime"));
    }

    #[test]
    fn test_message_type_tags() {
        let request = serde_json::to_value(DiscoveryMessage::request()).unwrap();
        assert_eq!(request["type"], "discovery_request");

        let broadcast = serde_json::to_value(DiscoveryMessage::broadcast(sample_info())).unwrap();
        assert_eq!(broadcast["type"], "server_discovery_broadcast");
        assert!(broadcast["serverInfo"].is_object());

        let response = serde_json::to_value(DiscoveryMessage::response(sample_info())).unwrap();
        assert_eq!(response["type"], "server_discovery_response");
    }

    #[test]
    fn test_message_roundtrip() {
        for message in [
            DiscoveryMessage::request(),
            DiscoveryMessage::broadcast(sample_info()),
            DiscoveryMessage::response(sample_info()),
        ] {
            let json = serde_json::to_string(&message).unwrap();
            let parsed: DiscoveryMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn test_request_carries_no_server_info() {
        let request = serde_json::to_value(DiscoveryMessage::request()).unwrap();
        assert!(request.get("serverInfo").is_none());
    }
}
