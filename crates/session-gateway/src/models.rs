//! Session metadata and the WebSocket message envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use uuid::Uuid;

/// Metadata for one live WebSocket connection
///
/// Owned exclusively by the gateway; external code refers to sessions by
/// id and only ever sees snapshots. `last_seen_at` is the single mutable
/// field and advances on every inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Unique session id
    pub id: Uuid,

    /// Session kind as reported by the client
    pub kind: String,

    /// When the upgrade completed
    pub connected_at: DateTime<Utc>,

    /// Last inbound activity; monotonically non-decreasing
    pub last_seen_at: DateTime<Utc>,

    /// Peer address
    pub remote_addr: SocketAddr,

    /// User-Agent header from the upgrade request
    pub user_agent: Option<String>,

    /// Free-form per-session metadata
    pub metadata: HashMap<String, Value>,
}

/// Lifecycle notifications emitted on the gateway's event stream
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session completed its upgrade and was registered
    Connected {
        /// The new session
        id: Uuid,
    },
    /// A session was removed from the registry
    Disconnected {
        /// The removed session
        id: Uuid,
        /// Why it was removed (e.g. "timeout", "client closed")
        reason: String,
    },
}

/// WebSocket message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// An entity was created
    EntityCreated,
    /// An entity was updated
    EntityUpdated,
    /// An entity was deleted
    EntityDeleted,
    /// An entity's status changed
    StatusUpdate,
    /// Generic data-change notification
    DataUpdate,
    /// Client asking for a sync
    SyncRequest,
    /// Answer to a sync request
    SyncResponse,
    /// Complete state snapshot
    FullSync,
    /// Operator/system broadcast
    SystemMessage,
    /// Liveness signal
    Heartbeat,
    /// Sent to and about a newly connected session
    SessionConnect,
    /// Broadcast when a session leaves
    SessionDisconnect,
    /// Application-defined message
    Custom,
}

impl MessageType {
    /// Whether an inbound message of this type is relayed to the other
    /// sessions (in addition to being surfaced on the monitoring stream)
    pub fn is_relayable(self) -> bool {
        matches!(
            self,
            MessageType::EntityCreated
                | MessageType::EntityUpdated
                | MessageType::EntityDeleted
                | MessageType::StatusUpdate
                | MessageType::DataUpdate
                | MessageType::SyncRequest
                | MessageType::SyncResponse
                | MessageType::FullSync
                | MessageType::Custom
        )
    }
}

/// WebSocket message envelope
///
/// Immutable once built. Construct through the typed factory helpers,
/// which fix the shape of `data` per message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Message type
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Type-specific payload
    #[serde(default)]
    pub data: Map<String, Value>,

    /// When the message was built
    pub timestamp: DateTime<Utc>,

    /// Session the message concerns, when applicable
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,

    /// Unique message id for tracing
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl SessionMessage {
    fn build(message_type: MessageType, data: Map<String, Value>) -> Self {
        Self {
            message_type,
            data,
            timestamp: Utc::now(),
            session_id: None,
            message_id: Some(Uuid::new_v4().to_string()),
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        }
    }

    /// An entity was created
    pub fn entity_created(entity_type: &str, entity: Value) -> Self {
        Self::build(
            MessageType::EntityCreated,
            Self::object(json!({ "entityType": entity_type, "action": "created", "entity": entity })),
        )
    }

    /// An entity was updated
    pub fn entity_updated(entity_type: &str, entity: Value) -> Self {
        Self::build(
            MessageType::EntityUpdated,
            Self::object(json!({ "entityType": entity_type, "action": "updated", "entity": entity })),
        )
    }

    /// An entity was deleted
    pub fn entity_deleted(entity_type: &str, entity_id: Value) -> Self {
        Self::build(
            MessageType::EntityDeleted,
            Self::object(json!({ "entityType": entity_type, "action": "deleted", "entityId": entity_id })),
        )
    }

    /// An entity's status changed
    pub fn status_update(entity_type: &str, entity_id: Value, status: &str) -> Self {
        Self::build(
            MessageType::StatusUpdate,
            Self::object(json!({
                "entityType": entity_type,
                "action": "status",
                "entityId": entity_id,
                "status": status,
            })),
        )
    }

    /// Generic data-change notification
    pub fn data_update(event: &str, payload: Value) -> Self {
        Self::build(
            MessageType::DataUpdate,
            Self::object(json!({ "event": event, "payload": payload })),
        )
    }

    /// Ask peers for a sync of `entity_type`
    pub fn sync_request(entity_type: &str) -> Self {
        Self::build(
            MessageType::SyncRequest,
            Self::object(json!({ "entityType": entity_type })),
        )
    }

    /// Answer a sync request with `entities`
    pub fn sync_response(entity_type: &str, entities: Value) -> Self {
        Self::build(
            MessageType::SyncResponse,
            Self::object(json!({ "entityType": entity_type, "entities": entities })),
        )
    }

    /// Complete state snapshot
    pub fn full_sync(payload: Value) -> Self {
        Self::build(
            MessageType::FullSync,
            Self::object(json!({ "payload": payload })),
        )
    }

    /// Operator/system broadcast with a severity level
    pub fn system_message(message: &str, level: &str) -> Self {
        Self::build(
            MessageType::SystemMessage,
            Self::object(json!({ "message": message, "level": level })),
        )
    }

    /// Liveness signal; carries no payload
    pub fn heartbeat() -> Self {
        Self::build(MessageType::Heartbeat, Map::new())
    }

    /// Connect handshake for and about session `id`
    pub fn session_connect(id: Uuid) -> Self {
        let mut message = Self::build(
            MessageType::SessionConnect,
            Self::object(json!({ "sessionId": id })),
        );
        message.session_id = Some(id);
        message
    }

    /// Departure notice for session `id`
    pub fn session_disconnect(id: Uuid, reason: &str) -> Self {
        let mut message = Self::build(
            MessageType::SessionDisconnect,
            Self::object(json!({ "sessionId": id, "reason": reason })),
        );
        message.session_id = Some(id);
        message
    }

    /// Application-defined message
    pub fn custom(event: &str, payload: Value) -> Self {
        Self::build(
            MessageType::Custom,
            Self::object(json!({ "event": event, "payload": payload })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_are_kebab_case() {
        assert_eq!(
            serde_json::to_value(MessageType::EntityCreated).unwrap(),
            "entity-created"
        );
        assert_eq!(
            serde_json::to_value(MessageType::SessionDisconnect).unwrap(),
            "session-disconnect"
        );
        assert_eq!(
            serde_json::to_value(MessageType::Heartbeat).unwrap(),
            "heartbeat"
        );
    }

    #[test]
    fn test_entity_factories_carry_consistent_action() {
        let created = SessionMessage::entity_created("note", json!({ "id": 7 }));
        assert_eq!(created.data["entityType"], "note");
        assert_eq!(created.data["action"], "created");

        let updated = SessionMessage::entity_updated("note", json!({ "id": 7 }));
        assert_eq!(updated.data["action"], "updated");

        let deleted = SessionMessage::entity_deleted("note", json!(7));
        assert_eq!(deleted.data["action"], "deleted");
        assert_eq!(deleted.data["entityId"], 7);

        let status = SessionMessage::status_update("note", json!(7), "archived");
        assert_eq!(status.data["action"], "status");
        assert_eq!(status.data["status"], "archived");
    }

    #[test]
    fn test_factory_data_shapes() {
        let heartbeat = SessionMessage::heartbeat();
        assert!(heartbeat.data.is_empty());

        let system = SessionMessage::system_message("hi", "warn");
        assert_eq!(system.data["message"], "hi");
        assert_eq!(system.data["level"], "warn");

        let update = SessionMessage::data_update("notes-changed", json!([1, 2]));
        assert_eq!(update.data["event"], "notes-changed");
        assert_eq!(update.data["payload"], json!([1, 2]));

        let id = Uuid::new_v4();
        let connect = SessionMessage::session_connect(id);
        assert_eq!(connect.session_id, Some(id));
        assert_eq!(connect.data["sessionId"], json!(id));

        let disconnect = SessionMessage::session_disconnect(id, "timeout");
        assert_eq!(disconnect.data["reason"], "timeout");
    }

    #[test]
    fn test_every_factory_roundtrips() {
        let id = Uuid::new_v4();
        let messages = vec![
            SessionMessage::entity_created("note", json!({ "id": 1 })),
            SessionMessage::entity_updated("note", json!({ "id": 1 })),
            SessionMessage::entity_deleted("note", json!(1)),
            SessionMessage::status_update("note", json!(1), "done"),
            SessionMessage::data_update("event", json!(null)),
            SessionMessage::sync_request("note"),
            SessionMessage::sync_response("note", json!([])),
            SessionMessage::full_sync(json!({ "notes": [] })),
            SessionMessage::system_message("msg", "info"),
            SessionMessage::heartbeat(),
            SessionMessage::session_connect(id),
            SessionMessage::session_disconnect(id, "bye"),
            SessionMessage::custom("ping", json!({})),
        ];

        for message in messages {
            let json = serde_json::to_string(&message).unwrap();
            let parsed: SessionMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn test_envelope_field_names() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(SessionMessage::session_connect(id)).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("type"));
        assert!(object.contains_key("clientId"));
        assert!(object.contains_key("messageId"));
        assert!(object.contains_key("timestamp"));

        // Optional fields are omitted, not null
        let heartbeat = serde_json::to_value(SessionMessage::heartbeat()).unwrap();
        assert!(heartbeat.get("clientId").is_none());
    }

    #[test]
    fn test_relay_classification() {
        assert!(MessageType::EntityCreated.is_relayable());
        assert!(MessageType::Custom.is_relayable());
        assert!(MessageType::FullSync.is_relayable());
        assert!(!MessageType::Heartbeat.is_relayable());
        assert!(!MessageType::SystemMessage.is_relayable());
        assert!(!MessageType::SessionConnect.is_relayable());
    }
}
