//! The wire envelope (§6.1): every frame exchanged over `/ws`, in either
//! direction, is one of these.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Uuid>,
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_owned(),
            data,
            channel_id: None,
            server_id: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_channel(mut self, channel_id: Uuid) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn with_server(mut self, server_id: Uuid) -> Self {
        self.server_id = Some(server_id);
        self
    }

    /// Serialise, logging (not panicking) on failure — a broken envelope must
    /// never take down the caller.
    pub fn to_frame(&self) -> Option<String> {
        serde_json::to_string(self)
            .map_err(|e| tracing::error!(error = ?e, event = %self.event, "failed to serialize envelope"))
            .ok()
    }
}

// ── Client → server event names ─────────────────────────────────────────────

pub const EVENT_HEARTBEAT: &str = "HEARTBEAT";
pub const EVENT_SUBSCRIBE_CHANNEL: &str = "SUBSCRIBE_CHANNEL";
pub const EVENT_UNSUBSCRIBE_CHANNEL: &str = "UNSUBSCRIBE_CHANNEL";
pub const EVENT_SUBSCRIBE_SERVER: &str = "SUBSCRIBE_SERVER";
pub const EVENT_TYPING_START: &str = "TYPING_START";
pub const EVENT_WEBRTC_OFFER: &str = "WEBRTC_OFFER";
pub const EVENT_WEBRTC_ANSWER: &str = "WEBRTC_ANSWER";
pub const EVENT_WEBRTC_ICE_CANDIDATE: &str = "WEBRTC_ICE_CANDIDATE";
pub const EVENT_DM_CALL_RING: &str = "DM_CALL_RING";
pub const EVENT_DM_CALL_ACCEPT: &str = "DM_CALL_ACCEPT";
pub const EVENT_DM_CALL_REJECT: &str = "DM_CALL_REJECT";
pub const EVENT_DM_CALL_END: &str = "DM_CALL_END";

// ── Server → client event names ─────────────────────────────────────────────

pub const EVENT_HEARTBEAT_ACK: &str = "HEARTBEAT_ACK";
pub const EVENT_READY: &str = "READY";
pub const EVENT_PRESENCE_UPDATE: &str = "PRESENCE_UPDATE";
pub const EVENT_MESSAGE_CREATE: &str = "MESSAGE_CREATE";
pub const EVENT_MESSAGE_UPDATE: &str = "MESSAGE_UPDATE";
pub const EVENT_MESSAGE_DELETE: &str = "MESSAGE_DELETE";
pub const EVENT_MEMBER_JOIN: &str = "MEMBER_JOIN";
pub const EVENT_MEMBER_LEAVE: &str = "MEMBER_LEAVE";
pub const EVENT_VOICE_STATE_JOIN: &str = "VOICE_STATE_JOIN";
pub const EVENT_VOICE_STATE_LEAVE: &str = "VOICE_STATE_LEAVE";
pub const EVENT_DM_CHANNEL_CREATE: &str = "DM_CHANNEL_CREATE";
pub const EVENT_DM_MESSAGE_CREATE: &str = "DM_MESSAGE_CREATE";

/// Relay events carry the same event name in both directions — the server
/// forwards them to the target peer unchanged except for the substituted
/// `from_user_id`/`from_username` fields (§4.3).
pub const RELAY_EVENTS: &[&str] = &[
    EVENT_WEBRTC_OFFER,
    EVENT_WEBRTC_ANSWER,
    EVENT_WEBRTC_ICE_CANDIDATE,
    EVENT_DM_CALL_RING,
    EVENT_DM_CALL_ACCEPT,
    EVENT_DM_CALL_REJECT,
    EVENT_DM_CALL_END,
];
