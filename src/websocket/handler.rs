use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::envelope::{
    Envelope, EVENT_DM_CALL_ACCEPT, EVENT_DM_CALL_END, EVENT_DM_CALL_REJECT, EVENT_DM_CALL_RING,
    EVENT_HEARTBEAT, EVENT_HEARTBEAT_ACK, EVENT_PRESENCE_UPDATE, EVENT_READY,
    EVENT_SUBSCRIBE_CHANNEL, EVENT_SUBSCRIBE_SERVER, EVENT_TYPING_START,
    EVENT_UNSUBSCRIBE_CHANNEL, EVENT_WEBRTC_ANSWER, EVENT_WEBRTC_ICE_CANDIDATE,
    EVENT_WEBRTC_OFFER, RELAY_EVENTS,
};
use crate::{
    auth::validate_ws_token,
    hub::{Broadcast, Target, QUEUE_CAPACITY},
    models::{Server, User, UserDto},
    state::AppState,
};

/// Monotonic source for connection sequence numbers, disambiguating stale
/// unregisters from a superseded connection during reconnect races (§9).
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, serde::Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// GET /ws?token=<access_token> — upgrade to a WebSocket connection.
///
/// The JWT is validated before the upgrade is accepted; invalid tokens get a
/// plain 401 without an upgrade attempt.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let (user_id, username) = match validate_ws_token(&params.token, &state.jwt_secret) {
        Ok(pair) => pair,
        Err(_) => {
            return (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, username, state))
}

async fn handle_socket(socket: WebSocket, user_id: Uuid, username: String, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);

    // Build READY before registering so the client's first frame is always
    // its own initial state, never a broadcast about someone else.
    let ready_frame = match build_ready(&state, user_id).await {
        Some(frame) => frame,
        None => {
            tracing::warn!(%user_id, "failed to build READY payload; closing connection");
            return;
        }
    };

    let presence_frame = match serde_json::to_string(&Envelope::new(
        EVENT_PRESENCE_UPDATE,
        json!({ "user_id": user_id, "status": "online" }),
    )) {
        Ok(frame) => frame,
        Err(_) => return,
    };

    state.hub.register(
        user_id,
        username.clone(),
        seq,
        outbound_tx,
        ready_frame,
        presence_frame,
    );

    let mut writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let state_clone = state.clone();
    let mut reader_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(user_id, &username, &text, &state_clone).await;
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%user_id, error = ?e, "websocket read error; closing");
                    break;
                }
                None => break,
            }
        }
    });

    tokio::select! {
        _ = &mut writer_task => reader_task.abort(),
        _ = &mut reader_task => writer_task.abort(),
    }

    let offline_frame = serde_json::to_string(&Envelope::new(
        EVENT_PRESENCE_UPDATE,
        json!({ "user_id": user_id, "status": "offline" }),
    ))
    .unwrap_or_default();
    state.hub.unregister(user_id, seq, offline_frame);
}

async fn handle_client_frame(user_id: Uuid, username: &str, text: &str, state: &AppState) {
    let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
        return;
    };

    match envelope.event.as_str() {
        EVENT_HEARTBEAT => {
            let ack = Envelope::new(EVENT_HEARTBEAT_ACK, serde_json::Value::Null);
            if let Some(frame) = ack.to_frame() {
                state
                    .hub
                    .broadcast(Broadcast {
                        frame,
                        target: Target::User(user_id),
                        exclude_user_id: None,
                    })
                    .await;
            }
        }
        EVENT_SUBSCRIBE_CHANNEL => {
            if let Some(channel_id) = parse_uuid_field(&envelope.data, "channel_id") {
                state.hub.subscribe_channel(user_id, channel_id);
            }
        }
        EVENT_UNSUBSCRIBE_CHANNEL => {
            if let Some(channel_id) = parse_uuid_field(&envelope.data, "channel_id") {
                state.hub.unsubscribe_channel(user_id, channel_id);
            }
        }
        EVENT_SUBSCRIBE_SERVER => {
            if let Some(server_id) = parse_uuid_field(&envelope.data, "server_id") {
                state.hub.subscribe_server(user_id, server_id);
            }
        }
        EVENT_TYPING_START => {
            if let Some(channel_id) = parse_uuid_field(&envelope.data, "channel_id") {
                let payload = Envelope::new(
                    EVENT_TYPING_START,
                    json!({ "user_id": user_id, "username": username, "channel_id": channel_id }),
                )
                .with_channel(channel_id);
                if let Some(frame) = payload.to_frame() {
                    state
                        .hub
                        .broadcast(Broadcast {
                            frame,
                            target: Target::Channel(channel_id),
                            exclude_user_id: Some(user_id),
                        })
                        .await;
                }
            }
        }
        event if RELAY_EVENTS.contains(&event) => {
            relay_peer_signal(user_id, username, event, envelope, state).await;
        }
        _ => {}
    }
}

fn parse_uuid_field(data: &serde_json::Value, field: &str) -> Option<Uuid> {
    data.get(field)?.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

/// Relay a WebRTC signal or DM call-control event to exactly the target peer,
/// substituting `from_user_id`/`from_username` in place of the original
/// `target_user_id` (§4.3). The server does not inspect `signal`.
async fn relay_peer_signal(
    from_user_id: Uuid,
    from_username: &str,
    event: &str,
    envelope: Envelope,
    state: &AppState,
) {
    let Some(target_user_id) = parse_uuid_field(&envelope.data, "target_user_id") else {
        return;
    };

    let mut relayed = envelope.data.clone();
    if let Some(obj) = relayed.as_object_mut() {
        obj.remove("target_user_id");
        obj.insert("from_user_id".into(), json!(from_user_id));
        obj.insert("from_username".into(), json!(from_username));
    }

    let mut out = Envelope::new(event, relayed);
    out.channel_id = envelope.channel_id;

    if let Some(frame) = out.to_frame() {
        state
            .hub
            .broadcast(Broadcast {
                frame,
                target: Target::User(target_user_id),
                exclude_user_id: None,
            })
            .await;
    }
}

/// Build the READY event payload for the connecting user: its own profile
/// plus the servers it belongs to.
async fn build_ready(state: &AppState, user_id: Uuid) -> Option<String> {
    let user: UserDto = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, display_name, avatar_url, status, bio,
                created_at, updated_at
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await
    .ok()??
    .into();

    let servers = sqlx::query_as::<_, Server>(
        "SELECT s.id, s.name, s.owner_id, s.icon_url, s.is_public, s.created_at, s.updated_at
         FROM servers s
         JOIN server_members sm ON s.id = sm.server_id
         WHERE sm.user_id = $1
         ORDER BY s.created_at ASC",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await
    .unwrap_or_default();

    let payload = Envelope::new(EVENT_READY, json!({ "user": user, "servers": servers }));
    payload.to_frame()
}
