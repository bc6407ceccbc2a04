pub mod envelope;
pub mod handler;

pub use handler::websocket_handler;

use serde_json::Value;
use uuid::Uuid;

use crate::hub::{Broadcast, Target};
use crate::state::AppState;
use envelope::Envelope;

/// Build an envelope for `event`/`data`, tag it with `channel_id`, and post it
/// to the Hub for fan-out to that channel's subscribers (§4.4).
///
/// Serialisation failures are logged and swallowed — a broken broadcast must
/// never fail the HTTP request that triggered it.
pub async fn emit_to_channel(
    state: &AppState,
    channel_id: Uuid,
    exclude_user_id: Option<Uuid>,
    event: &str,
    data: Value,
) {
    let envelope = Envelope::new(event, data).with_channel(channel_id);
    let Some(frame) = envelope.to_frame() else {
        return;
    };
    state
        .hub
        .broadcast(Broadcast {
            frame,
            target: Target::Channel(channel_id),
            exclude_user_id,
        })
        .await;
}

/// Fan out one event to an explicit list of users — DMs have no channel/server
/// entry in the Subscription Index, so each recipient is addressed directly
/// via `Target::User`. The envelope is serialised once and reused for every
/// recipient.
pub async fn emit_to_users(state: &AppState, user_ids: &[Uuid], event: &str, data: Value) {
    let envelope = Envelope::new(event, data);
    let Some(frame) = envelope.to_frame() else {
        return;
    };
    for &user_id in user_ids {
        state
            .hub
            .broadcast(Broadcast {
                frame: frame.clone(),
                target: Target::User(user_id),
                exclude_user_id: None,
            })
            .await;
    }
}

/// As [`emit_to_channel`], but fanned out to a server's subscribed members.
pub async fn emit_to_server(
    state: &AppState,
    server_id: Uuid,
    exclude_user_id: Option<Uuid>,
    event: &str,
    data: Value,
) {
    let envelope = Envelope::new(event, data).with_server(server_id);
    let Some(frame) = envelope.to_frame() else {
        return;
    };
    state
        .hub
        .broadcast(Broadcast {
            frame,
            target: Target::Server(server_id),
            exclude_user_id,
        })
        .await;
}
