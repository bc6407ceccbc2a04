use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::shared::{fetch_channel_by_id, require_member};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{Channel, VoiceParticipantDto, VoiceState},
    state::AppState,
    websocket::{
        emit_to_channel,
        envelope::{EVENT_VOICE_STATE_JOIN, EVENT_VOICE_STATE_LEAVE},
    },
};

#[derive(Debug, Deserialize)]
pub struct UpdateVoiceStateRequest {
    pub self_mute: Option<bool>,
    pub self_deaf: Option<bool>,
}

/// Returns `AppError::Validation` (HTTP 400) if the channel's kind is not `voice`.
fn require_voice_channel(channel: &Channel) -> AppResult<()> {
    if channel.kind != "voice" {
        return Err(AppError::Validation(
            "Channel is not a voice channel".into(),
        ));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/join/:channel_id — join a voice channel.
///
/// Uses UPSERT to atomically move the user from any prior channel to this
/// one; `self_mute`/`self_deaf` reset to `false` on every join (§4.5).
pub async fn join_voice_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<VoiceState>)> {
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    require_voice_channel(&channel)?;

    let vs = sqlx::query_as::<_, VoiceState>(
        "INSERT INTO voice_states (user_id, channel_id, server_id)
         VALUES ($1, $2, $3)
         ON CONFLICT (user_id) DO UPDATE
             SET channel_id = EXCLUDED.channel_id,
                 server_id  = EXCLUDED.server_id,
                 self_mute  = FALSE,
                 self_deaf  = FALSE,
                 joined_at  = NOW()
         RETURNING id, user_id, channel_id, server_id, self_mute, self_deaf, joined_at",
    )
    .bind(auth.user_id())
    .bind(channel_id)
    .bind(channel.server_id)
    .fetch_one(&state.pool)
    .await?;

    emit_to_channel(
        &state,
        channel_id,
        Some(auth.user_id()),
        EVENT_VOICE_STATE_JOIN,
        json!({ "channel_id": channel_id, "server_id": channel.server_id, "voice_state": vs }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(vs)))
}

/// POST /voice/leave/:channel_id — leave a voice channel.
///
/// A no-op at the store when the user has no voice state at all or is
/// seated in a different channel, but the LEAVE event still fires (§4.5).
pub async fn leave_voice_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    require_voice_channel(&channel)?;

    sqlx::query("DELETE FROM voice_states WHERE user_id = $1 AND channel_id = $2")
        .bind(auth.user_id())
        .bind(channel_id)
        .execute(&state.pool)
        .await?;

    emit_to_channel(
        &state,
        channel_id,
        Some(auth.user_id()),
        EVENT_VOICE_STATE_LEAVE,
        json!({ "channel_id": channel_id, "user_id": auth.user_id() }),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /channels/:channel_id/voice — update self-mute / self-deaf state.
pub async fn update_voice_state(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<UpdateVoiceStateRequest>,
) -> AppResult<Json<VoiceState>> {
    if req.self_mute.is_none() && req.self_deaf.is_none() {
        return Err(AppError::Validation(
            "At least one field (self_mute or self_deaf) must be provided".into(),
        ));
    }

    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    require_voice_channel(&channel)?;

    let vs = sqlx::query_as::<_, VoiceState>(
        "UPDATE voice_states
         SET self_mute = COALESCE($1, self_mute),
             self_deaf = COALESCE($2, self_deaf)
         WHERE user_id = $3 AND channel_id = $4
         RETURNING id, user_id, channel_id, server_id, self_mute, self_deaf, joined_at",
    )
    .bind(req.self_mute)
    .bind(req.self_deaf)
    .bind(auth.user_id())
    .bind(channel_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Not in this voice channel".into()))?;

    emit_to_channel(
        &state,
        channel_id,
        None,
        EVENT_VOICE_STATE_JOIN,
        json!({ "channel_id": channel_id, "server_id": channel.server_id, "voice_state": vs }),
    )
    .await;

    Ok(Json(vs))
}

/// GET /channels/:channel_id/voice — list all participants (members only).
pub async fn list_voice_participants(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<Vec<VoiceParticipantDto>>> {
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;
    require_voice_channel(&channel)?;

    let participants = sqlx::query_as::<_, VoiceParticipantDto>(
        "SELECT vs.user_id, u.username, vs.self_mute, vs.self_deaf, vs.joined_at
         FROM voice_states vs
         JOIN users u ON vs.user_id = u.id
         WHERE vs.channel_id = $1
         ORDER BY vs.joined_at ASC",
    )
    .bind(channel_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(participants))
}
