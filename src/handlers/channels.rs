use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::shared::{fetch_channel, fetch_server, require_member, require_role, validation_error};
use crate::{
    auth::AuthUser,
    error::AppResult,
    models::{Channel, CreateChannelDto, Role, UpdateChannelDto},
    state::AppState,
};

const VALID_KINDS: &[&str] = &["text", "voice", "video"];

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateChannelRequest {
    #[validate(length(min = 1, max = 100, message = "Channel name must be 1–100 characters"))]
    pub name: String,
    pub kind: String,
    pub is_private: Option<bool>,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UpdateChannelRequest {
    #[validate(length(min = 1, max = 100, message = "Channel name must be 1–100 characters"))]
    pub name: Option<String>,
    pub position: Option<i32>,
    pub is_private: Option<bool>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /servers/:id/channels — create a channel in a server (admin or higher).
pub async fn create_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
    Json(req): Json<CreateChannelRequest>,
) -> AppResult<(StatusCode, Json<Channel>)> {
    req.validate().map_err(validation_error)?;

    fetch_server(&state.pool, server_id).await?;
    require_role(&state.pool, server_id, auth.user_id(), Role::Admin).await?;

    if !VALID_KINDS.contains(&req.kind.as_str()) {
        return Err(crate::error::AppError::Validation(format!(
            "Channel kind must be one of: {}",
            VALID_KINDS.join(", ")
        )));
    }

    let dto = CreateChannelDto {
        name: req.name,
        kind: req.kind,
        is_private: req.is_private,
    };

    // Auto-assign next position within the server (INT column → i32).
    let position: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM channels WHERE server_id = $1",
    )
    .bind(server_id)
    .fetch_one(&state.pool)
    .await?;

    let channel = sqlx::query_as::<_, Channel>(
        "INSERT INTO channels (server_id, name, kind, position, is_private)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, server_id, name, kind, position, is_private, created_at, updated_at",
    )
    .bind(server_id)
    .bind(&dto.name)
    .bind(&dto.kind)
    .bind(position)
    .bind(dto.is_private.unwrap_or(false))
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(channel)))
}

/// GET /servers/:id/channels — list all channels in a server (members only).
pub async fn list_channels(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<Json<Vec<Channel>>> {
    fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    let channels = sqlx::query_as::<_, Channel>(
        "SELECT id, server_id, name, kind, position, is_private, created_at, updated_at
         FROM channels WHERE server_id = $1
         ORDER BY position ASC, created_at ASC",
    )
    .bind(server_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(channels))
}

/// GET /servers/:id/channels/:channel_id — get a single channel (members only).
pub async fn get_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Channel>> {
    fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;
    let channel = fetch_channel(&state.pool, server_id, channel_id).await?;
    Ok(Json(channel))
}

/// PATCH /servers/:id/channels/:channel_id — update a channel (admin or higher).
pub async fn update_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateChannelRequest>,
) -> AppResult<Json<Channel>> {
    req.validate().map_err(validation_error)?;

    fetch_server(&state.pool, server_id).await?;
    require_role(&state.pool, server_id, auth.user_id(), Role::Admin).await?;
    fetch_channel(&state.pool, server_id, channel_id).await?;

    let dto = UpdateChannelDto {
        name: req.name,
        position: req.position,
        is_private: req.is_private,
    };

    let updated = sqlx::query_as::<_, Channel>(
        "UPDATE channels
         SET name       = COALESCE($1, name),
             position   = COALESCE($2, position),
             is_private = COALESCE($3, is_private),
             updated_at = NOW()
         WHERE id = $4 AND server_id = $5
         RETURNING id, server_id, name, kind, position, is_private, created_at, updated_at",
    )
    .bind(&dto.name)
    .bind(dto.position)
    .bind(dto.is_private)
    .bind(channel_id)
    .bind(server_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(updated))
}

/// DELETE /servers/:id/channels/:channel_id — delete a channel (admin or higher).
pub async fn delete_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    fetch_server(&state.pool, server_id).await?;
    require_role(&state.pool, server_id, auth.user_id(), Role::Admin).await?;
    fetch_channel(&state.pool, server_id, channel_id).await?;

    sqlx::query("DELETE FROM channels WHERE id = $1 AND server_id = $2")
        .bind(channel_id)
        .bind(server_id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
