use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::shared::{
    fetch_channel_by_id, fetch_message, fetch_server, require_member, require_role,
    validation_error,
};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CreateMessageDto, Message, Role, UpdateMessageDto},
    state::AppState,
    websocket::{
        emit_to_channel,
        envelope::{EVENT_MESSAGE_CREATE, EVENT_MESSAGE_DELETE, EVENT_MESSAGE_UPDATE},
    },
};

const VALID_MESSAGE_KINDS: &[&str] = &["text", "image", "file", "system"];

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "ciphertext must be 1–4000 characters"))]
    pub ciphertext: String,
    #[validate(length(min = 1, max = 256))]
    pub nonce: String,
    #[validate(length(min = 1, max = 256))]
    pub encryption_header: String,
    pub kind: Option<String>,
    pub attachment_url: Option<String>,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "ciphertext must be 1–4000 characters"))]
    pub ciphertext: String,
    #[validate(length(min = 1, max = 256))]
    pub nonce: String,
    #[validate(length(min = 1, max = 256))]
    pub encryption_header: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    /// Cursor: return messages created strictly before the message with this ID.
    pub before: Option<Uuid>,
    /// Maximum number of messages to return (default 50, max 100).
    pub limit: Option<i64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /channels/:channel_id/messages — send a message (members only).
///
/// The row is durably committed before the MESSAGE_CREATE broadcast fires —
/// a client that reconnects mid-fan-out still finds the message on fetch.
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<CreateMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    req.validate().map_err(validation_error)?;

    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;

    let kind = req.kind.unwrap_or_else(|| "text".to_string());
    if !VALID_MESSAGE_KINDS.contains(&kind.as_str()) {
        return Err(AppError::Validation(format!(
            "Message kind must be one of: {}",
            VALID_MESSAGE_KINDS.join(", ")
        )));
    }

    if let Some(reply_to_id) = req.reply_to_id {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM messages
                 WHERE id = $1 AND channel_id = $2 AND deleted = FALSE
             )",
        )
        .bind(reply_to_id)
        .bind(channel_id)
        .fetch_one(&state.pool)
        .await?;

        if !exists {
            return Err(AppError::NotFound("Reply target message not found".into()));
        }
    }

    let dto = CreateMessageDto {
        ciphertext: req.ciphertext,
        nonce: req.nonce,
        encryption_header: req.encryption_header,
        kind: Some(kind),
        attachment_url: req.attachment_url,
        reply_to_id: req.reply_to_id,
    };

    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages
            (channel_id, author_id, ciphertext, nonce, encryption_header, kind, attachment_url, reply_to_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING id, channel_id, author_id, ciphertext, nonce, encryption_header, kind,
                   attachment_url, reply_to_id, is_edited, deleted, created_at",
    )
    .bind(channel_id)
    .bind(auth.user_id())
    .bind(&dto.ciphertext)
    .bind(&dto.nonce)
    .bind(&dto.encryption_header)
    .bind(dto.kind.as_deref().unwrap_or("text"))
    .bind(&dto.attachment_url)
    .bind(dto.reply_to_id)
    .fetch_one(&state.pool)
    .await?;

    if let Ok(payload) = serde_json::to_value(&message) {
        emit_to_channel(
            &state,
            channel_id,
            Some(auth.user_id()),
            EVENT_MESSAGE_CREATE,
            payload,
        )
        .await;
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /channels/:channel_id/messages — list messages with cursor pagination (members only).
///
/// Returns up to `limit` messages (default 50, max 100), ordered newest-first.
/// The cursor uses a compound `(created_at, id)` comparison for a stable total
/// order even when messages share an identical timestamp.
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let channel = fetch_channel_by_id(&state.pool, channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 100);

    let messages = if let Some(before_id) = query.before {
        sqlx::query_as::<_, Message>(
            "SELECT id, channel_id, author_id, ciphertext, nonce, encryption_header, kind,
                    attachment_url, reply_to_id, is_edited, deleted, created_at
             FROM messages
             WHERE channel_id = $1
               AND deleted = FALSE
               AND (created_at, id) < (
                   SELECT created_at, id FROM messages WHERE id = $2
               )
             ORDER BY created_at DESC, id DESC
             LIMIT $3",
        )
        .bind(channel_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?
    } else {
        sqlx::query_as::<_, Message>(
            "SELECT id, channel_id, author_id, ciphertext, nonce, encryption_header, kind,
                    attachment_url, reply_to_id, is_edited, deleted, created_at
             FROM messages
             WHERE channel_id = $1 AND deleted = FALSE
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?
    };

    Ok(Json(messages))
}

/// PATCH /messages/:message_id — edit a message's ciphertext (author only).
pub async fn update_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
    Json(req): Json<UpdateMessageRequest>,
) -> AppResult<Json<Message>> {
    req.validate().map_err(validation_error)?;

    let message = fetch_message(&state.pool, message_id).await?;
    let channel = fetch_channel_by_id(&state.pool, message.channel_id).await?;
    require_member(&state.pool, channel.server_id, auth.user_id()).await?;

    if message.author_id != Some(auth.user_id()) {
        return Err(AppError::Forbidden(
            "Only the message author can edit it".into(),
        ));
    }

    let dto = UpdateMessageDto {
        ciphertext: req.ciphertext,
        nonce: req.nonce,
        encryption_header: req.encryption_header,
    };

    let updated = sqlx::query_as::<_, Message>(
        "UPDATE messages
         SET ciphertext = $1, nonce = $2, encryption_header = $3, is_edited = TRUE
         WHERE id = $4 AND deleted = FALSE
         RETURNING id, channel_id, author_id, ciphertext, nonce, encryption_header, kind,
                   attachment_url, reply_to_id, is_edited, deleted, created_at",
    )
    .bind(&dto.ciphertext)
    .bind(&dto.nonce)
    .bind(&dto.encryption_header)
    .bind(message_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Message not found".into()))?;

    if let Ok(payload) = serde_json::to_value(&updated) {
        emit_to_channel(
            &state,
            channel.id,
            Some(auth.user_id()),
            EVENT_MESSAGE_UPDATE,
            payload,
        )
        .await;
    }

    Ok(Json(updated))
}

/// DELETE /messages/:message_id — soft-delete a message (author, or moderator+).
///
/// The row is retained with `deleted = TRUE`; no content is returned.
pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let message = fetch_message(&state.pool, message_id).await?;
    let channel = fetch_channel_by_id(&state.pool, message.channel_id).await?;
    let _server = fetch_server(&state.pool, channel.server_id).await?;

    require_member(&state.pool, channel.server_id, auth.user_id()).await?;

    let is_author = message.author_id == Some(auth.user_id());
    if !is_author {
        require_role(&state.pool, channel.server_id, auth.user_id(), Role::Moderator).await?;
    }

    let result =
        sqlx::query("UPDATE messages SET deleted = TRUE WHERE id = $1 AND deleted = FALSE")
            .bind(message_id)
            .execute(&state.pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Message not found".into()));
    }

    emit_to_channel(
        &state,
        channel.id,
        Some(auth.user_id()),
        EVENT_MESSAGE_DELETE,
        json!({ "id": message_id, "channel_id": message.channel_id }),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
