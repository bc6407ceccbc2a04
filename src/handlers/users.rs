use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    handlers::shared::validation_error,
    models::{UpdateUserDto, User, UserDto, UserKey},
    state::AppState,
};

const VALID_STATUSES: &[&str] = &["online", "away", "dnd", "offline"];
const VALID_KEY_TYPES: &[&str] = &["identity", "signed_prekey", "one_time_prekey"];

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 64))]
    pub display_name: Option<String>,
    /// Must be a valid HTTP(S) URL when provided.
    #[validate(url)]
    pub avatar_url: Option<String>,
    pub status: Option<String>,
    #[validate(length(max = 256))]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PublishKeyRequest {
    pub key_type: String,
    #[validate(length(min = 1, max = 8192))]
    pub public_key: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AppResult<Json<UserDto>> {
    info!("Getting current user: {}", auth_user.user_id());

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, display_name, avatar_url, status, bio,
                created_at, updated_at
         FROM users WHERE id = $1",
    )
    .bind(auth_user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user.into()))
}

/// GET /users/:id — another user's public profile (no email).
pub async fn get_user(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserDto>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, display_name, avatar_url, status, bio,
                created_at, updated_at
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user.into()))
}

pub async fn update_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<UserDto>> {
    req.validate().map_err(validation_error)?;

    info!("Updating user: {}", auth_user.user_id());

    if let Some(ref status) = req.status {
        if !VALID_STATUSES.contains(&status.as_str()) {
            return Err(AppError::Validation(format!(
                "Invalid status '{}'. Must be one of: {}",
                status,
                VALID_STATUSES.join(", ")
            )));
        }
    }

    let update = UpdateUserDto {
        display_name: req.display_name,
        avatar_url: req.avatar_url,
        status: req.status,
        bio: req.bio,
    };

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET display_name = COALESCE($1, display_name),
            avatar_url    = COALESCE($2, avatar_url),
            status        = COALESCE($3, status),
            bio           = COALESCE($4, bio),
            updated_at    = NOW()
        WHERE id = $5
        RETURNING id, username, email, password_hash, display_name, avatar_url, status, bio,
                  created_at, updated_at
        "#,
    )
    .bind(update.display_name)
    .bind(update.avatar_url)
    .bind(update.status)
    .bind(update.bio)
    .bind(auth_user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user.into()))
}

/// GET /users/:id/keys — every E2E key blob a user has published. The server
/// never inspects `public_key`, mirroring its non-inspection of message
/// ciphertext (§4.4).
pub async fn get_user_keys(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<UserKey>>> {
    let keys = sqlx::query_as::<_, UserKey>(
        "SELECT user_id, key_type, public_key, updated_at FROM user_keys WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(keys))
}

/// POST /users/me/keys — publish or replace one of the caller's own key slots.
pub async fn publish_own_key(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<PublishKeyRequest>,
) -> AppResult<(StatusCode, Json<UserKey>)> {
    req.validate().map_err(validation_error)?;

    if !VALID_KEY_TYPES.contains(&req.key_type.as_str()) {
        return Err(AppError::Validation(format!(
            "Invalid key_type '{}'. Must be one of: {}",
            req.key_type,
            VALID_KEY_TYPES.join(", ")
        )));
    }

    let key = sqlx::query_as::<_, UserKey>(
        r#"
        INSERT INTO user_keys (user_id, key_type, public_key, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (user_id, key_type) DO UPDATE
        SET public_key = EXCLUDED.public_key, updated_at = NOW()
        RETURNING user_id, key_type, public_key, updated_at
        "#,
    )
    .bind(auth_user.user_id())
    .bind(&req.key_type)
    .bind(&req.public_key)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(key)))
}
