use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{
    auth::{
        create_access_token, create_refresh_token, hash_password, hash_refresh_token,
        validate_token, verify_password,
    },
    error::{AppError, AppResult},
    models::{User, UserDto},
    state::AppState,
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserDto,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    info!("Registering new user: {}", req.username);

    let password_hash = hash_password(&req.password)?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, password_hash, status)
        VALUES ($1, $2, $3, 'offline')
        RETURNING id, username, email, password_hash, display_name, avatar_url, status, bio,
                  created_at, updated_at
        "#,
    )
    .bind(&req.username)
    .bind(&req.email)
    .bind(&password_hash)
    .fetch_one(&state.pool)
    .await?;

    info!("User created: {} ({})", user.username, user.id);

    let (access_token, refresh_token) = issue_session(&state, user.id, &user.username).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            access_token,
            refresh_token,
            user: user.into(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    info!("Login attempt for user: {}", req.username);

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, display_name, avatar_url, status, bio,
                created_at, updated_at
         FROM users WHERE username = $1",
    )
    .bind(&req.username)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::Auth("Invalid username or password".into()))?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::Auth("Invalid username or password".into()));
    }

    info!("Login successful: {} ({})", user.username, user.id);

    let (access_token, refresh_token) = issue_session(&state, user.id, &user.username).await?;

    sqlx::query("UPDATE users SET status = 'online', updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.pool)
        .await?;

    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: user.into(),
    }))
}

/// Rotate a refresh token for a new access/refresh pair.
///
/// Only tokens carrying the refresh `iss` are accepted here — an access token
/// that merely parses is not good enough (§9's open question, resolved).
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let claims = validate_token(&req.refresh_token, &state.jwt_secret)?;
    if !claims.is_refresh() {
        return Err(AppError::Auth("Invalid token type".into()));
    }
    let user_id = claims.user_id()?;

    let presented_hash = hash_refresh_token(&req.refresh_token);
    let session_exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sessions
         WHERE user_id = $1 AND refresh_token_hash = $2 AND expires_at > NOW()",
    )
    .bind(user_id)
    .bind(&presented_hash)
    .fetch_one(&state.pool)
    .await?;

    if session_exists == 0 {
        return Err(AppError::Auth("Invalid or expired refresh token".into()));
    }

    sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND refresh_token_hash = $2")
        .bind(user_id)
        .bind(&presented_hash)
        .execute(&state.pool)
        .await?;

    let (access_token, refresh_token) =
        issue_session(&state, user_id, &claims.username).await?;

    Ok(Json(RefreshResponse {
        access_token,
        refresh_token,
    }))
}

/// Mint an access/refresh token pair and persist the refresh token's SHA-256
/// digest so `refresh_token` can look it up deterministically.
async fn issue_session(
    state: &AppState,
    user_id: uuid::Uuid,
    username: &str,
) -> AppResult<(String, String)> {
    let access_token = create_access_token(
        user_id,
        username.to_string(),
        &state.jwt_secret,
        state.jwt_expiry_hours,
    )?;
    let refresh_token = create_refresh_token(user_id, username.to_string(), &state.jwt_secret)?;

    let refresh_token_hash = hash_refresh_token(&refresh_token);
    sqlx::query(
        r#"
        INSERT INTO sessions (user_id, refresh_token_hash, expires_at)
        VALUES ($1, $2, NOW() + INTERVAL '7 days')
        "#,
    )
    .bind(user_id)
    .bind(&refresh_token_hash)
    .execute(&state.pool)
    .await?;

    Ok((access_token, refresh_token))
}
