use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rand::Rng;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use super::shared::{fetch_server, require_member, require_role, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CreateServerDto, Invite, MemberDto, Role, Server, ServerDto, UpdateServerDto},
    state::AppState,
    websocket::emit_to_server,
};

const INVITE_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const INVITE_CODE_LEN: usize = 8;

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateServerRequest {
    #[validate(length(min = 1, max = 100, message = "Server name must be 1–100 characters"))]
    pub name: String,
    pub icon_url: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UpdateServerRequest {
    #[validate(length(min = 1, max = 100, message = "Server name must be 1–100 characters"))]
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateInviteRequest {
    /// 0 means unlimited (§8).
    #[validate(range(min = 0, max = 10000))]
    pub max_uses: Option<i32>,
    pub expires_in_hours: Option<i64>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Build a ServerDto from a Server row plus a live member count query.
async fn server_dto(pool: &sqlx::PgPool, server: Server) -> AppResult<ServerDto> {
    let member_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM server_members WHERE server_id = $1")
            .bind(server.id)
            .fetch_one(pool)
            .await?;

    Ok(ServerDto {
        id: server.id,
        name: server.name,
        owner_id: server.owner_id,
        icon_url: server.icon_url,
        is_public: server.is_public,
        member_count,
        created_at: server.created_at,
        updated_at: server.updated_at,
    })
}

fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..INVITE_CODE_ALPHABET.len());
            INVITE_CODE_ALPHABET[idx] as char
        })
        .collect()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /servers — create a new server; creator is auto-joined as owner.
pub async fn create_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateServerRequest>,
) -> AppResult<(StatusCode, Json<ServerDto>)> {
    req.validate().map_err(validation_error)?;

    let dto = CreateServerDto {
        name: req.name,
        icon_url: req.icon_url,
        is_public: req.is_public,
    };

    let mut tx = state.pool.begin().await?;

    let server = sqlx::query_as::<_, Server>(
        "INSERT INTO servers (name, owner_id, icon_url, is_public)
         VALUES ($1, $2, $3, $4)
         RETURNING id, name, owner_id, icon_url, is_public, created_at, updated_at",
    )
    .bind(&dto.name)
    .bind(auth.user_id())
    .bind(&dto.icon_url)
    .bind(dto.is_public.unwrap_or(false))
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO server_members (user_id, server_id, role) VALUES ($1, $2, 'owner')")
        .bind(auth.user_id())
        .bind(server.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let dto = server_dto(&state.pool, server).await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

/// GET /servers — list all servers the authenticated user belongs to.
pub async fn list_servers(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<ServerDto>>> {
    let servers = sqlx::query_as::<_, Server>(
        "SELECT s.id, s.name, s.owner_id, s.icon_url, s.is_public, s.created_at, s.updated_at
         FROM servers s
         JOIN server_members sm ON sm.server_id = s.id
         WHERE sm.user_id = $1
         ORDER BY s.created_at ASC",
    )
    .bind(auth.user_id())
    .fetch_all(&state.pool)
    .await?;

    let mut dtos = Vec::with_capacity(servers.len());
    for s in servers {
        dtos.push(server_dto(&state.pool, s).await?);
    }

    Ok(Json(dtos))
}

/// GET /servers/:id — get a single server (members only).
pub async fn get_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<Json<ServerDto>> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;
    let dto = server_dto(&state.pool, server).await?;
    Ok(Json(dto))
}

/// PATCH /servers/:id — update name or icon (admin or higher).
pub async fn update_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
    Json(req): Json<UpdateServerRequest>,
) -> AppResult<Json<ServerDto>> {
    req.validate().map_err(validation_error)?;

    fetch_server(&state.pool, server_id).await?;
    require_role(&state.pool, server_id, auth.user_id(), Role::Admin).await?;

    let dto = UpdateServerDto {
        name: req.name,
        icon_url: req.icon_url,
        is_public: req.is_public,
    };

    let updated = sqlx::query_as::<_, Server>(
        "UPDATE servers
         SET name       = COALESCE($1, name),
             icon_url   = COALESCE($2, icon_url),
             is_public  = COALESCE($3, is_public),
             updated_at = NOW()
         WHERE id = $4
         RETURNING id, name, owner_id, icon_url, is_public, created_at, updated_at",
    )
    .bind(&dto.name)
    .bind(&dto.icon_url)
    .bind(dto.is_public)
    .bind(server_id)
    .fetch_one(&state.pool)
    .await?;

    let dto = server_dto(&state.pool, updated).await?;
    Ok(Json(dto))
}

/// DELETE /servers/:id — delete server and all its data (owner only).
pub async fn delete_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let server = fetch_server(&state.pool, server_id).await?;

    if server.owner_id != auth.user_id() {
        return Err(AppError::Forbidden(
            "Only the server owner can delete it".into(),
        ));
    }

    sqlx::query("DELETE FROM servers WHERE id = $1")
        .bind(server_id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /servers/:id/join — join a public server as the authenticated user.
///
/// Private servers reject this route entirely; they are only joinable via
/// `POST /servers/join/:code`.
pub async fn join_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let server = fetch_server(&state.pool, server_id).await?;

    if !server.is_public {
        return Err(AppError::Forbidden(
            "This server is private; join with an invite".into(),
        ));
    }

    let existing = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM server_members WHERE server_id = $1 AND user_id = $2)",
    )
    .bind(server_id)
    .bind(auth.user_id())
    .fetch_one(&state.pool)
    .await?;

    if existing {
        return Err(AppError::Conflict("Already a member of this server".into()));
    }

    let member = sqlx::query_as::<_, MemberDto>(
        r#"
        WITH inserted AS (
            INSERT INTO server_members (user_id, server_id) VALUES ($1, $2)
            RETURNING user_id, nickname, joined_at, role
        )
        SELECT u.id AS user_id, u.username, u.avatar_url, u.status, inserted.role,
               inserted.nickname, inserted.joined_at
        FROM inserted JOIN users u ON u.id = inserted.user_id
        "#,
    )
    .bind(auth.user_id())
    .bind(server_id)
    .fetch_one(&state.pool)
    .await?;

    emit_to_server(
        &state,
        server_id,
        None,
        crate::websocket::envelope::EVENT_MEMBER_JOIN,
        json!({ "server_id": server_id, "member": member }),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Joined server" })),
    ))
}

/// POST /servers/join/:code — join a server via invite code (§4.4/§4.5).
pub async fn join_by_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> AppResult<(StatusCode, Json<ServerDto>)> {
    let mut tx = state.pool.begin().await?;

    let invite = sqlx::query_as::<_, Invite>(
        "SELECT id, server_id, code, created_by, max_uses, uses, expires_at, created_at
         FROM invites WHERE code = $1 FOR UPDATE",
    )
    .bind(&code)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Invite not found".into()))?;

    if !invite.is_usable(chrono::Utc::now()) {
        return Err(AppError::Gone("Invite expired or exhausted".into()));
    }

    let already_member = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM server_members WHERE server_id = $1 AND user_id = $2)",
    )
    .bind(invite.server_id)
    .bind(auth.user_id())
    .fetch_one(&mut *tx)
    .await?;

    if already_member {
        return Err(AppError::Conflict("Already a member of this server".into()));
    }

    sqlx::query("INSERT INTO server_members (user_id, server_id) VALUES ($1, $2)")
        .bind(auth.user_id())
        .bind(invite.server_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE invites SET uses = uses + 1 WHERE id = $1")
        .bind(invite.id)
        .execute(&mut *tx)
        .await?;

    let server = sqlx::query_as::<_, Server>(
        "SELECT id, name, owner_id, icon_url, is_public, created_at, updated_at
         FROM servers WHERE id = $1",
    )
    .bind(invite.server_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let member = sqlx::query_as::<_, MemberDto>(
        "SELECT u.id AS user_id, u.username, u.avatar_url, u.status, sm.role,
                sm.nickname, sm.joined_at
         FROM server_members sm
         JOIN users u ON u.id = sm.user_id
         WHERE sm.server_id = $1 AND sm.user_id = $2",
    )
    .bind(invite.server_id)
    .bind(auth.user_id())
    .fetch_one(&state.pool)
    .await?;

    emit_to_server(
        &state,
        invite.server_id,
        None,
        crate::websocket::envelope::EVENT_MEMBER_JOIN,
        json!({ "server_id": invite.server_id, "member": member }),
    )
    .await;

    let dto = server_dto(&state.pool, server).await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

/// POST /servers/:id/invite — mint a new invite code (any member).
pub async fn create_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
    Json(req): Json<CreateInviteRequest>,
) -> AppResult<(StatusCode, Json<Invite>)> {
    req.validate().map_err(validation_error)?;

    fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    let expires_at = req
        .expires_in_hours
        .map(|h| chrono::Utc::now() + chrono::Duration::hours(h));

    let invite = sqlx::query_as::<_, Invite>(
        "INSERT INTO invites (server_id, code, created_by, max_uses, expires_at)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, server_id, code, created_by, max_uses, uses, expires_at, created_at",
    )
    .bind(server_id)
    .bind(generate_invite_code())
    .bind(auth.user_id())
    .bind(req.max_uses.unwrap_or(0))
    .bind(expires_at)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(invite)))
}

/// DELETE /servers/:id/leave — leave a server (non-owners only).
pub async fn leave_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    if server.owner_id == auth.user_id() {
        return Err(AppError::Validation(
            "Server owner cannot leave — transfer ownership or delete the server".into(),
        ));
    }

    sqlx::query("DELETE FROM server_members WHERE server_id = $1 AND user_id = $2")
        .bind(server_id)
        .bind(auth.user_id())
        .execute(&state.pool)
        .await?;

    emit_to_server(
        &state,
        server_id,
        None,
        crate::websocket::envelope::EVENT_MEMBER_LEAVE,
        json!({ "server_id": server_id, "user_id": auth.user_id() }),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /servers/:id/members/:uid — kick a member (moderator or higher).
pub async fn kick_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, target_user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_role(&state.pool, server_id, auth.user_id(), Role::Moderator).await?;

    if target_user_id == server.owner_id {
        return Err(AppError::Forbidden("Cannot kick the server owner".into()));
    }

    let deleted = sqlx::query("DELETE FROM server_members WHERE server_id = $1 AND user_id = $2")
        .bind(server_id)
        .bind(target_user_id)
        .execute(&state.pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound("Member not found".into()));
    }

    emit_to_server(
        &state,
        server_id,
        None,
        crate::websocket::envelope::EVENT_MEMBER_LEAVE,
        json!({ "server_id": server_id, "user_id": target_user_id }),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /servers/browse — list all public servers (authenticated, no membership required).
///
/// Returns servers ordered by member count (descending) then creation date.
/// Results are capped at 50 — discovery is intentionally lightweight with no pagination.
/// Does NOT filter out servers the caller already belongs to; clients derive "Joined"
/// state by cross-referencing their own server list.
pub async fn browse_servers(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<Vec<ServerDto>>> {
    let servers = sqlx::query_as::<_, ServerDto>(
        "SELECT s.id, s.name, s.owner_id, s.icon_url, s.is_public, s.created_at, s.updated_at,
                COUNT(sm.user_id)::BIGINT AS member_count
         FROM   servers s
         LEFT JOIN server_members sm ON sm.server_id = s.id
         WHERE  s.is_public = TRUE
         GROUP BY s.id
         ORDER BY member_count DESC, s.created_at DESC
         LIMIT 50",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(servers))
}

/// GET /servers/:id/members — list all members of a server (members only).
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<Uuid>,
) -> AppResult<Json<Vec<MemberDto>>> {
    fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    let members = sqlx::query_as::<_, MemberDto>(
        "SELECT u.id AS user_id, u.username, u.avatar_url, u.status, sm.role,
                sm.nickname, sm.joined_at
         FROM server_members sm
         JOIN users u ON u.id = sm.user_id
         WHERE sm.server_id = $1
         ORDER BY sm.joined_at ASC",
    )
    .bind(server_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(members))
}
