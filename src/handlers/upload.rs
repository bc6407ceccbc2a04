use axum::{extract::{Multipart, State}, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

/// Maximum file size in bytes (50 MB).
const MAX_FILE_SIZE: usize = 52_428_800;

/// Allowlist of MIME types accepted for uploaded files, detected from magic
/// bytes rather than the client-supplied Content-Type header.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/webm",
    "audio/mpeg",
    "audio/ogg",
    "audio/webm",
    "application/pdf",
    "text/plain",
];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
    pub size: usize,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content_type: String,
}

fn media_kind(mime_type: &str) -> &'static str {
    if mime_type.starts_with("image/") {
        "image"
    } else if mime_type.starts_with("video/") {
        "video"
    } else if mime_type.starts_with("audio/") {
        "audio"
    } else {
        "file"
    }
}

/// Replace any character that is not alphanumeric, dot, underscore, or hyphen
/// with an underscore, capped at 128 characters (not bytes).
fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(128)
        .collect();

    if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized
    }
}

fn extension_of(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("bin")
}

/// POST /upload — a single thin multipart endpoint with no per-message
/// threading or auth-gated serving (§4.4). Stores to
/// `{upload_dir}/YYYY/MM/<uuid>.<ext>`.
pub async fn upload_file(
    State(state): State<AppState>,
    _auth: AuthUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| {
            tracing::warn!(error = ?e, "Failed to read multipart field");
            AppError::Validation("Invalid multipart data".into())
        })?
        .ok_or_else(|| AppError::Validation("No file provided".into()))?;

    let original_filename = field.file_name().unwrap_or("upload").to_string();

    let data = field.bytes().await.map_err(|e| {
        tracing::warn!(error = ?e, "Failed to read multipart field bytes");
        AppError::Validation("Failed to read file data".into())
    })?;

    if data.is_empty() {
        return Err(AppError::Validation("File must not be empty".into()));
    }
    if data.len() > MAX_FILE_SIZE {
        return Err(AppError::Validation("File size exceeds the 50 MB limit".into()));
    }

    let mime_type = infer::get(&data)
        .map(|t| t.mime_type())
        .unwrap_or("application/octet-stream")
        .to_string();

    if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(AppError::Validation(format!(
            "File type '{}' is not allowed",
            mime_type
        )));
    }

    let now = Utc::now();
    let year = now.format("%Y");
    let month = now.format("%m");

    let sanitized = sanitize_filename(&original_filename);
    let ext = extension_of(&sanitized);
    let stored_name = format!("{}.{}", Uuid::new_v4(), ext);

    let dir = state
        .upload_dir
        .join(year.to_string())
        .join(month.to_string());

    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        tracing::error!(error = ?e, path = ?dir, "Failed to create upload directory");
        AppError::Internal
    })?;

    let file_path = dir.join(&stored_name);
    tokio::fs::write(&file_path, &data).await.map_err(|e| {
        tracing::error!(error = ?e, path = ?file_path, "Failed to write uploaded file");
        AppError::Internal
    })?;

    let url = format!("/uploads/{}/{}/{}", year, month, stored_name);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url,
            filename: sanitized,
            size: data.len(),
            kind: media_kind(&mime_type),
            content_type: mime_type,
        }),
    ))
}
