use std::path::PathBuf;
use std::sync::Arc;

use sqlx::PgPool;

use crate::hub::HubHandle;

/// Shared application state passed to all handlers and extractors.
///
/// `HubHandle` is cheaply cloneable (it wraps two channel senders), so
/// cloning `AppState` for each request is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt_secret: Arc<str>,
    pub jwt_expiry_hours: i64,
    pub hub: HubHandle,
    /// Root directory where uploaded files are stored.
    pub upload_dir: PathBuf,
    /// At-rest AES-256-GCM key, if configured. Not currently consulted by any
    /// handler (see `crypto` module docs).
    pub encryption_key: Option<[u8; 32]>,
}
