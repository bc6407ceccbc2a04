use std::path::PathBuf;
use std::sync::Arc;

/// Process configuration, resolved once at boot from the environment.
///
/// `JWT_SECRET` and `DATABASE_URL` are fatal when missing — everything else has
/// a safe default. A malformed `ENCRYPTION_KEY` (present but not 32 bytes of
/// hex) is also fatal, since a half-configured at-rest encryption key is worse
/// than none at all.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: Arc<str>,
    pub jwt_expiry_hours: i64,
    pub encryption_key: Option<[u8; 32]>,
    pub allowed_origins: Vec<String>,
    pub upload_dir: PathBuf,
    pub is_dev: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{0} is malformed: {1}")]
    Malformed(&'static str, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let is_dev = std::env::var("ENV").as_deref() != Ok("production");

        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.trim().is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }

        let encryption_key = match std::env::var("ENCRYPTION_KEY") {
            Ok(hex_key) => Some(parse_encryption_key(&hex_key)?),
            Err(_) => None,
        };

        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let jwt_expiry_hours = std::env::var("JWT_EXPIRY_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(72);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let upload_dir = std::env::var("UPLOAD_DIR")
            .unwrap_or_else(|_| "uploads".to_string())
            .into();

        Ok(Config {
            host,
            port,
            database_url,
            jwt_secret: Arc::from(jwt_secret.as_str()),
            jwt_expiry_hours,
            encryption_key,
            allowed_origins,
            upload_dir,
            is_dev,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_encryption_key(hex_key: &str) -> Result<[u8; 32], ConfigError> {
    let bytes =
        hex_decode(hex_key.trim()).map_err(|e| ConfigError::Malformed("ENCRYPTION_KEY", e))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        ConfigError::Malformed(
            "ENCRYPTION_KEY",
            format!("expected 32 bytes, got {}", v.len()),
        )
    })
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd-length hex string".into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}
