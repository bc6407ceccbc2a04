use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: String,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserDto {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: String,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        UserDto {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            status: user.status,
            bio: user.bio,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserDto {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: Option<String>,
    pub bio: Option<String>,
}

/// Opaque end-to-end encryption key material a client publishes for itself.
/// The server stores and serves this blob unread, exactly like message
/// ciphertext — it is never parsed or validated beyond basic length limits.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserKey {
    pub user_id: Uuid,
    pub key_type: String,
    pub public_key: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Role (total order: member < moderator < admin < owner)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Moderator,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Server / ServerMember
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub icon_url: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ServerDto {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub icon_url: Option<String>,
    pub is_public: bool,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServerDto {
    pub name: String,
    pub icon_url: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServerDto {
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServerMember {
    pub id: Uuid,
    pub server_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub nickname: Option<String>,
    pub joined_at: DateTime<Utc>,
}

impl ServerMember {
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Member)
    }
}

#[derive(Debug, Serialize, FromRow)]
pub struct MemberDto {
    pub user_id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub role: String,
    pub nickname: Option<String>,
    pub joined_at: DateTime<Utc>,
}

// ============================================================================
// Invite
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Invite {
    pub id: Uuid,
    pub server_id: Uuid,
    pub code: String,
    pub created_by: Uuid,
    pub max_uses: i32,
    pub uses: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    /// `max_uses == 0` means unlimited (§8 idempotence law).
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        let not_expired = self.expires_at.map(|exp| now < exp).unwrap_or(true);
        let not_exhausted = self.max_uses == 0 || self.uses < self.max_uses;
        not_expired && not_exhausted
    }
}

// ============================================================================
// Channel
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Channel {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub kind: String,
    pub position: i32,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelDto {
    pub name: String,
    pub kind: String,
    pub is_private: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChannelDto {
    pub name: Option<String>,
    pub position: Option<i32>,
    pub is_private: Option<bool>,
}

// ============================================================================
// Message
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Option<Uuid>,
    pub ciphertext: String,
    pub nonce: String,
    pub encryption_header: String,
    pub kind: String,
    pub attachment_url: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub is_edited: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageDto {
    pub ciphertext: String,
    pub nonce: String,
    pub encryption_header: String,
    pub kind: Option<String>,
    pub attachment_url: Option<String>,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageDto {
    pub ciphertext: String,
    pub nonce: String,
    pub encryption_header: String,
}

// ============================================================================
// Voice state
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VoiceState {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel_id: Uuid,
    pub server_id: Uuid,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct VoiceParticipantDto {
    pub user_id: Uuid,
    pub username: String,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub joined_at: DateTime<Utc>,
}

// ============================================================================
// Direct messages
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DirectMessage {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub ciphertext: String,
    pub nonce: String,
    pub encryption_header: String,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDirectMessageDto {
    pub ciphertext: String,
    pub nonce: String,
    pub encryption_header: String,
}

#[derive(Debug, Serialize)]
pub struct DirectMessageChannelDto {
    pub id: Uuid,
    pub recipient: UserDto,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_total_order() {
        assert!(Role::Member < Role::Moderator);
        assert!(Role::Moderator < Role::Admin);
        assert!(Role::Admin < Role::Owner);
        assert!(Role::Member < Role::Owner);
    }

    #[test]
    fn role_round_trips_through_string() {
        for role in [Role::Member, Role::Moderator, Role::Admin, Role::Owner] {
            let s = role.as_str();
            assert_eq!(Role::from_str(s).unwrap(), role);
        }
    }

    #[test]
    fn invite_unlimited_when_max_uses_zero() {
        let invite = Invite {
            id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            code: "ABCDEFGH".into(),
            created_by: Uuid::new_v4(),
            max_uses: 0,
            uses: 9999,
            expires_at: None,
            created_at: Utc::now(),
        };
        assert!(invite.is_usable(Utc::now()));
    }

    #[test]
    fn invite_exhausted_when_uses_reach_max() {
        let invite = Invite {
            id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            code: "ABCDEFGH".into(),
            created_by: Uuid::new_v4(),
            max_uses: 2,
            uses: 2,
            expires_at: None,
            created_at: Utc::now(),
        };
        assert!(!invite.is_usable(Utc::now()));
    }

    #[test]
    fn invite_expired_when_past_expiry() {
        let invite = Invite {
            id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            code: "ABCDEFGH".into(),
            created_by: Uuid::new_v4(),
            max_uses: 0,
            uses: 0,
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            created_at: Utc::now(),
        };
        assert!(!invite.is_usable(Utc::now()));
    }
}
