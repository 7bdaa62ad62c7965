use async_trait::async_trait;
use thiserror::Error;

use super::models::{Channel, Guild, Member, Message, Role, ThreadVisibility, User};

/// Discord JSON error code for "Missing Permissions".
pub const CODE_MISSING_PERMISSIONS: u64 = 50013;
/// Discord JSON error code for "Missing Access".
pub const CODE_MISSING_ACCESS: u64 = 50001;
/// Discord JSON error code for "Unknown Member".
pub const CODE_UNKNOWN_MEMBER: u64 = 10007;

/// Maximum page size accepted by the channel messages endpoint.
pub const MESSAGE_PAGE_LIMIT: u8 = 100;

/// Failure talking to the Discord REST API.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 403, or a Missing Permissions / Missing Access error code.
    #[error("{message}")]
    Forbidden { code: Option<u64>, message: String },
    /// Any other non-success HTTP response.
    #[error("{message}")]
    Http {
        status: u16,
        code: Option<u64>,
        message: String,
    },
    /// Still rate limited after exhausting retries.
    #[error("rate limited on {route}")]
    RateLimited { route: String },
    /// Connection, TLS or body decoding failure.
    #[error("{0}")]
    Transport(String),
}

impl RemoteError {
    pub fn code(&self) -> Option<u64> {
        match self {
            Self::Forbidden { code, .. } | Self::Http { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    pub fn is_unknown_member(&self) -> bool {
        self.code() == Some(CODE_UNKNOWN_MEMBER)
    }

    /// Human-readable reason used when a channel has to be skipped.
    pub fn skip_reason(&self, channel_name: &str) -> String {
        match self {
            Self::Forbidden { .. } => format!("{channel_name} (forbidden)"),
            Self::Http { .. } | Self::RateLimited { .. } => {
                format!("{channel_name} (HTTP error: {self})")
            }
            Self::Transport(_) => format!("{channel_name} (error: {self})"),
        }
    }
}

/// Everything the bot needs from the remote guild. Implemented over REST by
/// [`super::rest::DiscordRestClient`] and in memory by the test fake.
#[async_trait]
pub trait GuildClient: Send + Sync {
    /// The bot's own user.
    async fn current_user(&self) -> Result<User, RemoteError>;

    async fn guild(&self, guild_id: &str) -> Result<Guild, RemoteError>;

    /// Every member of the guild, across all pages.
    async fn guild_members(&self, guild_id: &str) -> Result<Vec<Member>, RemoteError>;

    /// A single member, or `None` when the user is not in the guild.
    async fn guild_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<Member>, RemoteError>;

    async fn guild_channels(&self, guild_id: &str) -> Result<Vec<Channel>, RemoteError>;

    async fn guild_roles(&self, guild_id: &str) -> Result<Vec<Role>, RemoteError>;

    /// All active threads in the guild.
    async fn active_threads(&self, guild_id: &str) -> Result<Vec<Channel>, RemoteError>;

    /// Most recent archived threads (one page of up to 100) under a parent channel.
    async fn archived_threads(
        &self,
        channel_id: &str,
        visibility: ThreadVisibility,
    ) -> Result<Vec<Channel>, RemoteError>;

    /// One page of history, newest first, strictly older than `before` when given.
    async fn channel_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> Result<Vec<Message>, RemoteError>;

    async fn kick_member(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), RemoteError>;

    async fn delete_role(
        &self,
        guild_id: &str,
        role_id: &str,
        reason: &str,
    ) -> Result<(), RemoteError>;

    async fn create_category(
        &self,
        guild_id: &str,
        name: &str,
        reason: &str,
    ) -> Result<Channel, RemoteError>;

    /// Re-parent a channel without syncing its permissions to the new category.
    async fn move_channel(&self, channel_id: &str, parent_id: &str) -> Result<(), RemoteError>;

    async fn delete_channel(&self, channel_id: &str, reason: &str) -> Result<(), RemoteError>;
}
