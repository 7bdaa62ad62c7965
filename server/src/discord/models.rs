use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Discord epoch (2015-01-01T00:00:00Z) in milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// A Discord user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Legacy four-digit discriminator; `"0"` for accounts on the new username system.
    #[serde(default = "default_discriminator")]
    pub discriminator: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

fn default_discriminator() -> String {
    "0".into()
}

impl User {
    /// Account tag: `name#1234` for legacy accounts, plain `name` otherwise.
    pub fn tag(&self) -> String {
        if self.discriminator.is_empty() || self.discriminator == "0" {
            self.username.clone()
        } else {
            format!("{}#{}", self.username, self.discriminator)
        }
    }
}

/// A guild member as returned by `GET /guilds/{id}/members`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn is_bot(&self) -> bool {
        self.user.bot
    }

    /// Guild nickname, then global display name, then username.
    pub fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .or(self.user.global_name.as_deref())
            .unwrap_or(&self.user.username)
    }

    /// Name used in CSV exports and previews: `Display (tag)`, or just the tag
    /// when the display name adds nothing.
    pub fn formatted_name(&self) -> String {
        let tag = self.user.tag();
        let display = self.display_name();
        if !display.is_empty() && display != tag {
            format!("{display} ({tag})")
        } else {
            tag
        }
    }
}

/// Closed set of channel kinds the bot cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    Announcement,
    AnnouncementThread,
    PublicThread,
    PrivateThread,
    Stage,
    Forum,
    Media,
    Other(u8),
}

impl ChannelKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Text,
            2 => Self::Voice,
            4 => Self::Category,
            5 => Self::Announcement,
            10 => Self::AnnouncementThread,
            11 => Self::PublicThread,
            12 => Self::PrivateThread,
            13 => Self::Stage,
            15 => Self::Forum,
            16 => Self::Media,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::Voice => 2,
            Self::Category => 4,
            Self::Announcement => 5,
            Self::AnnouncementThread => 10,
            Self::PublicThread => 11,
            Self::PrivateThread => 12,
            Self::Stage => 13,
            Self::Forum => 15,
            Self::Media => 16,
            Self::Other(code) => code,
        }
    }

    pub fn is_thread(self) -> bool {
        matches!(
            self,
            Self::AnnouncementThread | Self::PublicThread | Self::PrivateThread
        )
    }

    /// Whether the channel has its own message history that can be paged.
    pub fn supports_history(self) -> bool {
        matches!(
            self,
            Self::Text | Self::Announcement | Self::Voice | Self::Stage
        ) || self.is_thread()
    }

    /// Whether threads can be created under this channel.
    pub fn supports_threads(self) -> bool {
        matches!(self, Self::Text | Self::Announcement | Self::Forum)
    }
}

impl<'de> Deserialize<'de> for ChannelKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(Self::from_code)
    }
}

impl Serialize for ChannelKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Allow/deny pair attached to a channel for a role (`kind == 0`) or member (`kind == 1`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub allow: String,
    #[serde(default)]
    pub deny: String,
}

/// A guild channel, category or thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,
    #[serde(default)]
    pub last_message_id: Option<String>,
}

impl Channel {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        snowflake_timestamp(&self.id)
    }
}

/// A guild role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub position: i32,
    /// Permission bitfield, serialized by Discord as a decimal string.
    #[serde(default)]
    pub permissions: String,
    #[serde(default)]
    pub managed: bool,
}

/// A message as far as activity scanning is concerned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub author: User,
    pub timestamp: DateTime<Utc>,
}

/// The guild itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guild {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner_id: String,
}

/// Wrapper returned by the thread list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadList {
    #[serde(default)]
    pub threads: Vec<Channel>,
}

/// Which archived-thread listing to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadVisibility {
    Public,
    Private,
}

impl ThreadVisibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// Sort key giving snowflake ids their numeric order without parsing them:
/// a shorter decimal string is always the smaller id.
pub fn snowflake_key(id: &str) -> (usize, &str) {
    (id.len(), id)
}

/// Creation time encoded in a snowflake id.
pub fn snowflake_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let raw: u64 = id.parse().ok()?;
    let millis = (raw >> 22) as i64 + DISCORD_EPOCH_MS;
    Utc.timestamp_millis_opt(millis).single()
}
