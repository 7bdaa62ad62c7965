//! In-memory guild used by unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::discord::client::{CODE_MISSING_PERMISSIONS, GuildClient, RemoteError};
use crate::discord::models::{
    Channel, ChannelKind, Guild, Member, Message, PermissionOverwrite, Role, ThreadVisibility,
    User, snowflake_key,
};

pub const GUILD_ID: &str = "900";
pub const BOT_ID: &str = "1";

#[derive(Default)]
struct State {
    members: Vec<Member>,
    channels: Vec<Channel>,
    roles: Vec<Role>,
    messages: HashMap<String, Vec<Message>>,
    active_threads: Vec<Channel>,
    archived: HashMap<(String, &'static str), Vec<Channel>>,
    forbidden: HashSet<String>,
    failing: HashMap<String, String>,
    cancel_on_fetch: HashMap<String, CancellationToken>,
    history_fetches: Vec<(String, Option<String>)>,
    kicked: Vec<String>,
    kick_failures: HashSet<String>,
    survives_kick: HashSet<String>,
    deleted_roles: Vec<String>,
    deleted_channels: Vec<String>,
    moved: Vec<(String, String)>,
    next_id: u64,
}

/// A guild held entirely in memory. Every history fetch is recorded so tests
/// can assert which channels were touched.
pub struct FakeGuild {
    guild: Guild,
    bot: User,
    state: Mutex<State>,
}

impl FakeGuild {
    pub fn new(name: &str) -> Self {
        Self {
            guild: Guild {
                id: GUILD_ID.into(),
                name: name.into(),
                owner_id: "owner".into(),
            },
            bot: user(BOT_ID, "sweeper", true),
            state: Mutex::new(State {
                next_id: 5_000,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_member(&self, member: Member) {
        self.state().members.push(member);
    }

    /// Put the bot itself in the member list holding `roles`.
    pub fn add_bot_member(&self, roles: &[&str]) {
        let mut bot = member(BOT_ID, "sweeper");
        bot.user.bot = true;
        bot.roles = roles.iter().map(|r| r.to_string()).collect();
        self.add_member(bot);
    }

    pub fn add_channel(&self, channel: Channel) {
        self.state().channels.push(channel);
    }

    pub fn add_role(&self, role: Role) {
        self.state().roles.push(role);
    }

    pub fn add_message(&self, channel_id: &str, message: Message) {
        self.state()
            .messages
            .entry(channel_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn add_active_thread(&self, thread: Channel) {
        self.state().active_threads.push(thread);
    }

    pub fn add_archived_thread(&self, parent_id: &str, visibility: ThreadVisibility, thread: Channel) {
        self.state()
            .archived
            .entry((parent_id.to_string(), visibility.as_str()))
            .or_default()
            .push(thread);
    }

    /// History fetches in this channel answer 403.
    pub fn forbid_channel(&self, channel_id: &str) {
        self.state().forbidden.insert(channel_id.to_string());
    }

    /// History fetches in this channel answer 500 with `message`.
    pub fn fail_channel(&self, channel_id: &str, message: &str) {
        self.state()
            .failing
            .insert(channel_id.to_string(), message.to_string());
    }

    /// Cancel `token` the first time history of this channel is requested.
    pub fn cancel_on_fetch(&self, channel_id: &str, token: CancellationToken) {
        self.state()
            .cancel_on_fetch
            .insert(channel_id.to_string(), token);
    }

    pub fn fail_kick(&self, user_id: &str) {
        self.state().kick_failures.insert(user_id.to_string());
    }

    /// The member stays in the guild after a successful kick call.
    pub fn survive_kick(&self, user_id: &str) {
        self.state().survives_kick.insert(user_id.to_string());
    }

    pub fn history_fetches(&self) -> Vec<(String, Option<String>)> {
        self.state().history_fetches.clone()
    }

    pub fn fetched_channels(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (id, _) in self.history_fetches() {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    }

    pub fn kicked(&self) -> Vec<String> {
        self.state().kicked.clone()
    }

    pub fn deleted_roles(&self) -> Vec<String> {
        self.state().deleted_roles.clone()
    }

    pub fn deleted_channels(&self) -> Vec<String> {
        self.state().deleted_channels.clone()
    }

    pub fn moved(&self) -> Vec<(String, String)> {
        self.state().moved.clone()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.state().channels.clone()
    }
}

fn forbidden() -> RemoteError {
    RemoteError::Forbidden {
        code: Some(CODE_MISSING_PERMISSIONS),
        message: "Missing Permissions".into(),
    }
}

#[async_trait]
impl GuildClient for FakeGuild {
    async fn current_user(&self) -> Result<User, RemoteError> {
        Ok(self.bot.clone())
    }

    async fn guild(&self, _guild_id: &str) -> Result<Guild, RemoteError> {
        Ok(self.guild.clone())
    }

    async fn guild_members(&self, _guild_id: &str) -> Result<Vec<Member>, RemoteError> {
        Ok(self.state().members.clone())
    }

    async fn guild_member(
        &self,
        _guild_id: &str,
        user_id: &str,
    ) -> Result<Option<Member>, RemoteError> {
        Ok(self
            .state()
            .members
            .iter()
            .find(|m| m.id() == user_id)
            .cloned())
    }

    async fn guild_channels(&self, _guild_id: &str) -> Result<Vec<Channel>, RemoteError> {
        Ok(self.state().channels.clone())
    }

    async fn guild_roles(&self, _guild_id: &str) -> Result<Vec<Role>, RemoteError> {
        Ok(self.state().roles.clone())
    }

    async fn active_threads(&self, _guild_id: &str) -> Result<Vec<Channel>, RemoteError> {
        Ok(self.state().active_threads.clone())
    }

    async fn archived_threads(
        &self,
        channel_id: &str,
        visibility: ThreadVisibility,
    ) -> Result<Vec<Channel>, RemoteError> {
        Ok(self
            .state()
            .archived
            .get(&(channel_id.to_string(), visibility.as_str()))
            .cloned()
            .unwrap_or_default())
    }

    async fn channel_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> Result<Vec<Message>, RemoteError> {
        let mut state = self.state();
        state
            .history_fetches
            .push((channel_id.to_string(), before.map(str::to_string)));
        if let Some(token) = state.cancel_on_fetch.remove(channel_id) {
            token.cancel();
        }
        if state.forbidden.contains(channel_id) {
            return Err(forbidden());
        }
        if let Some(message) = state.failing.get(channel_id) {
            return Err(RemoteError::Http {
                status: 500,
                code: None,
                message: message.clone(),
            });
        }

        let mut page: Vec<Message> = state
            .messages
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| before.is_none_or(|b| snowflake_key(&m.id) < snowflake_key(b)))
            .collect();
        page.sort_by(|a, b| snowflake_key(&b.id).cmp(&snowflake_key(&a.id)));
        page.truncate(limit as usize);
        Ok(page)
    }

    async fn kick_member(
        &self,
        _guild_id: &str,
        user_id: &str,
        _reason: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        if state.kick_failures.contains(user_id) {
            return Err(forbidden());
        }
        state.kicked.push(user_id.to_string());
        if !state.survives_kick.contains(user_id) {
            state.members.retain(|m| m.id() != user_id);
        }
        Ok(())
    }

    async fn delete_role(
        &self,
        _guild_id: &str,
        role_id: &str,
        _reason: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.deleted_roles.push(role_id.to_string());
        state.roles.retain(|r| r.id != role_id);
        Ok(())
    }

    async fn create_category(
        &self,
        _guild_id: &str,
        name: &str,
        _reason: &str,
    ) -> Result<Channel, RemoteError> {
        let mut state = self.state();
        state.next_id += 1;
        let category = category(&state.next_id.to_string(), name);
        state.channels.push(category.clone());
        Ok(category)
    }

    async fn move_channel(&self, channel_id: &str, parent_id: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        state
            .moved
            .push((channel_id.to_string(), parent_id.to_string()));
        if let Some(channel) = state.channels.iter_mut().find(|c| c.id == channel_id) {
            channel.parent_id = Some(parent_id.to_string());
        }
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str, _reason: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        if state.forbidden.contains(channel_id) {
            return Err(forbidden());
        }
        state.deleted_channels.push(channel_id.to_string());
        state.channels.retain(|c| c.id != channel_id);
        Ok(())
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn user(id: &str, username: &str, bot: bool) -> User {
    User {
        id: id.into(),
        username: username.into(),
        discriminator: "0".into(),
        global_name: None,
        bot,
    }
}

pub fn member(id: &str, username: &str) -> Member {
    Member {
        user: user(id, username, false),
        nick: None,
        roles: Vec::new(),
        joined_at: Some(Utc::now() - Duration::days(365)),
    }
}

pub fn bot_member(id: &str, username: &str) -> Member {
    let mut m = member(id, username);
    m.user.bot = true;
    m
}

fn channel(id: &str, name: &str, kind: ChannelKind, parent: Option<&str>) -> Channel {
    Channel {
        id: id.into(),
        kind,
        name: name.into(),
        parent_id: parent.map(Into::into),
        position: None,
        permission_overwrites: Vec::new(),
        last_message_id: None,
    }
}

pub fn text_channel(id: &str, name: &str, parent: Option<&str>) -> Channel {
    channel(id, name, ChannelKind::Text, parent)
}

pub fn category(id: &str, name: &str) -> Channel {
    channel(id, name, ChannelKind::Category, None)
}

pub fn forum(id: &str, name: &str, parent: Option<&str>) -> Channel {
    channel(id, name, ChannelKind::Forum, parent)
}

pub fn thread(id: &str, name: &str, parent: &str) -> Channel {
    channel(id, name, ChannelKind::PublicThread, Some(parent))
}

pub fn role(id: &str, name: &str, position: i32, permissions: u64) -> Role {
    Role {
        id: id.into(),
        name: name.into(),
        position,
        permissions: permissions.to_string(),
        managed: false,
    }
}

pub fn deny_everyone(permissions: u64) -> PermissionOverwrite {
    PermissionOverwrite {
        id: GUILD_ID.into(),
        kind: 0,
        allow: "0".into(),
        deny: permissions.to_string(),
    }
}

/// A message whose id orders the same way as its timestamp.
pub fn message_at(id: u64, author: &User, timestamp: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        author: author.clone(),
        timestamp,
    }
}

/// `count` messages by `author`, ids starting at `first_id`, one minute apart
/// going back from `newest`.
pub fn messages_by(first_id: u64, count: u64, author: &User, newest: DateTime<Utc>) -> Vec<Message> {
    (0..count)
        .map(|i| {
            let id = first_id + i;
            message_at(id, author, newest - Duration::minutes((count - 1 - i) as i64))
        })
        .collect()
}
