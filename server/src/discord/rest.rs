use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::client::{
    CODE_MISSING_ACCESS, CODE_MISSING_PERMISSIONS, GuildClient, MESSAGE_PAGE_LIMIT, RemoteError,
};
use super::models::{Channel, Guild, Member, Message, Role, ThreadList, ThreadVisibility, User};
use super::rate_limiter::RateLimiter;

/// Default REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Page size for `GET /guilds/{id}/members`.
pub const MEMBER_PAGE_LIMIT: usize = 1000;

/// How many 429 responses a single call tolerates before giving up.
const MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Upper bound on how long a single 429 can make us sleep.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Hard stop for member pagination on enormous guilds.
const MAX_MEMBER_PAGES: usize = 25_000;

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<u64>,
}

#[derive(Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: Option<f64>,
}

/// Bot-token authenticated client for the Discord REST API.
pub struct DiscordRestClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    limiter: RateLimiter,
}

/// A prepared call: method, path relative to the API base, the limiter bucket
/// it counts against, and optional query, body and audit-log reason.
struct Call<'a> {
    method: Method,
    path: String,
    bucket: String,
    query: Vec<(&'static str, String)>,
    body: Option<serde_json::Value>,
    reason: Option<&'a str>,
}

impl<'a> Call<'a> {
    fn new(method: Method, path: String, bucket: String) -> Self {
        Self {
            method,
            path,
            bucket,
            query: Vec::new(),
            body: None,
            reason: None,
        }
    }

    fn query(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    fn reason(mut self, reason: &'a str) -> Self {
        self.reason = Some(reason);
        self
    }
}

impl DiscordRestClient {
    pub fn new(token: &str, api_base: &str, limiter: RateLimiter) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            limiter,
        }
    }

    /// Send a call, retrying on 429, and return the successful response.
    async fn send(&self, call: &Call<'_>) -> Result<reqwest::Response, RemoteError> {
        let url = format!("{}{}", self.api_base, call.path);
        let mut attempts = 0;

        loop {
            self.limiter.acquire(&call.bucket).await;

            let mut req = self
                .http
                .request(call.method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token))
                .header("User-Agent", "DiscordBot (guild-sweeper, 0.1)");
            if !call.query.is_empty() {
                req = req.query(&call.query);
            }
            if let Some(body) = &call.body {
                req = req.json(body);
            }
            if let Some(reason) = call.reason {
                req = req.header("X-Audit-Log-Reason", reason);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| RemoteError::Transport(e.to_string()))?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                attempts += 1;
                if attempts > MAX_RATE_LIMIT_RETRIES {
                    return Err(RemoteError::RateLimited {
                        route: call.path.clone(),
                    });
                }
                let wait = retry_after(resp).await;
                warn!(route = %call.path, wait_ms = wait.as_millis() as u64, "rate limited by Discord");
                self.limiter.drain(&call.bucket);
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                return Err(error_from_response(resp).await);
            }

            debug!(method = %call.method, route = %call.path, status = status.as_u16(), "discord call");
            return Ok(resp);
        }
    }

    async fn json<T: DeserializeOwned>(&self, call: Call<'_>) -> Result<T, RemoteError> {
        self.send(&call)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Transport(format!("failed to decode {}: {e}", call.path)))
    }

    async fn empty(&self, call: Call<'_>) -> Result<(), RemoteError> {
        self.send(&call).await.map(|_| ())
    }
}

async fn retry_after(resp: reqwest::Response) -> Duration {
    let header_secs = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());
    let body_secs = resp
        .json::<RateLimitBody>()
        .await
        .ok()
        .and_then(|b| b.retry_after);
    let secs = body_secs.or(header_secs).unwrap_or(1.0).max(0.0);
    Duration::from_secs_f64(secs).min(MAX_RETRY_AFTER)
}

async fn error_from_response(resp: reqwest::Response) -> RemoteError {
    let status = resp.status();
    let body = resp.json::<ApiErrorBody>().await.ok();
    let code = body.as_ref().and_then(|b| b.code);
    let message = body
        .and_then(|b| b.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());

    if status == StatusCode::FORBIDDEN
        || matches!(code, Some(CODE_MISSING_PERMISSIONS | CODE_MISSING_ACCESS))
    {
        RemoteError::Forbidden { code, message }
    } else {
        RemoteError::Http {
            status: status.as_u16(),
            code,
            message,
        }
    }
}

fn guild_bucket(guild_id: &str) -> String {
    format!("guild:{guild_id}")
}

fn channel_bucket(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}

#[async_trait]
impl GuildClient for DiscordRestClient {
    async fn current_user(&self) -> Result<User, RemoteError> {
        self.json(Call::new(Method::GET, "/users/@me".into(), "global".into()))
            .await
    }

    async fn guild(&self, guild_id: &str) -> Result<Guild, RemoteError> {
        self.json(Call::new(
            Method::GET,
            format!("/guilds/{guild_id}"),
            guild_bucket(guild_id),
        ))
        .await
    }

    async fn guild_members(&self, guild_id: &str) -> Result<Vec<Member>, RemoteError> {
        let mut members: Vec<Member> = Vec::new();
        let mut after: Option<String> = None;

        for _ in 0..MAX_MEMBER_PAGES {
            let mut call = Call::new(
                Method::GET,
                format!("/guilds/{guild_id}/members"),
                guild_bucket(guild_id),
            )
            .query("limit", MEMBER_PAGE_LIMIT);
            if let Some(after) = &after {
                call = call.query("after", after);
            }

            let page: Vec<Member> = self.json(call).await?;
            let page_len = page.len();
            let last_id = page.last().map(|m| m.user.id.clone());
            members.extend(page);

            if page_len < MEMBER_PAGE_LIMIT {
                break;
            }
            match last_id {
                Some(id) if after.as_deref() != Some(id.as_str()) => after = Some(id),
                _ => break,
            }
        }

        debug!(guild = %guild_id, count = members.len(), "fetched guild members");
        Ok(members)
    }

    async fn guild_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<Member>, RemoteError> {
        let call = Call::new(
            Method::GET,
            format!("/guilds/{guild_id}/members/{user_id}"),
            guild_bucket(guild_id),
        );
        match self.json(call).await {
            Ok(member) => Ok(Some(member)),
            Err(RemoteError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn guild_channels(&self, guild_id: &str) -> Result<Vec<Channel>, RemoteError> {
        self.json(Call::new(
            Method::GET,
            format!("/guilds/{guild_id}/channels"),
            guild_bucket(guild_id),
        ))
        .await
    }

    async fn guild_roles(&self, guild_id: &str) -> Result<Vec<Role>, RemoteError> {
        self.json(Call::new(
            Method::GET,
            format!("/guilds/{guild_id}/roles"),
            guild_bucket(guild_id),
        ))
        .await
    }

    async fn active_threads(&self, guild_id: &str) -> Result<Vec<Channel>, RemoteError> {
        let list: ThreadList = self
            .json(Call::new(
                Method::GET,
                format!("/guilds/{guild_id}/threads/active"),
                guild_bucket(guild_id),
            ))
            .await?;
        Ok(list.threads)
    }

    async fn archived_threads(
        &self,
        channel_id: &str,
        visibility: ThreadVisibility,
    ) -> Result<Vec<Channel>, RemoteError> {
        let list: ThreadList = self
            .json(
                Call::new(
                    Method::GET,
                    format!(
                        "/channels/{channel_id}/threads/archived/{}",
                        visibility.as_str()
                    ),
                    channel_bucket(channel_id),
                )
                .query("limit", 100),
            )
            .await?;
        Ok(list.threads)
    }

    async fn channel_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u8,
    ) -> Result<Vec<Message>, RemoteError> {
        let mut call = Call::new(
            Method::GET,
            format!("/channels/{channel_id}/messages"),
            channel_bucket(channel_id),
        )
        .query("limit", limit.clamp(1, MESSAGE_PAGE_LIMIT));
        if let Some(before) = before {
            call = call.query("before", before);
        }
        self.json(call).await
    }

    async fn kick_member(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), RemoteError> {
        self.empty(
            Call::new(
                Method::DELETE,
                format!("/guilds/{guild_id}/members/{user_id}"),
                guild_bucket(guild_id),
            )
            .reason(reason),
        )
        .await
    }

    async fn delete_role(
        &self,
        guild_id: &str,
        role_id: &str,
        reason: &str,
    ) -> Result<(), RemoteError> {
        self.empty(
            Call::new(
                Method::DELETE,
                format!("/guilds/{guild_id}/roles/{role_id}"),
                guild_bucket(guild_id),
            )
            .reason(reason),
        )
        .await
    }

    async fn create_category(
        &self,
        guild_id: &str,
        name: &str,
        reason: &str,
    ) -> Result<Channel, RemoteError> {
        self.json(
            Call::new(
                Method::POST,
                format!("/guilds/{guild_id}/channels"),
                guild_bucket(guild_id),
            )
            .body(json!({ "name": name, "type": 4 }))
            .reason(reason),
        )
        .await
    }

    async fn move_channel(&self, channel_id: &str, parent_id: &str) -> Result<(), RemoteError> {
        self.empty(
            Call::new(
                Method::PATCH,
                format!("/channels/{channel_id}"),
                channel_bucket(channel_id),
            )
            .body(json!({ "parent_id": parent_id, "lock_permissions": false })),
        )
        .await
    }

    async fn delete_channel(&self, channel_id: &str, reason: &str) -> Result<(), RemoteError> {
        self.empty(
            Call::new(
                Method::DELETE,
                format!("/channels/{channel_id}"),
                channel_bucket(channel_id),
            )
            .reason(reason),
        )
        .await
    }
}
