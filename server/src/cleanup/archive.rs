use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::CleanupError;
use crate::discord::client::GuildClient;
use crate::discord::models::{Channel, ChannelKind, Guild};
use crate::discord::permissions::{MemberPermissions, Permissions};
use crate::engine::resolver::normalize_names;
use crate::engine::scanner::inactivity_cutoff;

pub const ARCHIVE_CATEGORY_NAME: &str = "🗄️ Archived";
const ARCHIVE_REASON: &str = "Guild Sweeper: archive inactive channels";
const DELETE_REASON: &str = "Guild Sweeper: delete inactive channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveAction {
    #[default]
    Archive,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub days: i64,
    pub dry_run: bool,
    pub channel_ids: Vec<String>,
    pub action: ArchiveAction,
    pub excluded_categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedChannelSummary {
    pub id: String,
    pub name: String,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub inactive_channels: Vec<ArchivedChannelSummary>,
    pub processed_count: usize,
    pub archive_category_id: Option<String>,
    pub action: ArchiveAction,
    pub failures: Vec<String>,
}

fn archive_category(channels: &[Channel]) -> Option<&Channel> {
    channels
        .iter()
        .find(|c| c.kind == ChannelKind::Category && c.name == ARCHIVE_CATEGORY_NAME)
}

/// Dry run: list stale text channels. Live run: archive or delete the
/// selected ones.
pub async fn archive_inactive_channels(
    client: &dyn GuildClient,
    guild_id: &str,
    request: &ArchiveRequest,
) -> Result<ArchiveReport, CleanupError> {
    let threshold = match inactivity_cutoff(Utc::now(), request.days) {
        Some(threshold) if request.days > 0 => threshold,
        _ => return Err(CleanupError::InvalidDays),
    };
    if !request.dry_run && request.channel_ids.is_empty() {
        return Err(CleanupError::NoChannelsSelected);
    }

    let guild = client.guild(guild_id).await?;
    let channels = client.guild_channels(guild_id).await?;

    if request.dry_run {
        let inactive_channels = find_inactive_channels(client, &guild, &channels, request, threshold).await;
        let archive_category_id = match request.action {
            ArchiveAction::Archive => archive_category(&channels).map(|c| c.id.clone()),
            ArchiveAction::Delete => None,
        };
        info!(guild = %guild.name, found = inactive_channels.len(), "inactive channel preview");
        return Ok(ArchiveReport {
            inactive_channels,
            processed_count: 0,
            archive_category_id,
            action: request.action,
            failures: Vec::new(),
        });
    }

    let archive_category_id = match request.action {
        ArchiveAction::Archive => Some(match archive_category(&channels) {
            Some(existing) => existing.id.clone(),
            None => {
                client
                    .create_category(guild_id, ARCHIVE_CATEGORY_NAME, ARCHIVE_REASON)
                    .await?
                    .id
            }
        }),
        ArchiveAction::Delete => None,
    };

    let mut processed = 0;
    let mut failures = Vec::new();
    for channel_id in &request.channel_ids {
        let Some(channel) = channels
            .iter()
            .find(|c| &c.id == channel_id && c.kind == ChannelKind::Text)
        else {
            failures.push(format!("{channel_id}: Channel not found or not a text channel."));
            continue;
        };

        let outcome = match (&archive_category_id, request.action) {
            (Some(category_id), ArchiveAction::Archive) => {
                if channel.parent_id.as_ref() == Some(category_id) {
                    continue;
                }
                client.move_channel(&channel.id, category_id).await
            }
            _ => client.delete_channel(&channel.id, DELETE_REASON).await,
        };
        match outcome {
            Ok(()) => processed += 1,
            Err(e) => {
                warn!(channel = %channel.name, error = %e, "channel cleanup failed");
                failures.push(format!("{channel_id}: {e}"));
            }
        }
    }

    info!(
        guild = %guild.name,
        action = ?request.action,
        processed,
        failures = failures.len(),
        "inactive channel cleanup finished"
    );

    Ok(ArchiveReport {
        inactive_channels: Vec::new(),
        processed_count: processed,
        archive_category_id,
        action: request.action,
        failures,
    })
}

async fn bot_permissions(client: &dyn GuildClient, guild: &Guild) -> Option<MemberPermissions> {
    let me = client.current_user().await.ok()?;
    let member = client.guild_member(&guild.id, &me.id).await.ok().flatten()?;
    let roles = client.guild_roles(&guild.id).await.ok()?;
    Some(MemberPermissions::resolve(guild, &roles, &member))
}

/// Text channels outside excluded categories (and outside the archive
/// category) whose newest message, or creation time when empty, predates the
/// threshold and that the bot can view. Sorted by name.
async fn find_inactive_channels(
    client: &dyn GuildClient,
    guild: &Guild,
    channels: &[Channel],
    request: &ArchiveRequest,
    threshold: DateTime<Utc>,
) -> Vec<ArchivedChannelSummary> {
    let excluded = normalize_names(&request.excluded_categories);
    let archive_name = ARCHIVE_CATEGORY_NAME.to_lowercase();
    let bot = bot_permissions(client, guild).await;

    let mut summaries = Vec::new();
    for channel in channels.iter().filter(|c| c.kind == ChannelKind::Text) {
        let parent = channel
            .parent_id
            .as_deref()
            .and_then(|id| channels.iter().find(|c| c.id == id))
            .map(|p| p.name.to_lowercase());
        if parent
            .as_ref()
            .is_some_and(|p| excluded.contains(p) || *p == archive_name)
        {
            continue;
        }

        let last_message_at = match client.channel_messages(&channel.id, None, 1).await {
            Ok(page) => page.first().map(|m| m.timestamp),
            Err(e) => {
                debug!(channel = %channel.name, error = %e, "could not read latest message");
                None
            }
        };
        let Some(effective) = last_message_at.or_else(|| channel.created_at()) else {
            continue;
        };

        let viewable = bot.as_ref().is_none_or(|b| {
            b.in_channel(&channel.permission_overwrites)
                .contains(Permissions::VIEW_CHANNEL)
        });
        if effective < threshold && viewable {
            summaries.push(ArchivedChannelSummary {
                id: channel.id.clone(),
                name: channel.name.clone(),
                last_message_at,
            });
        }
    }

    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    summaries
}
