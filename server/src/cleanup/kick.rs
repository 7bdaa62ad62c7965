use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::CleanupError;
use crate::discord::client::{GuildClient, RemoteError};
use crate::discord::models::{Guild, Member, Role};
use crate::discord::permissions::{MemberPermissions, Permissions};
use crate::engine::CheckCancelled;
use crate::storage::table::{USER_ID_HEADER, USERNAME_HEADER};
use crate::storage::{CsvStore, load_ignored_ids, read_table};

pub const KICK_REASON: &str = "Kicked due to inactivity";
pub const KICK_DELAY: Duration = Duration::from_secs(1);

/// Per-file outcome of a kick job.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KickFileResult {
    pub filename: String,
    pub dry_run: bool,
    pub total_rows: usize,
    pub matched_users: usize,
    pub attempted_kicks: usize,
    pub successful_kicks: usize,
    pub failures: Vec<String>,
}

/// Export names carry a legacy `#0` suffix on accounts without a discriminator.
pub fn normalize_username(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed.strip_suffix("#0").unwrap_or(trimmed)
}

struct Matched {
    user_id: String,
    username: String,
}

/// Kicks the members listed in exported CSVs after re-verifying each row
/// against the live guild.
pub struct KickJob<'a> {
    pub client: &'a dyn GuildClient,
    pub guild_id: &'a str,
    pub store: &'a CsvStore,
    pub ignore_dir: &'a Path,
    /// Pause between consecutive kicks.
    pub delay: Duration,
}

impl KickJob<'_> {
    pub async fn run(
        &self,
        filenames: &[String],
        dry_run: bool,
        token: &CancellationToken,
    ) -> Result<Vec<KickFileResult>, CleanupError> {
        if filenames.is_empty() {
            return Err(CleanupError::NoFilenames);
        }

        let guild = self.client.guild(self.guild_id).await?;
        let roles = self.client.guild_roles(self.guild_id).await?;
        let me = self.client.current_user().await?;
        let bot = self
            .client
            .guild_member(self.guild_id, &me.id)
            .await?
            .map(|m| MemberPermissions::resolve(&guild, &roles, &m))
            .filter(|p| p.guild_level().contains(Permissions::KICK_MEMBERS))
            .ok_or(CleanupError::MissingKickPermission)?;

        let ignored = load_ignored_ids(self.ignore_dir).await;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for filename in filenames {
            if !seen.insert(filename.as_str()) {
                continue;
            }
            token.check()?;
            let result = self
                .process_file(filename, dry_run, &guild, &roles, &bot, &ignored, token)
                .await?;
            info!(
                file = %filename,
                dry_run,
                matched = result.matched_users,
                kicked = result.successful_kicks,
                failures = result.failures.len(),
                "processed kick file"
            );
            results.push(result);
        }
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_file(
        &self,
        filename: &str,
        dry_run: bool,
        guild: &Guild,
        roles: &[Role],
        bot: &MemberPermissions,
        ignored: &HashSet<String>,
        token: &CancellationToken,
    ) -> Result<KickFileResult, CleanupError> {
        let path = self.store.resolve(filename).await?;
        let table = read_table(&path).await?;

        let mut result = KickFileResult {
            filename: filename.to_string(),
            dry_run,
            total_rows: table.rows.len(),
            matched_users: 0,
            attempted_kicks: 0,
            successful_kicks: 0,
            failures: Vec::new(),
        };

        let mut matched = Vec::new();
        for row in 0..table.rows.len() {
            token.check()?;
            let line = row + 2;
            let user_id = table.value(row, USER_ID_HEADER).trim();
            let username = table.value(row, USERNAME_HEADER).trim();
            if user_id.is_empty() || username.is_empty() {
                result.failures.push(format!("Row {line}: Missing user data."));
                continue;
            }
            if ignored.contains(user_id) {
                continue;
            }

            match self.verify_row(user_id, username, guild, roles, bot).await {
                Ok(entry) => matched.push(entry),
                Err(reason) => result.failures.push(format!("Row {line}: {reason}")),
            }
        }

        result.matched_users = matched.len();
        result.attempted_kicks = matched.len();
        if dry_run {
            return Ok(result);
        }

        let total = matched.len();
        for (i, entry) in matched.iter().enumerate() {
            token.check()?;
            let n = i + 1;
            match self.kick_and_verify(&entry.user_id).await {
                Ok(true) => result.successful_kicks += 1,
                Ok(false) => result.failures.push(format!(
                    "Kick {n}/{total} for {} ({}) reported success but user is still in the guild.",
                    entry.username, entry.user_id
                )),
                Err(e) => {
                    warn!(user = %entry.user_id, error = %e, "kick failed");
                    result.failures.push(format!(
                        "Kick {n}/{total} failed for {} ({}): {e}",
                        entry.username, entry.user_id
                    ));
                }
            }

            if n < total {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = token.cancelled() => {}
                }
            }
        }

        Ok(result)
    }

    /// Check one CSV row against the live member. `Err` carries the failure text.
    async fn verify_row(
        &self,
        user_id: &str,
        username: &str,
        guild: &Guild,
        roles: &[Role],
        bot: &MemberPermissions,
    ) -> Result<Matched, String> {
        let member: Member = match self.client.guild_member(self.guild_id, user_id).await {
            Ok(Some(member)) => member,
            Ok(None) => return Err(format!("User ID {user_id} not found in this guild.")),
            Err(e) if e.is_unknown_member() => {
                return Err(format!("User ID {user_id} not found in this guild."));
            }
            Err(e) => return Err(format!("Failed to fetch user {user_id}: {e}")),
        };

        let expected = normalize_username(username);
        let formatted = member.formatted_name();
        let actual = normalize_username(&formatted);
        if actual != expected {
            return Err(format!(
                "Username mismatch (expected {expected}, got {actual})."
            ));
        }

        let target = MemberPermissions::resolve(guild, roles, &member);
        if !bot.outranks(&target) {
            return Err(format!(
                "Cannot kick {actual} due to role hierarchy or missing permission."
            ));
        }

        Ok(Matched {
            user_id: user_id.to_string(),
            username: actual.to_string(),
        })
    }

    /// Kick, then confirm the member is gone. `Ok(false)` when they are still listed.
    async fn kick_and_verify(&self, user_id: &str) -> Result<bool, RemoteError> {
        self.client
            .kick_member(self.guild_id, user_id, KICK_REASON)
            .await?;
        match self.client.guild_member(self.guild_id, user_id).await {
            Ok(still_there) => Ok(still_there.is_none()),
            Err(e) if e.is_unknown_member() => Ok(true),
            Err(e) => Err(e),
        }
    }
}
