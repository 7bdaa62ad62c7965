use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use super::CleanupError;
use crate::discord::client::GuildClient;
use crate::discord::models::Role;

pub const ROLE_PREVIEW_LIMIT: usize = 10;
pub const DELETE_ROLE_REASON: &str = "Guild Sweeper: remove empty role";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleCleanupReport {
    pub guild_name: String,
    pub total_roles: usize,
    pub deletable_role_count: usize,
    pub deleted_role_count: usize,
    pub preview_names: Vec<String>,
    pub more_count: usize,
    pub failures: Vec<String>,
}

/// Roles nobody holds, excluding `@everyone` and integration-managed roles,
/// sorted by name.
pub fn deletable_roles<'r>(
    guild_id: &str,
    roles: &'r [Role],
    holders: &HashMap<&str, usize>,
) -> Vec<&'r Role> {
    let mut deletable: Vec<&Role> = roles
        .iter()
        .filter(|r| r.id != guild_id && !r.managed)
        .filter(|r| holders.get(r.id.as_str()).copied().unwrap_or(0) == 0)
        .collect();
    deletable.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    deletable
}

/// Find roles with no members and, unless `dry_run`, delete them.
pub async fn cleanup_empty_roles(
    client: &dyn GuildClient,
    guild_id: &str,
    dry_run: bool,
) -> Result<RoleCleanupReport, CleanupError> {
    let guild = client.guild(guild_id).await?;
    let members = client.guild_members(guild_id).await?;
    let roles = client.guild_roles(guild_id).await?;

    let mut holders: HashMap<&str, usize> = HashMap::new();
    for member in &members {
        for role_id in &member.roles {
            *holders.entry(role_id.as_str()).or_default() += 1;
        }
    }

    let deletable = deletable_roles(guild_id, &roles, &holders);
    let preview_names: Vec<String> = deletable
        .iter()
        .take(ROLE_PREVIEW_LIMIT)
        .map(|r| r.name.clone())
        .collect();
    let more_count = deletable.len().saturating_sub(preview_names.len());

    let mut deleted = 0;
    let mut failures = Vec::new();
    if !dry_run {
        for role in &deletable {
            match client.delete_role(guild_id, &role.id, DELETE_ROLE_REASON).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(role = %role.name, error = %e, "role deletion failed");
                    failures.push(format!("{}: {e}", role.name));
                }
            }
        }
    }

    info!(
        guild = %guild.name,
        dry_run,
        deletable = deletable.len(),
        deleted,
        "role cleanup finished"
    );

    Ok(RoleCleanupReport {
        guild_name: guild.name,
        total_roles: roles.len(),
        deletable_role_count: deletable.len(),
        deleted_role_count: deleted,
        preview_names,
        more_count,
        failures,
    })
}
