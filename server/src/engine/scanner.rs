use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ScanError;
use super::assembler;
use super::cancel::CheckCancelled;
use super::progress::ScanProgress;
use super::reducer::WorkingSet;
use super::resolver::{self, ChannelTarget};
use super::walker::HistoryWalker;
pub use super::walker::PageOrder;
use crate::discord::client::GuildClient;
use crate::discord::models::{Guild, Member};
use crate::discord::permissions::{MemberPermissions, READ_HISTORY};
use crate::storage::CsvStore;

/// Which channels a scan walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelection {
    /// Text channels with these names.
    Named(Vec<String>),
    /// Everything outside these categories.
    ExcludeCategories(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewLimits {
    pub members: usize,
    pub skipped: usize,
}

/// Everything that distinguishes one scan from another.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub selection: ChannelSelection,
    pub cutoff: Option<DateTime<Utc>>,
    pub order: PageOrder,
    pub include_threads: bool,
    pub ignored: HashSet<String>,
    /// Skip channels the bot cannot read instead of attempting them.
    pub check_permissions: bool,
    pub csv_prefix: String,
    pub limits: PreviewLimits,
}

/// `now` minus `days` whole days, or `None` when that falls outside the
/// representable calendar.
pub fn inactivity_cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|window| now.checked_sub_signed(window))
}

impl ScanPlan {
    /// Members who never posted in the named channels.
    pub fn zero_messages(channel_names: Vec<String>, limits: PreviewLimits) -> Self {
        Self {
            selection: ChannelSelection::Named(channel_names),
            cutoff: None,
            order: PageOrder::OldestFirst,
            include_threads: false,
            ignored: HashSet::new(),
            check_permissions: false,
            csv_prefix: "users".into(),
            limits,
        }
    }

    /// Members with no message newer than `days` days anywhere outside the
    /// excluded categories. `days` is clamped to at least 1; a window reaching
    /// past the earliest representable date counts every message.
    pub fn inactive(
        days: i64,
        excluded_categories: Vec<String>,
        ignored: HashSet<String>,
        include_threads: bool,
        limits: PreviewLimits,
    ) -> Self {
        let days = days.max(1);
        Self {
            selection: ChannelSelection::ExcludeCategories(excluded_categories),
            cutoff: Some(inactivity_cutoff(Utc::now(), days).unwrap_or(DateTime::<Utc>::MIN_UTC)),
            order: PageOrder::NewestFirst,
            include_threads,
            ignored,
            check_permissions: true,
            csv_prefix: format!("inactive_{days}d"),
            limits,
        }
    }
}

/// Outcome of one scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub guild_name: String,
    pub cutoff: Option<DateTime<Utc>>,
    pub total_members_checked: usize,
    pub total_messages_scanned: u64,
    pub members: Vec<Member>,
    pub processed_channels: Vec<String>,
    pub skipped_channels: Vec<String>,
    pub csv_path: PathBuf,
    pub preview_names: Vec<String>,
    pub more_count: usize,
    pub skipped_preview: String,
}

impl ScanReport {
    fn empty(guild_name: String, plan: &ScanPlan, checked: usize, csv_path: PathBuf) -> Self {
        Self {
            guild_name,
            cutoff: plan.cutoff,
            total_members_checked: checked,
            total_messages_scanned: 0,
            members: Vec::new(),
            processed_channels: Vec::new(),
            skipped_channels: Vec::new(),
            csv_path,
            preview_names: Vec::new(),
            more_count: 0,
            skipped_preview: String::new(),
        }
    }
}

/// Runs scan plans against one guild.
pub struct Scanner<'a> {
    pub client: &'a dyn GuildClient,
    pub guild_id: &'a str,
    pub store: &'a CsvStore,
}

impl Scanner<'_> {
    /// Confirm the guild is reachable and write a header-only export,
    /// without fetching members or channels.
    pub async fn dry_run(
        &self,
        plan: &ScanPlan,
        token: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        token.check()?;
        let guild = self.client.guild(self.guild_id).await?;
        let csv_path = self.store.write_members(&plan.csv_prefix, &[]).await?;
        info!(guild = %guild.name, path = %csv_path.display(), "dry run complete");
        Ok(ScanReport::empty(guild.name, plan, 0, csv_path))
    }

    pub async fn run(
        &self,
        plan: &ScanPlan,
        token: &CancellationToken,
        progress: &dyn ScanProgress,
    ) -> Result<ScanReport, ScanError> {
        token.check()?;
        let guild = self.client.guild(self.guild_id).await?;
        let members = self.client.guild_members(self.guild_id).await?;
        token.check()?;
        let channels = self.client.guild_channels(self.guild_id).await?;
        token.check()?;

        let candidates: Vec<&Member> = members
            .iter()
            .filter(|m| !m.is_bot() && !plan.ignored.contains(m.id()))
            .collect();
        // Members who joined after the cutoff have not had time to go quiet.
        let mut working_set = WorkingSet::new(
            candidates
                .iter()
                .filter(|m| match (plan.cutoff, m.joined_at) {
                    (Some(cutoff), Some(joined)) => joined <= cutoff,
                    _ => true,
                })
                .map(|m| m.id().to_string()),
        );
        let checked = working_set.seeded();
        progress.on_member_progress(0, checked);

        if candidates.is_empty() || working_set.is_empty() {
            let csv_path = self.store.write_members(&plan.csv_prefix, &[]).await?;
            info!(guild = %guild.name, "no members to scan");
            return Ok(ScanReport::empty(guild.name, plan, checked, csv_path));
        }

        let targets = match &plan.selection {
            ChannelSelection::Named(names) => resolver::resolve_named(&channels, names)?,
            ChannelSelection::ExcludeCategories(excluded) => {
                resolver::resolve_excluding(
                    self.client,
                    self.guild_id,
                    &channels,
                    excluded,
                    plan.include_threads,
                    token,
                )
                .await?
            }
        };
        info!(
            guild = %guild.name,
            channels = targets.len(),
            members = checked,
            "starting member scan"
        );

        let bot_permissions = if plan.check_permissions {
            self.bot_permissions(&guild).await
        } else {
            None
        };

        let walker = HistoryWalker {
            client: self.client,
            token,
            order: plan.order,
            cutoff: plan.cutoff,
        };
        let total = targets.len();
        let mut scanned: u64 = 0;
        let mut processed = Vec::new();
        let mut skipped = Vec::new();

        for (i, target) in targets.iter().enumerate() {
            token.check()?;
            let index = i + 1;

            if let Some(perms) = &bot_permissions
                && !can_read_history(perms, target)
            {
                debug!(channel = %target.name, "missing history permission");
                skipped.push(format!("{} (missing history permission)", target.name));
                continue;
            }

            progress.on_channel_start(&target.name, index, total);
            match walker
                .walk(&target.id, &mut working_set, progress, scanned)
                .await
            {
                Ok(count) => {
                    scanned += count;
                    processed.push(target.name.clone());
                }
                Err(ScanError::Remote(e)) => {
                    warn!(channel = %target.name, error = %e, "skipping channel");
                    skipped.push(e.skip_reason(&target.name));
                }
                Err(e) => return Err(e),
            }
            progress.on_channel_complete(&target.name, index, total);

            if working_set.is_empty() {
                debug!(channel = %target.name, "every member accounted for");
                break;
            }
        }

        token.check()?;
        let survivors = assembler::surviving_members(&members, &working_set);
        let rows = assembler::member_rows(&survivors);
        token.check()?;
        let csv_path = self.store.write_members(&plan.csv_prefix, &rows).await?;

        let (preview_names, more_count) =
            assembler::preview_names(&survivors, plan.limits.members);
        let skipped_preview = assembler::skipped_preview(&skipped, plan.limits.skipped);

        info!(
            guild = %guild.name,
            found = survivors.len(),
            messages = scanned,
            skipped = skipped.len(),
            "member scan complete"
        );

        Ok(ScanReport {
            guild_name: guild.name,
            cutoff: plan.cutoff,
            total_members_checked: checked,
            total_messages_scanned: scanned,
            members: survivors,
            processed_channels: processed,
            skipped_channels: skipped,
            csv_path,
            preview_names,
            more_count,
            skipped_preview,
        })
    }

    /// The bot's standing in the guild, or `None` when it cannot be resolved.
    async fn bot_permissions(&self, guild: &Guild) -> Option<MemberPermissions> {
        let me = self.client.current_user().await.ok()?;
        let member = self
            .client
            .guild_member(self.guild_id, &me.id)
            .await
            .ok()
            .flatten()?;
        let roles = self.client.guild_roles(self.guild_id).await.ok()?;
        Some(MemberPermissions::resolve(guild, &roles, &member))
    }
}

fn can_read_history(perms: &MemberPermissions, target: &ChannelTarget) -> bool {
    perms
        .in_channel(&target.permission_overwrites)
        .contains(READ_HISTORY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::progress::NoProgress;
    use crate::storage::read_table;
    use crate::test_support::*;

    const VIEW: u64 = 1 << 10;
    const HISTORY: u64 = 1 << 16;

    fn limits() -> PreviewLimits {
        PreviewLimits {
            members: 20,
            skipped: 5,
        }
    }

    fn scanner<'a>(fake: &'a FakeGuild, store: &'a CsvStore) -> Scanner<'a> {
        Scanner {
            client: fake,
            guild_id: GUILD_ID,
            store,
        }
    }

    #[tokio::test]
    async fn test_zero_message_scan_reports_silent_members() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let fake = FakeGuild::new("Test Guild");
        fake.add_member(member("100", "alice"));
        fake.add_member(member("101", "bob"));
        fake.add_member(bot_member("102", "helper"));
        fake.add_channel(text_channel("10", "general", None));
        fake.add_message("10", message_at(1_000, &user("100", "alice", false), Utc::now()));

        let token = CancellationToken::new();
        let plan = ScanPlan::zero_messages(vec!["general".into()], limits());
        let report = scanner(&fake, &store)
            .run(&plan, &token, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.guild_name, "Test Guild");
        assert_eq!(report.total_members_checked, 2);
        assert_eq!(report.total_messages_scanned, 1);
        assert_eq!(report.preview_names, vec!["bob"]);
        assert_eq!(report.processed_channels, vec!["general"]);
        let table = read_table(&report.csv_path).await.unwrap();
        assert_eq!(table.value(0, "User ID"), "101");
    }

    #[tokio::test]
    async fn test_dry_run_skips_member_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let fake = FakeGuild::new("Test Guild");
        fake.add_member(member("100", "alice"));

        let token = CancellationToken::new();
        let plan = ScanPlan::zero_messages(vec!["general".into()], limits());
        let report = scanner(&fake, &store).dry_run(&plan, &token).await.unwrap();

        assert_eq!(report.total_members_checked, 0);
        assert!(report.members.is_empty());
        let contents = std::fs::read_to_string(&report.csv_path).unwrap();
        assert_eq!(contents, "User ID,Username");
        assert!(fake.history_fetches().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_channel_names_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let fake = FakeGuild::new("g");
        fake.add_member(member("100", "alice"));
        fake.add_channel(text_channel("10", "general", None));

        let token = CancellationToken::new();
        let plan = ScanPlan::zero_messages(vec!["nope".into()], limits());
        let err = scanner(&fake, &store)
            .run(&plan, &token, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NoMatchingChannels));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_no_members_writes_empty_export() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let fake = FakeGuild::new("g");
        fake.add_member(bot_member("102", "helper"));

        let token = CancellationToken::new();
        let plan = ScanPlan::zero_messages(vec!["general".into()], limits());
        let report = scanner(&fake, &store)
            .run(&plan, &token, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.total_members_checked, 0);
        assert!(report.processed_channels.is_empty());
        assert!(report.csv_path.exists());
    }

    #[tokio::test]
    async fn test_inactive_plan_shape() {
        let plan = ScanPlan::inactive(0, vec![], HashSet::new(), true, limits());
        assert_eq!(plan.csv_prefix, "inactive_1d");
        assert_eq!(plan.order, PageOrder::NewestFirst);
        assert!(plan.check_permissions);
        let cutoff = plan.cutoff.unwrap();
        let age = Utc::now() - cutoff;
        assert!(age >= Duration::hours(23) && age <= Duration::hours(25));
    }

    #[test]
    fn test_inactivity_cutoff_out_of_range() {
        let now = Utc::now();
        assert_eq!(inactivity_cutoff(now, 2), Some(now - Duration::days(2)));
        assert_eq!(inactivity_cutoff(now, 1_000_000_000), None);
        assert_eq!(inactivity_cutoff(now, i64::MAX), None);
    }

    #[test]
    fn test_inactive_plan_with_huge_window_counts_everything() {
        let plan = ScanPlan::inactive(1_000_000_000, vec![], HashSet::new(), true, limits());
        assert_eq!(plan.cutoff, Some(DateTime::<Utc>::MIN_UTC));
        assert_eq!(plan.csv_prefix, "inactive_1000000000d");
    }

    #[tokio::test]
    async fn test_inactive_scan_honours_ignore_list() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let fake = FakeGuild::new("g");
        fake.add_member(member("100", "alice"));
        fake.add_member(member("101", "bob"));
        fake.add_channel(text_channel("10", "general", None));

        let token = CancellationToken::new();
        let ignored: HashSet<String> = ["101".to_string()].into();
        let plan = ScanPlan::inactive(30, vec![], ignored, false, limits());
        let report = scanner(&fake, &store)
            .run(&plan, &token, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.total_members_checked, 1);
        assert_eq!(report.preview_names, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_missing_history_permission_skips_without_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let fake = FakeGuild::new("g");
        fake.add_role(role(GUILD_ID, "@everyone", 0, VIEW | HISTORY));
        fake.add_bot_member(&[]);
        fake.add_member(member("100", "alice"));
        let mut secret = text_channel("10", "secret", None);
        secret.permission_overwrites = vec![deny_everyone(HISTORY)];
        fake.add_channel(secret);
        fake.add_channel(text_channel("11", "general", None));

        let token = CancellationToken::new();
        let plan = ScanPlan::inactive(30, vec![], HashSet::new(), false, limits());
        let report = scanner(&fake, &store)
            .run(&plan, &token, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.skipped_channels, vec!["secret (missing history permission)"]);
        assert_eq!(report.processed_channels, vec!["general"]);
        assert_eq!(fake.fetched_channels(), vec!["11"]);
    }

    #[tokio::test]
    async fn test_unresolvable_bot_member_passes_permission_check() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let fake = FakeGuild::new("g");
        fake.add_member(member("100", "alice"));
        let mut secret = text_channel("10", "secret", None);
        secret.permission_overwrites = vec![deny_everyone(HISTORY)];
        fake.add_channel(secret);

        let token = CancellationToken::new();
        let plan = ScanPlan::inactive(30, vec![], HashSet::new(), false, limits());
        let report = scanner(&fake, &store)
            .run(&plan, &token, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.processed_channels, vec!["secret"]);
    }

    #[tokio::test]
    async fn test_http_error_recorded_as_skip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let fake = FakeGuild::new("g");
        fake.add_member(member("100", "alice"));
        fake.add_channel(text_channel("10", "broken", None));
        fake.add_channel(text_channel("11", "general", None));
        fake.fail_channel("10", "Internal Server Error");

        let token = CancellationToken::new();
        let plan = ScanPlan::zero_messages(vec!["broken".into(), "general".into()], limits());
        let report = scanner(&fake, &store)
            .run(&plan, &token, &NoProgress)
            .await
            .unwrap();
        assert_eq!(
            report.skipped_channels,
            vec!["broken (HTTP error: Internal Server Error)"]
        );
        assert_eq!(report.skipped_preview, "broken (HTTP error: Internal Server Error)");
        assert_eq!(report.processed_channels, vec!["general"]);
    }
}
