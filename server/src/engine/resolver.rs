use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ScanError;
use super::cancel::CheckCancelled;
use crate::discord::client::GuildClient;
use crate::discord::models::{Channel, ChannelKind, PermissionOverwrite, ThreadVisibility};

/// A channel or thread the scanner will walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    /// Lowercased name of the enclosing category, if any.
    pub category: Option<String>,
    /// Overwrites deciding access: the channel's own, or the parent's for a thread.
    pub permission_overwrites: Vec<PermissionOverwrite>,
}

/// Lowercase, trim and drop empty entries.
pub fn normalize_names<S: AsRef<str>>(names: &[S]) -> HashSet<String> {
    names
        .iter()
        .map(|n| n.as_ref().trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect()
}

/// Guild channel snapshot indexed by id.
pub struct GuildSnapshot<'a> {
    channels: &'a [Channel],
    by_id: HashMap<&'a str, &'a Channel>,
}

impl<'a> GuildSnapshot<'a> {
    pub fn new(channels: &'a [Channel]) -> Self {
        Self {
            channels,
            by_id: channels.iter().map(|c| (c.id.as_str(), c)).collect(),
        }
    }

    fn parent(&self, channel: &Channel) -> Option<&'a Channel> {
        channel
            .parent_id
            .as_deref()
            .and_then(|id| self.by_id.get(id).copied())
    }

    /// Name of the immediate category, or of the grandparent category when the
    /// parent is a regular channel (threads).
    pub fn category_name(&self, channel: &Channel) -> Option<String> {
        let parent = self.parent(channel)?;
        if parent.kind == ChannelKind::Category {
            return Some(parent.name.to_lowercase());
        }
        self.parent(parent)
            .filter(|g| g.kind == ChannelKind::Category)
            .map(|g| g.name.to_lowercase())
    }

    fn target(&self, channel: &Channel) -> ChannelTarget {
        let permission_overwrites = if channel.kind.is_thread() {
            self.parent(channel)
                .map(|p| p.permission_overwrites.clone())
                .unwrap_or_default()
        } else {
            channel.permission_overwrites.clone()
        };
        ChannelTarget {
            id: channel.id.clone(),
            name: channel.name.clone(),
            kind: channel.kind,
            category: self.category_name(channel),
            permission_overwrites,
        }
    }
}

/// Text channels whose lowercased name was requested, in snapshot order.
/// Names that match nothing are dropped.
pub fn resolve_named<S: AsRef<str>>(
    channels: &[Channel],
    names: &[S],
) -> Result<Vec<ChannelTarget>, ScanError> {
    let wanted = normalize_names(names);
    let snapshot = GuildSnapshot::new(channels);
    let targets: Vec<ChannelTarget> = channels
        .iter()
        .filter(|c| c.kind == ChannelKind::Text && wanted.contains(&c.name.to_lowercase()))
        .map(|c| snapshot.target(c))
        .collect();

    if targets.is_empty() {
        return Err(ScanError::NoMatchingChannels);
    }
    Ok(targets)
}

struct Collector<'s, 'a> {
    snapshot: &'s GuildSnapshot<'a>,
    excluded: &'s HashSet<String>,
    seen: HashSet<String>,
    targets: Vec<ChannelTarget>,
}

impl Collector<'_, '_> {
    fn consider(&mut self, channel: &Channel) {
        if !channel.kind.supports_history() {
            return;
        }
        let target = self.snapshot.target(channel);
        if target
            .category
            .as_ref()
            .is_some_and(|c| self.excluded.contains(c))
        {
            return;
        }
        if self.seen.insert(target.id.clone()) {
            self.targets.push(target);
        }
    }
}

/// Every history-capable channel outside the excluded categories, followed
/// per parent by its active, public archived and private archived threads.
/// Guild-wide active threads not yet seen come last.
pub async fn resolve_excluding<S: AsRef<str>>(
    client: &dyn GuildClient,
    guild_id: &str,
    channels: &[Channel],
    excluded_categories: &[S],
    include_threads: bool,
    token: &CancellationToken,
) -> Result<Vec<ChannelTarget>, ScanError> {
    let excluded = normalize_names(excluded_categories);
    let snapshot = GuildSnapshot::new(channels);

    let active_threads = if include_threads {
        match client.active_threads(guild_id).await {
            Ok(threads) => threads,
            Err(e) => {
                debug!(guild = %guild_id, error = %e, "active thread listing failed");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };
    token.check()?;

    let mut collector = Collector {
        snapshot: &snapshot,
        excluded: &excluded,
        seen: HashSet::new(),
        targets: Vec::new(),
    };

    for channel in snapshot.channels {
        collector.consider(channel);

        if !include_threads || !channel.kind.supports_threads() {
            continue;
        }

        for thread in active_threads
            .iter()
            .filter(|t| t.parent_id.as_deref() == Some(channel.id.as_str()))
        {
            collector.consider(thread);
        }

        for visibility in [ThreadVisibility::Public, ThreadVisibility::Private] {
            token.check()?;
            match client.archived_threads(&channel.id, visibility).await {
                Ok(threads) => threads.iter().for_each(|t| collector.consider(t)),
                Err(e) => debug!(
                    channel = %channel.name,
                    visibility = visibility.as_str(),
                    error = %e,
                    "archived thread listing failed"
                ),
            }
        }
    }

    for thread in &active_threads {
        collector.consider(thread);
    }

    if collector.targets.is_empty() {
        return Err(ScanError::NoEligibleChannels);
    }
    Ok(collector.targets)
}
