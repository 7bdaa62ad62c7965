use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::ScanError;
use super::cancel::CheckCancelled;
use super::progress::ScanProgress;
use super::reducer::WorkingSet;
use crate::discord::client::{GuildClient, MESSAGE_PAGE_LIMIT};
use crate::discord::models::{Message, snowflake_key};

/// Order in which a fetched page is replayed into the reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrder {
    OldestFirst,
    NewestFirst,
}

impl PageOrder {
    /// Timestamp order, ties broken by id.
    fn sort(self, page: &mut [Message]) {
        page.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| snowflake_key(&a.id).cmp(&snowflake_key(&b.id)))
        });
        if self == Self::NewestFirst {
            page.reverse();
        }
    }
}

/// Pages one channel's history backwards, feeding non-bot authors into the
/// working set.
pub struct HistoryWalker<'a> {
    pub client: &'a dyn GuildClient,
    pub token: &'a CancellationToken,
    pub order: PageOrder,
    /// Messages strictly older than this end the walk.
    pub cutoff: Option<DateTime<Utc>>,
}

impl HistoryWalker<'_> {
    /// Walk `channel_id` and return how many messages were counted.
    ///
    /// `scanned_before` is the scan-wide total so far, used only for
    /// progress reporting. Remote failures come back as [`ScanError::Remote`]
    /// and concern this channel alone.
    pub async fn walk(
        &self,
        channel_id: &str,
        working_set: &mut WorkingSet,
        progress: &dyn ScanProgress,
        scanned_before: u64,
    ) -> Result<u64, ScanError> {
        let mut total: u64 = 0;
        let mut before: Option<String> = None;

        loop {
            self.token.check()?;
            let mut page = self
                .client
                .channel_messages(channel_id, before.as_deref(), MESSAGE_PAGE_LIMIT)
                .await?;
            if page.is_empty() {
                break;
            }

            // Cursor for the next page is the smallest id on this one, so
            // messages sharing a timestamp are never fetched twice.
            let oldest = page
                .iter()
                .min_by(|a, b| snowflake_key(&a.id).cmp(&snowflake_key(&b.id)))
                .map(|m| m.id.clone());
            self.order.sort(&mut page);

            let mut reached_cutoff = false;
            for message in &page {
                self.token.check()?;
                if self.cutoff.is_some_and(|cutoff| message.timestamp < cutoff) {
                    reached_cutoff = true;
                    break;
                }

                total += 1;
                if message.author.bot {
                    continue;
                }
                if working_set.observe(&message.author.id) {
                    progress.on_member_progress(working_set.accounted(), working_set.seeded());
                }
                if working_set.is_empty() {
                    break;
                }
            }
            progress.on_message_progress(scanned_before + total);

            if working_set.is_empty() || reached_cutoff {
                break;
            }
            before = oldest;
        }

        Ok(total)
    }
}
