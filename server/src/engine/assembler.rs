use std::cmp::Ordering;

use super::reducer::WorkingSet;
use crate::discord::models::Member;
use crate::storage::MemberRow;

/// Members still in the working set, sorted by formatted name then id.
/// Ids that no longer resolve to a member are dropped.
pub fn surviving_members(members: &[Member], working_set: &WorkingSet) -> Vec<Member> {
    let mut survivors: Vec<(String, &Member)> = members
        .iter()
        .filter(|m| working_set.contains(m.id()))
        .map(|m| (m.formatted_name(), m))
        .collect();
    survivors.sort_by(|(a_name, a), (b_name, b)| match a_name.cmp(b_name) {
        Ordering::Equal => a.id().cmp(b.id()),
        other => other,
    });
    survivors.dedup_by(|(_, a), (_, b)| a.id() == b.id());
    survivors.into_iter().map(|(_, m)| m.clone()).collect()
}

pub fn member_rows(members: &[Member]) -> Vec<MemberRow> {
    members
        .iter()
        .map(|m| MemberRow {
            user_id: m.id().to_string(),
            username: m.formatted_name(),
        })
        .collect()
}

/// First `limit` formatted names and how many were left out.
pub fn preview_names(members: &[Member], limit: usize) -> (Vec<String>, usize) {
    let shown: Vec<String> = members
        .iter()
        .take(limit)
        .map(Member::formatted_name)
        .collect();
    let more = members.len().saturating_sub(shown.len());
    (shown, more)
}

/// First `limit` skip reasons joined with `, `, plus `, +K more` when truncated.
pub fn skipped_preview(skipped: &[String], limit: usize) -> String {
    let mut preview = skipped
        .iter()
        .take(limit)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if skipped.len() > limit {
        preview.push_str(&format!(", +{} more", skipped.len() - limit));
    }
    preview
}
