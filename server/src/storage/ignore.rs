use std::collections::HashSet;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use super::table::USER_ID_HEADER;
use super::files::read_table;

/// Collect member ids that must never be reported or kicked.
///
/// Every `*.csv` file directly inside `dir` is read and its `User ID` column
/// gathered. A missing directory yields an empty set; unreadable files are
/// skipped.
pub async fn load_ignored_ids(dir: &Path) -> HashSet<String> {
    let mut ignored = HashSet::new();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "no ignore directory");
            return ignored;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to list ignore directory");
                break;
            }
        };

        let path = entry.path();
        let is_csv = path.extension().is_some_and(|ext| ext == "csv");
        let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
        if !is_csv || !is_file {
            continue;
        }

        match read_table(&path).await {
            Ok(table) => {
                for row in 0..table.rows.len() {
                    let id = table.value(row, USER_ID_HEADER).trim();
                    if !id.is_empty() {
                        ignored.insert(id.to_string());
                    }
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable ignore file"),
        }
    }

    debug!(count = ignored.len(), "loaded ignored member ids");
    ignored
}
