use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use super::table::{CsvTable, MemberRow, dated_filename, render_member_csv};

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Invalid CSV filename.")]
    InvalidFilename,
    #[error("CSV file not found: {0}")]
    NotFound(String),
}

impl CsvError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    fn malformed(path: &Path, source: csv::Error) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Listing entry for `GET /api/csv-files`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CsvFileMetadata {
    pub filename: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub row_count: usize,
}

/// The directory holding every member export.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn ensure_dir(&self) -> Result<(), CsvError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CsvError::io("create", &self.dir, e))
    }

    /// Write a dated member export and return its path.
    pub async fn write_members(
        &self,
        prefix: &str,
        rows: &[MemberRow],
    ) -> Result<PathBuf, CsvError> {
        self.ensure_dir().await?;
        let path = self.dir.join(dated_filename(prefix, Local::now()));
        let contents = render_member_csv(rows).map_err(|e| CsvError::malformed(&path, e))?;
        fs::write(&path, contents)
            .await
            .map_err(|e| CsvError::io("write", &path, e))?;
        info!(path = %path.display(), rows = rows.len(), "wrote member CSV");
        Ok(path)
    }

    /// Every `.csv` file in the store, newest first.
    pub async fn list(&self) -> Result<Vec<CsvFileMetadata>, CsvError> {
        self.ensure_dir().await?;
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| CsvError::io("read", &self.dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CsvError::io("read", &self.dir, e))?
        {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !filename.ends_with(".csv") {
                continue;
            }
            let meta = entry
                .metadata()
                .await
                .map_err(|e| CsvError::io("stat", &path, e))?;
            if !meta.is_file() {
                continue;
            }
            let modified_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let row_count = read_table(&path).await?.rows.len();

            files.push(CsvFileMetadata {
                filename: filename.to_string(),
                size: meta.len(),
                modified_at,
                row_count,
            });
        }

        files.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(files)
    }

    /// Map a user-supplied filename to an existing file inside the store.
    /// A leading `csv/` or slash is tolerated; anything escaping the directory is rejected.
    pub async fn resolve(&self, filename: &str) -> Result<PathBuf, CsvError> {
        self.ensure_dir().await?;

        let trimmed = filename.trim();
        let relative = trimmed.trim_start_matches(['/', '\\']);
        let relative = relative
            .strip_prefix("csv/")
            .or_else(|| relative.strip_prefix("csv\\"))
            .unwrap_or(relative);

        let candidate = Path::new(relative);
        if relative.is_empty()
            || candidate
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(CsvError::InvalidFilename);
        }

        let path = self.dir.join(candidate);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                debug!(path = %path.display(), "resolved CSV file");
                Ok(path)
            }
            Ok(_) => Err(CsvError::NotFound(trimmed.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CsvError::NotFound(trimmed.to_string()))
            }
            Err(e) => Err(CsvError::io("stat", &path, e)),
        }
    }
}

/// Read and parse a CSV file.
pub async fn read_table(path: &Path) -> Result<CsvTable, CsvError> {
    let contents = fs::read_to_string(path)
        .await
        .map_err(|e| CsvError::io("read", path, e))?;
    CsvTable::parse(&contents).map_err(|e| CsvError::malformed(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, name: &str) -> MemberRow {
        MemberRow {
            user_id: id.into(),
            username: name.into(),
        }
    }

    #[tokio::test]
    async fn test_write_creates_directory_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path().join("nested/csv"));

        let path = store
            .write_members("users", &[row("1", "alice"), row("2", "b,ob")])
            .await
            .unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("users-"));
        assert!(name.ends_with(".csv"));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "User ID,Username\n1,alice\n2,\"b,ob\"");
    }

    #[tokio::test]
    async fn test_written_file_parses_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        let rows = vec![row("10", "Quote \"Q\" (q)"), row("11", "x, y (xy)")];
        let path = store.write_members("inactive_30d", &rows).await.unwrap();

        let table = read_table(&path).await.unwrap();
        assert_eq!(table.member_rows(), rows);
    }

    #[tokio::test]
    async fn test_list_reports_rows_and_ignores_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.csv"), "User ID,Username\n1,a\n2,b").unwrap();
        std::fs::write(tmp.path().join("empty.csv"), "User ID,Username").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir(tmp.path().join("dir.csv")).unwrap();

        let store = CsvStore::new(tmp.path());
        let mut files = store.list().await.unwrap();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "a.csv");
        assert_eq!(files[0].row_count, 2);
        assert_eq!(files[1].filename, "empty.csv");
        assert_eq!(files[1].row_count, 0);
    }

    #[tokio::test]
    async fn test_resolve_accepts_prefixed_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("users.csv"), "User ID,Username").unwrap();
        let store = CsvStore::new(tmp.path());

        assert!(store.resolve("users.csv").await.is_ok());
        assert!(store.resolve("csv/users.csv").await.is_ok());
        assert!(store.resolve("/users.csv").await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path().join("csv"));

        assert!(matches!(
            store.resolve("../secret.csv").await,
            Err(CsvError::InvalidFilename)
        ));
        assert!(matches!(
            store.resolve("csv/../../etc/passwd").await,
            Err(CsvError::InvalidFilename)
        ));
        assert!(matches!(
            store.resolve("   ").await,
            Err(CsvError::InvalidFilename)
        ));
    }

    #[tokio::test]
    async fn test_resolve_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CsvStore::new(tmp.path());
        match store.resolve("nope.csv").await {
            Err(CsvError::NotFound(name)) => assert_eq!(name, "nope.csv"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
