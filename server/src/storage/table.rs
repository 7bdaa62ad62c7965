use chrono::{DateTime, Local};

/// Column headers shared by every member export and the kick/ignore readers.
pub const USER_ID_HEADER: &str = "User ID";
pub const USERNAME_HEADER: &str = "Username";

/// One exported member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRow {
    pub user_id: String,
    pub username: String,
}

/// Render the two-column member export. Cells are quoted only when they hold
/// a comma, a quote or a line break; rows end in `\n` and the file carries no
/// trailing newline.
pub fn render_member_csv(rows: &[MemberRow]) -> csv::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record([USER_ID_HEADER, USERNAME_HEADER])?;
    for row in rows {
        writer.write_record([row.user_id.as_str(), row.username.as_str()])?;
    }
    let mut bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `<prefix>-<YYYYMMDD>-<HHMMSS>.csv` in local wall-clock time.
pub fn dated_filename(prefix: &str, now: DateTime<Local>) -> String {
    format!("{prefix}-{}.csv", now.format("%Y%m%d-%H%M%S"))
}

/// A parsed CSV file: the header row plus data rows. Blank lines are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Parse RFC 4180 text. Rows may be ragged, and rows whose cells are all
    /// blank are dropped.
    pub fn parse(contents: &str) -> csv::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(contents.as_bytes());
        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Cell value for `header` in data row `row`, or `""` when missing.
    pub fn value(&self, row: usize, header: &str) -> &str {
        self.column(header)
            .and_then(|col| self.rows.get(row)?.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Rows of a member export, with cells trimmed.
    pub fn member_rows(&self) -> Vec<MemberRow> {
        (0..self.rows.len())
            .map(|i| MemberRow {
                user_id: self.value(i, USER_ID_HEADER).trim().to_string(),
                username: self.value(i, USERNAME_HEADER).trim().to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(id: &str, name: &str) -> MemberRow {
        MemberRow {
            user_id: id.into(),
            username: name.into(),
        }
    }

    #[test]
    fn test_render_header_only() {
        assert_eq!(render_member_csv(&[]).unwrap(), "User ID,Username");
    }

    #[test]
    fn test_render_rows_without_trailing_newline() {
        let csv = render_member_csv(&[row("1", "alice"), row("2", "Bob, Jr. (bob)")]).unwrap();
        assert_eq!(csv, "User ID,Username\n1,alice\n2,\"Bob, Jr. (bob)\"");
    }

    #[test]
    fn test_render_quotes_only_when_needed() {
        let csv = render_member_csv(&[
            row("1", "say \"hi\""),
            row("2", "two\nlines"),
            row("3", "spaced out"),
        ])
        .unwrap();
        assert_eq!(
            csv,
            "User ID,Username\n1,\"say \"\"hi\"\"\"\n2,\"two\nlines\"\n3,spaced out"
        );
    }

    #[test]
    fn test_round_trip_with_awkward_names() {
        let rows = vec![
            row("1", "plain"),
            row("2", "comma, inside"),
            row("3", "quote \"inside\""),
            row("4", "new\nline"),
            row("5", "\"leading quote"),
        ];
        let table = CsvTable::parse(&render_member_csv(&rows).unwrap()).unwrap();
        assert_eq!(table.headers, vec!["User ID", "Username"]);
        assert_eq!(table.member_rows(), rows);
    }

    #[test]
    fn test_parse_crlf_and_blank_lines() {
        let table = CsvTable::parse("User ID,Username\r\n1,alice\r\n\r\n2,bob\r\n").unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.value(1, "Username"), "bob");
    }

    #[test]
    fn test_parse_skips_whitespace_only_lines() {
        let table = CsvTable::parse("User ID,Username\n   \n1,alice").unwrap();
        assert_eq!(table.rows, vec![vec!["1".to_string(), "alice".to_string()]]);
    }

    #[test]
    fn test_missing_column_reads_empty() {
        let table = CsvTable::parse("User ID\n1").unwrap();
        assert_eq!(table.value(0, "Username"), "");
        assert_eq!(table.value(5, "User ID"), "");
    }

    #[test]
    fn test_parse_strips_byte_order_mark() {
        let table = CsvTable::parse("\u{feff}User ID,Username\n7,gina").unwrap();
        assert_eq!(table.value(0, USER_ID_HEADER), "7");
    }

    #[test]
    fn test_parse_empty_input() {
        let table = CsvTable::parse("").unwrap();
        assert!(table.headers.is_empty());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn test_dated_filename_format() {
        let now = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(dated_filename("users", now), "users-20240102-030405.csv");
        assert_eq!(
            dated_filename("inactive_30d", now),
            "inactive_30d-20240102-030405.csv"
        );
    }
}
