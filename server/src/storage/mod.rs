//! CSV persistence: member exports, stored-file listing and ignore lists.

pub mod files;
pub mod ignore;
pub mod table;

pub use files::{CsvError, CsvFileMetadata, CsvStore, read_table};
pub use ignore::load_ignored_ids;
pub use table::{CsvTable, MemberRow};
