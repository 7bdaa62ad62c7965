//! Bulk moderation jobs driven from exported CSVs and guild state, and the
//! confirmation gate that guards their destructive runs.

pub mod archive;
pub mod confirm;
pub mod kick;
pub mod roles;

use thiserror::Error;

use crate::discord::client::RemoteError;
use crate::engine::Cancelled;
use crate::storage::CsvError;

pub use archive::{ArchiveAction, ArchiveReport, ArchiveRequest, ArchivedChannelSummary};
pub use confirm::{Confirmation, ConfirmationGate, ConfirmationTicket, ConfirmError};
pub use kick::{KickFileResult, KickJob};
pub use roles::RoleCleanupReport;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Kick job cancelled by user.")]
    Cancelled,
    #[error("At least one CSV filename must be provided.")]
    NoFilenames,
    #[error("Bot is missing the Kick Members permission in this guild.")]
    MissingKickPermission,
    #[error("Provide a positive number of days.")]
    InvalidDays,
    #[error("Select at least one channel to archive.")]
    NoChannelsSelected,
    #[error("{0}")]
    Csv(#[from] CsvError),
    #[error("{0}")]
    Remote(#[from] RemoteError),
}

impl From<Cancelled> for CleanupError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}
