//! Member-activity scanning: channel resolution, history walking, working-set
//! reduction and result assembly, plus the status slots the HTTP layer polls.

pub mod assembler;
pub mod cancel;
pub mod progress;
pub mod reducer;
pub mod resolver;
pub mod scanner;
pub mod walker;

use thiserror::Error;

use crate::discord::client::RemoteError;
use crate::storage::CsvError;

pub use cancel::{Cancelled, CheckCancelled};
pub use progress::{JobGuard, JobSlot, NoProgress, ScanKind, ScanPhase, ScanProgress, ScanRun, ScanSlot, ScanStatus};
pub use scanner::{ChannelSelection, PageOrder, PreviewLimits, ScanPlan, ScanReport, Scanner};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Scan cancelled by user.")]
    Cancelled,
    #[error("No target channels found with the provided names.")]
    NoMatchingChannels,
    #[error("No eligible channels were found for inactivity scan.")]
    NoEligibleChannels,
    #[error("{0}")]
    Remote(#[from] RemoteError),
    #[error("{0}")]
    Csv(#[from] CsvError),
}

impl From<Cancelled> for ScanError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl ScanError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
