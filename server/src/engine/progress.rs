use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Callbacks the scanner fires while it works through the channel list.
/// Indices are 1-based.
pub trait ScanProgress: Send + Sync {
    fn on_channel_start(&self, _channel: &str, _index: usize, _total: usize) {}
    fn on_channel_complete(&self, _channel: &str, _index: usize, _total: usize) {}
    fn on_member_progress(&self, _processed: usize, _total: usize) {}
    fn on_message_progress(&self, _total_messages: u64) {}
}

/// Discards every callback.
pub struct NoProgress;

impl ScanProgress for NoProgress {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    #[default]
    Idle,
    Preparing,
    Scanning,
    Completed,
    Cancelled,
    Failed,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Snapshot served by the status endpoints.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub phase: ScanPhase,
    pub in_progress: bool,
    pub current_channel: Option<String>,
    pub current_index: usize,
    pub total_channels: usize,
    pub processed_channels: usize,
    pub processed_members: usize,
    pub total_members: usize,
    pub total_messages: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub error_message: Option<String>,
}

/// User-facing wording for one kind of scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanKind {
    pub preparing: &'static str,
    pub cancelling: &'static str,
    pub cancelled: &'static str,
    pub failed: &'static str,
    pub busy: &'static str,
    pub idle: &'static str,
}

pub const ZERO_MESSAGE_SCAN: ScanKind = ScanKind {
    preparing: "Preparing scan…",
    cancelling: "Cancelling scan…",
    cancelled: "Scan cancelled by user.",
    failed: "Scan failed.",
    busy: "A scan is already in progress.",
    idle: "No scan is currently running.",
};

pub const INACTIVE_SCAN: ScanKind = ScanKind {
    preparing: "Preparing inactive scan…",
    cancelling: "Cancelling inactive scan…",
    cancelled: "Inactive scan cancelled by user.",
    failed: "Inactive scan failed.",
    busy: "An inactive scan is already in progress.",
    idle: "No inactive scan is currently running.",
};

// ── Job slots ───────────────────────────────────────────────────────

/// Single in-flight slot for a job kind. Holding the slot means holding its
/// cancellation token; a second `try_begin` fails until the guard drops.
#[derive(Default)]
pub struct JobSlot {
    active: Mutex<Option<CancellationToken>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(self: &Arc<Self>) -> Option<JobGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        Some(JobGuard {
            slot: Arc::clone(self),
            token,
        })
    }

    /// Flip the running job's token. False when nothing is in flight.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Releases its [`JobSlot`] on drop.
pub struct JobGuard {
    slot: Arc<JobSlot>,
    token: CancellationToken,
}

impl JobGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        *self
            .slot
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ── Scan slots ──────────────────────────────────────────────────────

/// Status record plus in-flight slot for one scan kind.
pub struct ScanSlot {
    kind: ScanKind,
    job: Arc<JobSlot>,
    status: Mutex<ScanStatus>,
}

impl ScanSlot {
    pub fn new(kind: ScanKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            job: Arc::new(JobSlot::new()),
            status: Mutex::new(ScanStatus::default()),
        })
    }

    pub fn kind(&self) -> ScanKind {
        self.kind
    }

    pub fn snapshot(&self) -> ScanStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, apply: impl FnOnce(&mut ScanStatus)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut status);
    }

    /// `idle → preparing`. Returns `None` without touching the status when a
    /// scan of this kind is already in flight.
    pub fn begin(self: &Arc<Self>, total_channels: usize, last_message: &str) -> Option<ScanRun> {
        let guard = self.job.try_begin()?;
        self.update(|s| {
            *s = ScanStatus {
                phase: ScanPhase::Preparing,
                in_progress: true,
                total_channels,
                started_at: Some(Utc::now()),
                last_message: Some(last_message.to_string()),
                ..ScanStatus::default()
            };
        });
        Some(ScanRun {
            slot: Arc::clone(self),
            guard,
        })
    }

    /// Request cancellation of the in-flight scan. False when idle.
    pub fn cancel(&self) -> bool {
        if !self.job.cancel() {
            return false;
        }
        let cancelling = self.kind.cancelling;
        self.update(|s| {
            s.last_message = Some(cancelling.to_string());
            s.error_message = None;
        });
        true
    }

    pub fn is_running(&self) -> bool {
        self.job.is_busy()
    }
}

/// A scan holding its slot. Reports progress into the slot's status and
/// performs exactly one terminal transition.
pub struct ScanRun {
    slot: Arc<ScanSlot>,
    guard: JobGuard,
}

impl ScanRun {
    pub fn token(&self) -> &CancellationToken {
        self.guard.token()
    }

    pub fn status(&self) -> ScanStatus {
        self.slot.snapshot()
    }

    fn finish(&self, apply: impl FnOnce(&mut ScanStatus)) {
        self.slot.update(|s| {
            apply(s);
            s.in_progress = false;
            s.current_channel = None;
            s.current_index = 0;
            s.finished_at = Some(Utc::now());
        });
    }

    /// `→ completed`. `apply` writes the final counts.
    pub fn complete(self, last_message: String, apply: impl FnOnce(&mut ScanStatus)) {
        self.finish(|s| {
            apply(s);
            s.phase = ScanPhase::Completed;
            s.last_message = Some(last_message);
            s.error_message = None;
        });
    }

    /// `→ cancelled`. Counters are kept.
    pub fn cancelled(self) {
        let note = self.slot.kind.cancelled;
        self.finish(|s| {
            s.phase = ScanPhase::Cancelled;
            s.last_message = Some(note.to_string());
            s.error_message = None;
        });
    }

    /// `→ failed`. Counters are reset and the error recorded.
    pub fn failed(self, error: String) {
        let note = self.slot.kind.failed;
        self.finish(|s| {
            s.phase = ScanPhase::Failed;
            s.total_channels = 0;
            s.processed_channels = 0;
            s.processed_members = 0;
            s.total_members = 0;
            s.total_messages = 0;
            s.last_message = Some(note.to_string());
            s.error_message = Some(error);
        });
    }
}

impl Drop for ScanRun {
    fn drop(&mut self) {
        // Unwound before a terminal transition (task panicked or was aborted).
        let note = self.slot.kind.failed;
        self.slot.update(|s| {
            if s.in_progress {
                s.phase = ScanPhase::Failed;
                s.in_progress = false;
                s.current_channel = None;
                s.current_index = 0;
                s.finished_at = Some(Utc::now());
                s.last_message = Some(note.to_string());
                s.error_message = Some("Scan aborted unexpectedly.".to_string());
            }
        });
    }
}

impl ScanProgress for ScanRun {
    fn on_channel_start(&self, channel: &str, index: usize, total: usize) {
        self.slot.update(|s| {
            s.phase = ScanPhase::Scanning;
            s.in_progress = true;
            s.current_channel = Some(channel.to_string());
            s.current_index = index;
            s.total_channels = total;
            s.processed_channels = index.saturating_sub(1);
            s.last_message = Some(format!("Scanning #{channel}"));
        });
    }

    fn on_channel_complete(&self, _channel: &str, index: usize, total: usize) {
        self.slot.update(|s| s.processed_channels = index.min(total));
    }

    fn on_member_progress(&self, processed: usize, total: usize) {
        self.slot.update(|s| {
            s.processed_members = processed;
            s.total_members = total;
        });
    }

    fn on_message_progress(&self, total_messages: u64) {
        self.slot.update(|s| s.total_messages = total_messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status_is_idle() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        let status = slot.snapshot();
        assert_eq!(status.phase, ScanPhase::Idle);
        assert!(!status.in_progress);
        assert!(status.started_at.is_none());
    }

    #[test]
    fn test_begin_moves_to_preparing() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        let _run = slot.begin(3, "Preparing scan…").unwrap();
        let status = slot.snapshot();
        assert_eq!(status.phase, ScanPhase::Preparing);
        assert!(status.in_progress);
        assert_eq!(status.total_channels, 3);
        assert!(status.started_at.is_some());
        assert!(status.finished_at.is_none());
    }

    #[test]
    fn test_second_begin_rejected_without_side_effects() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        let run = slot.begin(2, "Preparing scan…").unwrap();
        run.on_channel_start("general", 1, 2);
        let before = slot.snapshot();

        assert!(slot.begin(9, "again").is_none());
        assert_eq!(slot.snapshot(), before);
    }

    #[test]
    fn test_slot_reusable_after_run_ends() {
        let slot = ScanSlot::new(INACTIVE_SCAN);
        let run = slot.begin(0, "Preparing inactive scan…").unwrap();
        run.complete("done".into(), |_| {});
        assert!(!slot.is_running());
        assert!(slot.begin(0, "Preparing inactive scan…").is_some());
    }

    #[test]
    fn test_channel_progress_arithmetic() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        let run = slot.begin(3, "Preparing scan…").unwrap();

        run.on_channel_start("a", 1, 3);
        let s = slot.snapshot();
        assert_eq!(s.phase, ScanPhase::Scanning);
        assert_eq!(s.processed_channels, 0);
        assert_eq!(s.current_channel.as_deref(), Some("a"));
        assert_eq!(s.last_message.as_deref(), Some("Scanning #a"));

        run.on_channel_complete("a", 1, 3);
        assert_eq!(slot.snapshot().processed_channels, 1);

        run.on_channel_start("c", 3, 3);
        assert_eq!(slot.snapshot().processed_channels, 2);
        run.on_channel_complete("c", 5, 3);
        assert_eq!(slot.snapshot().processed_channels, 3);
    }

    #[test]
    fn test_cancelled_keeps_counters() {
        let slot = ScanSlot::new(INACTIVE_SCAN);
        let run = slot.begin(0, "Preparing inactive scan…").unwrap();
        run.on_channel_start("a", 2, 4);
        run.on_message_progress(150);
        run.cancelled();

        let s = slot.snapshot();
        assert_eq!(s.phase, ScanPhase::Cancelled);
        assert!(!s.in_progress);
        assert!(s.current_channel.is_none());
        assert_eq!(s.processed_channels, 1);
        assert_eq!(s.total_messages, 150);
        assert_eq!(s.last_message.as_deref(), Some("Inactive scan cancelled by user."));
        assert!(s.error_message.is_none());
        assert!(s.finished_at.is_some());
    }

    #[test]
    fn test_failed_resets_counters() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        let run = slot.begin(2, "Preparing scan…").unwrap();
        run.on_channel_start("a", 1, 2);
        run.on_member_progress(5, 10);
        run.failed("boom".into());

        let s = slot.snapshot();
        assert_eq!(s.phase, ScanPhase::Failed);
        assert_eq!(s.total_channels, 0);
        assert_eq!(s.processed_members, 0);
        assert_eq!(s.total_members, 0);
        assert_eq!(s.error_message.as_deref(), Some("boom"));
        assert_eq!(s.last_message.as_deref(), Some("Scan failed."));
        assert!(s.finished_at.is_some());
    }

    #[test]
    fn test_cancel_while_idle_is_refused() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        assert!(!slot.cancel());
        assert_eq!(slot.snapshot().phase, ScanPhase::Idle);
    }

    #[test]
    fn test_cancel_flips_token_and_notes_status() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        let run = slot.begin(1, "Preparing scan…").unwrap();
        assert!(slot.cancel());
        assert!(run.token().is_cancelled());
        assert_eq!(slot.snapshot().last_message.as_deref(), Some("Cancelling scan…"));
    }

    #[test]
    fn test_dropped_run_marks_failure() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        let run = slot.begin(1, "Preparing scan…").unwrap();
        drop(run);
        let s = slot.snapshot();
        assert_eq!(s.phase, ScanPhase::Failed);
        assert!(!s.in_progress);
        assert!(!slot.is_running());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let slot = ScanSlot::new(ZERO_MESSAGE_SCAN);
        let json = serde_json::to_value(slot.snapshot()).unwrap();
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["inProgress"], false);
        assert!(json.get("processedChannels").is_some());
        assert!(json["currentChannel"].is_null());
    }

    #[test]
    fn test_job_slot_single_flight() {
        let slot = Arc::new(JobSlot::new());
        let guard = slot.try_begin().unwrap();
        assert!(slot.try_begin().is_none());
        assert!(slot.cancel());
        assert!(guard.token().is_cancelled());
        drop(guard);
        assert!(!slot.is_busy());
        assert!(!slot.cancel());
    }
}
