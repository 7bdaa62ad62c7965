use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// How long a confirmation id stays valid.
pub const CONFIRMATION_WINDOW: Duration = Duration::from_secs(30);

/// Body returned with 202 when a destructive request needs confirming.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationTicket {
    pub message: String,
    pub confirmation_id: Uuid,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// No id was supplied: nothing runs until the ticket is echoed back.
    Required(ConfirmationTicket),
    /// The id matched this request within the window.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfirmError {
    #[error("Confirmation timed out; action cancelled.")]
    Expired,
    #[error("Confirmation id does not match this request.")]
    Mismatch,
    #[error("Unknown or already used confirmation id.")]
    Unknown,
}

struct Pending {
    fingerprint: String,
    issued: Instant,
}

/// Two-step gate for destructive requests. Each request is reduced to a
/// fingerprint; the confirmation id is single-use and bound to it.
pub struct ConfirmationGate {
    pending: DashMap<Uuid, Pending>,
    window: Duration,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(CONFIRMATION_WINDOW)
    }
}

impl ConfirmationGate {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            window,
        }
    }

    /// Issue a ticket when `confirmation_id` is absent, otherwise redeem it.
    pub fn check(
        &self,
        fingerprint: &str,
        confirmation_id: Option<&str>,
        prompt: impl FnOnce() -> String,
    ) -> Result<Confirmation, ConfirmError> {
        let Some(raw) = confirmation_id.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Confirmation::Required(self.issue(fingerprint, prompt())));
        };
        let id = Uuid::parse_str(raw).map_err(|_| ConfirmError::Unknown)?;

        let Some(entry) = self.pending.get(&id) else {
            return Err(ConfirmError::Unknown);
        };
        if entry.issued.elapsed() > self.window {
            drop(entry);
            self.pending.remove(&id);
            return Err(ConfirmError::Expired);
        }
        if entry.fingerprint != fingerprint {
            return Err(ConfirmError::Mismatch);
        }
        drop(entry);
        self.pending.remove(&id);
        Ok(Confirmation::Confirmed)
    }

    fn issue(&self, fingerprint: &str, message: String) -> ConfirmationTicket {
        // Forget tickets long past their window that were never echoed back.
        let stale_after = self.window * 10;
        self.pending.retain(|_, p| p.issued.elapsed() <= stale_after);

        let id = Uuid::new_v4();
        self.pending.insert(
            id,
            Pending {
                fingerprint: fingerprint.to_string(),
                issued: Instant::now(),
            },
        );
        ConfirmationTicket {
            message,
            confirmation_id: id,
            expires_in_seconds: self.window.as_secs(),
        }
    }
}
