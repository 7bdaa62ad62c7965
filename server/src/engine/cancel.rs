use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Raised at a safe point once the job's token has been cancelled.
/// Each job error type converts it into its own cancellation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Poll-and-raise over a cancellation token.
pub trait CheckCancelled {
    fn check(&self) -> Result<(), Cancelled>;
}

impl CheckCancelled for CancellationToken {
    fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScanError;

    fn step(token: &CancellationToken) -> Result<u32, ScanError> {
        token.check()?;
        Ok(7)
    }

    #[test]
    fn test_live_token_passes() {
        let token = CancellationToken::new();
        assert_eq!(step(&token).unwrap(), 7);
    }

    #[test]
    fn test_cancelled_token_raises() {
        let token = CancellationToken::new();
        token.clone().cancel();
        let err = step(&token).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Scan cancelled by user.");
    }
}
