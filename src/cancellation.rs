//! Cooperative cancellation shared by every long-running operator: the
//! sorter's merge phase, the permutation scan, the expression evaluator's
//! vector loops, and materialized view builds.
//!
//! Grounded on the teacher's `execution::timeout::{QueryTimeout, CancelHandle}`
//! (atomic flag plus a deadline check), generalized so every caller passes
//! its own operator name into [`CancellationError`] instead of the teardown
//! of one hardcoded `TimeoutError` shape.

use crate::error::CancellationError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Owns the cancellation flag and deadline for one query. Cloning shares
/// the same underlying flag (spec §5: "a query is executed by a single
/// driver thread but individual operators may launch bounded worker
/// pools" — every worker needs to see the same cancellation signal).
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    start: Instant,
    deadline: Option<Duration>,
}

impl CancellationToken {
    pub fn new(deadline: Option<Duration>) -> CancellationToken {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            start: Instant::now(),
            deadline,
        }
    }

    pub fn no_deadline() -> CancellationToken {
        CancellationToken::new(None)
    }

    /// Poll once. Operators call this at block boundaries, aggregate-pass
    /// starts, and configured intervals within long vector loops (spec
    /// §4.4, §4.2).
    pub fn poll(&self, noticed_by: &str) -> Result<(), CancellationError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(CancellationError {
                noticed_by: noticed_by.to_string(),
            });
        }
        if let Some(deadline) = self.deadline {
            if self.start.elapsed() > deadline {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(CancellationError {
                    noticed_by: noticed_by.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// A detachable handle that can cancel a query from another thread (e.g. a
/// server handling an HTTP abort) without holding the rest of the token's
/// state.
#[derive(Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deadline_never_cancels_on_its_own() {
        let token = CancellationToken::no_deadline();
        assert!(token.poll("test").is_ok());
    }

    #[test]
    fn explicit_cancel_is_observed_by_poll() {
        let token = CancellationToken::no_deadline();
        let handle = token.handle();
        handle.cancel();
        let err = token.poll("sorter").unwrap_err();
        assert_eq!(err.noticed_by, "sorter");
    }

    #[test]
    fn deadline_trips_after_elapsed_time() {
        let token = CancellationToken::new(Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(token.poll("permutation_scan").is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn handle_shares_state_with_its_token() {
        let token = CancellationToken::no_deadline();
        let handle = token.handle();
        assert!(!handle.is_cancelled());
        token.poll("x").unwrap();
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
