//! Cooperative cancellation flag, checked at the start of the facade's
//! top-level operations and at each loop iteration of chain walks,
//! reductions, and traversals (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, WarpError};

/// A cooperative cancellation flag, a cheap `Clone`-able handle over a
/// shared atomic.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(WarpError::OperationAborted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_errors_only_after_abort() {
        let signal = AbortSignal::new();
        assert!(signal.check().is_ok());
        signal.abort();
        assert!(matches!(signal.check(), Err(WarpError::OperationAborted)));
    }
}
