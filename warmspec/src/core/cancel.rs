//! Cooperative cancellation for an active run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag observed by a run between example groups.
///
/// Clones share the same flag, so the interrupt handler can hold one while the
/// run thread polls another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
