//! Per-turn cancellation tokens.
//!
//! Every sub-operation of a turn (enrichment tasks, provider calls, tool
//! invocations) checks the turn's token; cancelling it stops the turn at the
//! next checkpoint. Timeouts compose with cancellation: a cancelled turn
//! never waits out a timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
