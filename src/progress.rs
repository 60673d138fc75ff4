//! Progress reporting and cooperative cancellation.
//!
//! The engine advances a [`Progress`] sink synchronously at natural
//! checkpoints: once per directory entry during `read`, once per resource
//! during extraction and rewrite.  Cancellation is only observed at those
//! same checkpoints.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub trait Progress {
    fn set_maximum(&mut self, total: u64);
    fn set_value(&mut self, current: u64);
    fn is_cancelled(&self) -> bool { false }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn set_maximum(&mut self, _: u64) {}
    fn set_value(&mut self, _: u64) {}
}

/// Shared counters plus a cancellation flag; cloneable across threads so a
/// front end can observe and cancel from elsewhere.
#[derive(Debug, Default, Clone)]
pub struct SharedProgress {
    maximum:   Arc<AtomicU64>,
    value:     Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
}

impl SharedProgress {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn maximum(&self) -> u64 { self.maximum.load(Ordering::Relaxed) }
    pub fn value(&self) -> u64 { self.value.load(Ordering::Relaxed) }
}

impl Progress for SharedProgress {
    fn set_maximum(&mut self, total: u64) {
        self.maximum.store(total, Ordering::Relaxed);
    }
    fn set_value(&mut self, current: u64) {
        self.value.store(current, Ordering::Relaxed);
    }
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
