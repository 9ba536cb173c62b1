//! The per-index exclusive writer lock.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, ScourError};

/// At most one writer per index. Acquire is exclusive; release is
/// idempotent.
#[derive(Debug, Default)]
pub struct WriterLock {
    held: AtomicBool,
}

impl WriterLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> Result<()> {
        if self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScourError::WriterLocked);
        }
        Ok(())
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}
