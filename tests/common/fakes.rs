//! In-memory stand-ins for external collaborators

use onionoo_rs::lock::AdvisoryLock;
use onionoo_rs::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Advisory lock shared between contexts of the same test
#[derive(Clone, Default)]
pub struct SharedLock {
    held: Arc<AtomicBool>,
}

impl SharedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Simulate another process holding the lock
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }
}

impl AdvisoryLock for SharedLock {
    fn acquire(&self) -> Result<bool> {
        Ok(self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    fn release(&self) -> Result<bool> {
        self.held.store(false, Ordering::SeqCst);
        Ok(true)
    }
}
