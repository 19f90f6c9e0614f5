use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Holds the one session the server is allowed to run at a time.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    active: Arc<AtomicBool>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the slot, or returns `None` while another session holds it.
    pub fn try_claim(&self) -> Option<SessionGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SessionGuard {
                active: self.active.clone(),
            })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Releases the slot when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    active: Arc<AtomicBool>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}
