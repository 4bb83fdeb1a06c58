use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Raised while the engine is typing, so the capture path can tell its own
/// simulated keystrokes apart from the user's.
#[derive(Debug, Clone, Default)]
pub struct SuppressionFlag {
    active: Arc<AtomicBool>,
}

impl SuppressionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Raise the flag until the returned guard is dropped.
    #[must_use = "suppression ends as soon as the guard is dropped"]
    pub fn engage(&self) -> SuppressionGuard {
        self.active.store(true, Ordering::SeqCst);
        SuppressionGuard {
            active: Arc::clone(&self.active),
        }
    }
}

/// Clears the flag on drop, including during unwinding.
#[derive(Debug)]
pub struct SuppressionGuard {
    active: Arc<AtomicBool>,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
