use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared, cooperative cancellation flag.
///
/// Cancelling never interrupts a running producer or settles a promise on
/// its own. A [`Builder`](crate::Builder) holding a cancelled token skips the
/// producer and rejects with [`Error::Cancelled`](crate::Error::Cancelled);
/// a running producer may keep a clone and poll [`is_cancelled`](Self::is_cancelled).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this token and every clone of it as cancelled. Cannot be undone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
