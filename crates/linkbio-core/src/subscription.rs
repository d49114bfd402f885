//! Cancellation handles for push-based collaborators.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag flipped when a [`Subscription`] is released.
///
/// Producers check it right before invoking a callback so nothing is
/// delivered after release, even when release races an in-flight
/// notification.
#[derive(Debug, Clone, Default)]
pub struct ReleaseFlag(Arc<AtomicBool>);

impl ReleaseFlag {
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// RAII handle for an active subscription.
///
/// The cancel action runs exactly once, on [`Subscription::release`] or drop.
pub struct Subscription {
    flag: ReleaseFlag,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a handle and the flag its producer should consult.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> (Self, ReleaseFlag) {
        let flag = ReleaseFlag::default();
        (Self::with_flag(flag.clone(), cancel), flag)
    }

    /// Create a handle around a flag the producer already holds.
    pub fn with_flag(flag: ReleaseFlag, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            flag,
            cancel: Some(Box::new(cancel)),
        }
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.flag.is_released()
    }

    /// Release now. Equivalent to dropping the handle.
    pub fn release(mut self) {
        self.cancel_once();
    }

    fn cancel_once(&mut self) {
        self.flag.mark();
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_once();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("released", &self.flag.is_released())
            .finish()
    }
}
