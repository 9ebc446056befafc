//! Live request-context tracking.
//!
//! An atomic counter with RAII guards: the lifecycle layer takes a guard for
//! every context it creates and the health endpoint reports the count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of request contexts currently alive.
#[derive(Debug, Default)]
pub struct LiveContexts {
    count: Arc<AtomicU64>,
}

impl LiveContexts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live context until the returned guard is dropped.
    #[must_use]
    pub fn guard(&self) -> LiveGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        LiveGuard {
            count: Arc::clone(&self.count),
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Decrements the live count on drop, including during unwinding.
#[derive(Debug)]
pub struct LiveGuard {
    count: Arc<AtomicU64>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_increment_and_decrement() {
        let live = LiveContexts::new();
        assert_eq!(live.count(), 0);

        let a = live.guard();
        let b = live.guard();
        assert_eq!(live.count(), 2);

        drop(a);
        assert_eq!(live.count(), 1);
        drop(b);
        assert_eq!(live.count(), 0);
    }
}
