use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Gates shutdown on in-flight worker store writes. Every write is bracketed
/// by [`CriticalSectionCounter::enter`]; shutdown waits up to a timeout for
/// the count to reach zero before proceeding.
#[derive(Default)]
pub struct CriticalSectionCounter {
    count: AtomicU32,
    notify: Notify,
}

impl CriticalSectionCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(self: &Arc<Self>) -> CriticalSectionGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        CriticalSectionGuard {
            counter: Arc::clone(self),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Poll until the counter drains to zero or `timeout` elapses. Returns
    /// `true` if it drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count() == 0 {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(deadline - now) => {}
            }
        }
    }
}

/// RAII guard for one critical section. Decrements on drop and wakes any
/// shutdown waiter.
pub struct CriticalSectionGuard {
    counter: Arc<CriticalSectionCounter>,
}

impl Drop for CriticalSectionGuard {
    fn drop(&mut self) {
        self.counter.count.fetch_sub(1, Ordering::SeqCst);
        self.counter.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_when_guard_dropped() {
        let counter = CriticalSectionCounter::new();
        let guard = counter.enter();
        assert_eq!(counter.count(), 1);
        drop(guard);
        assert!(counter.wait_for_drain(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn times_out_while_held() {
        let counter = CriticalSectionCounter::new();
        let _guard = counter.enter();
        assert!(!counter.wait_for_drain(Duration::from_millis(50)).await);
    }
}
