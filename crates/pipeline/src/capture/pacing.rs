use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(10);

/// How capture ticks are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// A timer firing every `1000 / fps` ms. Ticks landing on an in-flight
    /// capture are skipped, so slow cameras lower the effective rate.
    FixedInterval,
    /// Captures inline and then waits out the rest of the interval, never
    /// less than `min_delay`.
    SelfCorrecting { min_delay: Duration },
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::SelfCorrecting {
            min_delay: DEFAULT_MIN_DELAY,
        }
    }
}

/// Single-holder flag marking a capture in flight.
///
/// Every acquisition gets a fresh token and a guard only clears the flag
/// while it still holds its own token. After [`CaptureLock::release_all`]
/// a guard left behind by an aborted tick cannot release a newer holder.
#[derive(Debug, Clone, Default)]
pub(crate) struct CaptureLock {
    inner: Arc<LockInner>,
}

#[derive(Debug, Default)]
struct LockInner {
    holder: AtomicU64,
    next_token: AtomicU64,
}

impl CaptureLock {
    pub fn try_acquire(&self) -> Option<CaptureGuard> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .holder
            .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CaptureGuard {
                lock: self.clone(),
                token,
            })
    }

    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        self.inner.holder.load(Ordering::Acquire) != 0
    }

    pub fn release_all(&self) {
        self.inner.holder.store(0, Ordering::Release);
    }
}

#[derive(Debug)]
pub(crate) struct CaptureGuard {
    lock: CaptureLock,
    token: u64,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let _ = self.lock.inner.holder.compare_exchange(
            self.token,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
