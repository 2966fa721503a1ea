//! Wake-lock abstraction.
//!
//! A sync must keep the device awake for its whole duration. The lock
//! is scoped: [`WakeLockProvider::acquire`] returns a guard that
//! releases on drop, so every exit path of `sync()` releases it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Host hook keeping the device awake.
pub trait WakeLockProvider: Send + Sync {
    /// Acquires the lock.
    fn acquire(&self);

    /// Releases the lock.
    fn release(&self);
}

/// RAII guard over an acquired wake lock.
pub struct WakeGuard {
    provider: Arc<dyn WakeLockProvider>,
}

impl WakeGuard {
    /// Acquires the lock and wraps it in a guard.
    pub fn hold(provider: Arc<dyn WakeLockProvider>) -> Self {
        provider.acquire();
        Self { provider }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.provider.release();
    }
}

/// A provider for hosts with no wake-lock concept.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeLock;

impl WakeLockProvider for NoopWakeLock {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Counts acquire/release pairs; used to verify release on every path.
#[derive(Debug, Default)]
pub struct CountingWakeLock {
    acquired: AtomicU32,
    released: AtomicU32,
}

impl CountingWakeLock {
    /// Number of acquisitions so far.
    pub fn acquired(&self) -> u32 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Number of releases so far.
    pub fn released(&self) -> u32 {
        self.released.load(Ordering::SeqCst)
    }

    /// True when every acquisition has been released.
    pub fn balanced(&self) -> bool {
        self.acquired() == self.released()
    }
}

impl WakeLockProvider for CountingWakeLock {
    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let lock = Arc::new(CountingWakeLock::default());
        {
            let _guard = WakeGuard::hold(lock.clone());
            assert_eq!(lock.acquired(), 1);
            assert_eq!(lock.released(), 0);
        }
        assert!(lock.balanced());
    }

    #[test]
    fn guard_releases_on_panic() {
        let lock = Arc::new(CountingWakeLock::default());
        let inner = lock.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = WakeGuard::hold(inner);
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(lock.balanced());
    }
}
