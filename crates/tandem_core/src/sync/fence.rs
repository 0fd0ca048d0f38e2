//! One-shot completion signal shared between threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Signaled once by a producer, waited on by any number of consumers.
///
/// The core thread signals a fence after draining a batch; the simulation
/// thread waits on it at the frame handshake.
#[derive(Debug, Default)]
pub struct Fence {
    done: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl Fence {
    /// Creates an unsignaled fence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fence that is already signaled.
    #[must_use]
    pub fn signaled() -> Self {
        let fence = Self::new();
        fence.done.store(true, Ordering::Release);
        fence
    }

    /// Marks the fence complete and wakes all waiters.
    pub fn signal(&self) {
        let _guard = self.mutex.lock();
        self.done.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    /// True once signaled.
    #[inline]
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Blocks until signaled.
    pub fn wait(&self) {
        if self.is_signaled() {
            return;
        }
        let mut guard = self.mutex.lock();
        while !self.is_signaled() {
            self.condvar.wait(&mut guard);
        }
    }

    /// Blocks up to `timeout`. Returns true if signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_signaled() {
            return true;
        }
        let mut guard = self.mutex.lock();
        if self.is_signaled() {
            return true;
        }
        self.condvar.wait_for(&mut guard, timeout);
        self.is_signaled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fence_wakes_waiter() {
        let fence = Arc::new(Fence::new());
        let signaler = Arc::clone(&fence);
        let t = std::thread::spawn(move || signaler.signal());
        fence.wait();
        assert!(fence.is_signaled());
        t.join().unwrap();
    }

    #[test]
    fn test_fence_timeout() {
        let fence = Fence::new();
        assert!(!fence.wait_timeout(Duration::from_millis(5)));
        assert!(Fence::signaled().wait_timeout(Duration::ZERO));
    }
}
