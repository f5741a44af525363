use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Cooperative cancellation handle shared between a session and its owner.
///
/// Cloning yields another handle to the same token. Blocking operations poll
/// the token between waits; `cancel` wakes any waiter immediately.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if let Ok(mut cancelled) = self.inner.cancelled.lock() {
            *cancelled = true;
        }
        self.inner.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        // A poisoned lock means a waiter panicked; treat the token as spent.
        self.inner.cancelled.lock().map(|c| *c).unwrap_or(true)
    }

    /// Waits up to `timeout`, returning early when the token fires. Returns
    /// whether the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Ok(cancelled) = self.inner.cancelled.lock() else {
            return true;
        };
        if *cancelled {
            return true;
        }
        match self.inner.condvar.wait_timeout(cancelled, timeout) {
            Ok((guard, _)) => *guard,
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(!token.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let fired = waiter.wait_timeout(Duration::from_secs(30));
            (fired, start.elapsed())
        });
        thread::sleep(Duration::from_millis(50));
        token.cancel();
        let (fired, elapsed) = handle.join().unwrap();
        assert!(fired);
        assert!(elapsed < Duration::from_secs(5));
    }
}
