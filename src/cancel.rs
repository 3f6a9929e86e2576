//! Cooperative cancellation for long-running streaming sessions.
//!
//! The streaming loop checks the token between poll cycles and between retry
//! attempts; an in-flight read is allowed to finish or time out naturally, so
//! worst-case cancellation latency is one per-attempt timeout.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cloneable one-shot cancellation flag.
///
/// Backed by a condvar so that a loop sleeping between poll cycles wakes
/// promptly when the token fires instead of finishing its sleep.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Fire the token and wake every waiter. Idempotent.
    pub fn fire(&self) {
        let (flag, cvar) = &*self.inner;
        let mut fired = flag.lock().unwrap_or_else(|e| e.into_inner());
        *fired = true;
        cvar.notify_all();
    }

    pub fn is_fired(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep up to `timeout`, returning early if the token fires.
    ///
    /// Returns `true` if the token is fired by the time this returns.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut fired = flag.lock().unwrap_or_else(|e| e.into_inner());
        while !*fired {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = cvar
                .wait_timeout(fired, remaining)
                .unwrap_or_else(|e| e.into_inner());
            fired = guard;
            if result.timed_out() && !*fired {
                return false;
            }
        }
        true
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_times_out_when_not_fired() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn fire_wakes_a_sleeping_waiter() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.fire();
        });
        let start = Instant::now();
        assert!(token.wait(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().expect("firing thread panicked");
        assert!(token.is_fired());
    }
}
