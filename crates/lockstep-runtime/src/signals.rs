//! [`ControllerHandle`] – cross-thread control signals for the cycle loop.
//!
//! The handle is the only thing other execution contexts hold besides a
//! snapshot reader.  It carries two requests into the loop:
//!
//! - **shutdown**: honoured at the next phase boundary and wakes any
//!   interruptible wait immediately.
//! - **acknowledge**: releases a critical halt.  Ignored unless the loop is
//!   actually halted.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Signals {
    shutdown: bool,
    halted: bool,
    acknowledged: bool,
}

/// Cheap to clone; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct ControllerHandle {
    inner: Arc<(Mutex<Signals>, Condvar)>,
}

impl ControllerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn signals(&self) -> MutexGuard<'_, Signals> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the loop to stop.  Callable from any thread, any number of times.
    pub fn request_shutdown(&self) {
        self.signals().shutdown = true;
        self.inner.1.notify_all();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.signals().shutdown
    }

    /// `true` while automatic cycling is paused on a critical condition.
    pub fn is_halted(&self) -> bool {
        self.signals().halted
    }

    /// Acknowledge a critical halt.  Returns `false` when nothing is halted.
    pub fn acknowledge_critical(&self) -> bool {
        let mut signals = self.signals();
        if !signals.halted {
            return false;
        }
        signals.acknowledged = true;
        drop(signals);
        self.inner.1.notify_all();
        true
    }

    pub(crate) fn set_halted(&self) {
        let mut signals = self.signals();
        signals.halted = true;
        signals.acknowledged = false;
    }

    /// Sleep for `duration` unless shutdown is requested first.  Returns
    /// `false` when woken by shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut signals = self.signals();
        while !signals.shutdown {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            signals = self
                .inner
                .1
                .wait_timeout(signals, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        false
    }

    /// Block until the halt is acknowledged (returns `true`) or shutdown is
    /// requested (returns `false`).  Clears the halt on acknowledgement.
    pub(crate) fn wait_for_acknowledgement(&self) -> bool {
        let mut signals = self.signals();
        loop {
            if signals.acknowledged {
                signals.acknowledged = false;
                signals.halted = false;
                return true;
            }
            if signals.shutdown {
                return false;
            }
            signals = self
                .inner
                .1
                .wait(signals)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn sleep_runs_to_completion_without_shutdown() {
        let handle = ControllerHandle::new();
        let started = Instant::now();
        assert!(handle.sleep(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn shutdown_interrupts_sleep() {
        let handle = ControllerHandle::new();
        let remote = handle.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.request_shutdown();
        });
        let started = Instant::now();
        assert!(!handle.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        waker.join().unwrap();
    }

    #[test]
    fn acknowledge_without_halt_is_ignored() {
        let handle = ControllerHandle::new();
        assert!(!handle.acknowledge_critical());
    }

    #[test]
    fn acknowledgement_releases_halt() {
        let handle = ControllerHandle::new();
        handle.set_halted();
        assert!(handle.is_halted());

        let remote = handle.clone();
        let operator = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(remote.acknowledge_critical());
        });
        assert!(handle.wait_for_acknowledgement());
        assert!(!handle.is_halted());
        operator.join().unwrap();
    }

    #[test]
    fn shutdown_releases_halt_wait() {
        let handle = ControllerHandle::new();
        handle.set_halted();
        handle.request_shutdown();
        assert!(!handle.wait_for_acknowledgement());
        assert!(handle.is_halted());
    }
}
