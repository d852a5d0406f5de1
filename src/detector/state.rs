//! Shared run state between the host thread, the detection loop and the
//! engine runner.
//!
//! # State machine
//!
//! ```text
//!            resume()                 stop()
//!   Paused ───────────▶ Active ─────────────▶ Stopped
//!     ▲                   │                     ▲
//!     └─── pause() ───────┘                     │
//!          (host request or detection)          │
//!     └─────────────────────────────────────────┘
//!                       stop()
//! ```
//!
//! `Stopped` is terminal.  The detection flag is a separate atomic because
//! it is set from the engine runner thread without touching the state lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Run state of the detection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Not reading audio and not dispatching callbacks.
    Paused,
    /// Moving audio to the engine and watching for activations.
    Active,
    /// Terminated; never leaves this state.
    Stopped,
}

/// Lock-guarded [`LoopState`] with a wake-up for waiters, plus the
/// activation flag.
#[derive(Debug)]
pub struct LoopControl {
    state: Mutex<LoopState>,
    changed: Condvar,
    detected: AtomicBool,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    /// New control block, starting `Paused`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopState::Paused),
            changed: Condvar::new(),
            detected: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LoopState {
        *self.lock()
    }

    /// `Active → Paused`.  Returns `true` only if this call made the
    /// transition.
    pub fn pause(&self) -> bool {
        let mut state = self.lock();
        if *state != LoopState::Active {
            return false;
        }
        *state = LoopState::Paused;
        self.changed.notify_all();
        true
    }

    /// `Paused → Active`, discarding any activation signalled before the
    /// call.  Returns `true` only if this call made the transition.
    pub fn resume(&self) -> bool {
        let mut state = self.lock();
        if *state != LoopState::Paused {
            return false;
        }
        self.detected.store(false, Ordering::Release);
        *state = LoopState::Active;
        self.changed.notify_all();
        true
    }

    /// Move to `Stopped` and wake every waiter.
    pub fn stop(&self) {
        let mut state = self.lock();
        *state = LoopState::Stopped;
        self.changed.notify_all();
    }

    /// Block while `Paused`, for at most `timeout`.  Returns the state seen
    /// on wake-up.
    pub fn wait_while_paused(&self, timeout: Duration) -> LoopState {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| *s == LoopState::Paused)
            .unwrap_or_else(PoisonError::into_inner);
        *state
    }

    /// Record an activation.  Called from the engine runner thread.
    pub fn signal_detection(&self) {
        self.detected.store(true, Ordering::Release);
    }

    /// Consume a pending activation.
    pub fn take_detection(&self) -> bool {
        self.detected.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn starts_paused() {
        let control = LoopControl::new();
        assert_eq!(control.state(), LoopState::Paused);
        assert!(!control.take_detection());
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let control = LoopControl::new();
        assert!(!control.pause());
        assert!(control.resume());
        assert!(!control.resume());
        assert_eq!(control.state(), LoopState::Active);
        assert!(control.pause());
        assert!(!control.pause());
        assert_eq!(control.state(), LoopState::Paused);
    }

    #[test]
    fn resume_discards_stale_detection() {
        let control = LoopControl::new();
        control.signal_detection();
        control.resume();
        assert!(!control.take_detection());
    }

    #[test]
    fn take_detection_consumes_once() {
        let control = LoopControl::new();
        control.resume();
        control.signal_detection();
        assert!(control.take_detection());
        assert!(!control.take_detection());
    }

    #[test]
    fn stopped_is_terminal() {
        let control = LoopControl::new();
        control.stop();
        assert!(!control.resume());
        assert!(!control.pause());
        assert_eq!(control.state(), LoopState::Stopped);
    }

    #[test]
    fn wait_returns_after_timeout_when_still_paused() {
        let control = LoopControl::new();
        let start = Instant::now();
        assert_eq!(
            control.wait_while_paused(Duration::from_millis(20)),
            LoopState::Paused
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn resume_wakes_waiter_promptly() {
        let control = Arc::new(LoopControl::new());
        let waker = Arc::clone(&control);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            waker.resume();
        });

        let start = Instant::now();
        let state = control.wait_while_paused(Duration::from_secs(5));
        assert_eq!(state, LoopState::Active);
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn stop_wakes_waiter() {
        let control = Arc::new(LoopControl::new());
        let stopper = Arc::clone(&control);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            stopper.stop();
        });

        assert_eq!(
            control.wait_while_paused(Duration::from_secs(5)),
            LoopState::Stopped
        );
        handle.join().unwrap();
    }
}
