//! The background detection loop.
//!
//! [`DetectionLoop::run`] is the body of the `wake-detector` thread.  While
//! [`LoopState::Active`] it moves one frame from the [`AudioBridge`] into
//! the engine runner's input, then checks the activation flag.  On an
//! activation it pauses itself before invoking the host callback, so a
//! second activation cannot fire until the host unpauses.
//!
//! While paused it blocks on the [`LoopControl`] condvar, so a resume is
//! picked up immediately and an idle loop costs no CPU.
//!
//! The loop stops for good when the engine runner dies, since no further
//! activation can arrive.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use super::state::{LoopControl, LoopState};
use crate::audio::AudioBridge;
use crate::engine::EngineRunner;

/// Host callback run on every wake-word detection.
pub type WakeCallback = Box<dyn FnMut() + Send + 'static>;

/// Cooperative stop predicate checked between frames.
pub type InterruptCheck = Box<dyn Fn() -> bool + Send + 'static>;

/// Everything the `wake-detector` thread owns.
pub struct DetectionLoop {
    control: Arc<LoopControl>,
    runner: Arc<EngineRunner>,
    bridge: AudioBridge,
    callback: WakeCallback,
    interrupt: Option<InterruptCheck>,
    frame_bytes: usize,
    poll_interval: Duration,
}

impl DetectionLoop {
    pub fn new(
        control: Arc<LoopControl>,
        runner: Arc<EngineRunner>,
        bridge: AudioBridge,
        callback: WakeCallback,
        frame_bytes: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            control,
            runner,
            bridge,
            callback,
            interrupt: None,
            frame_bytes: frame_bytes.max(1),
            poll_interval,
        }
    }

    /// Stop the loop once `check` returns `true`.
    pub fn with_interrupt(mut self, check: InterruptCheck) -> Self {
        self.interrupt = Some(check);
        self
    }

    /// Run until the control block is stopped, the interrupt predicate
    /// fires, the audio source closes or the engine runner dies.  The bridge
    /// is released on exit.
    pub fn run(mut self) {
        log::debug!("detection-loop: detecting...");
        let engine_input = self.runner.input();
        let mut capturing = false;

        loop {
            if self.interrupt.as_ref().is_some_and(|check| check()) {
                log::info!("detection-loop: interrupted by host");
                self.control.stop();
                break;
            }

            match self.control.wait_while_paused(self.poll_interval) {
                LoopState::Stopped => break,
                LoopState::Paused => {
                    if capturing {
                        self.bridge.set_capturing(false);
                        capturing = false;
                    }
                    continue;
                }
                LoopState::Active => {}
            }

            if !self.runner.is_alive() {
                log::error!("detection-loop: engine runner is gone, stopping");
                self.control.stop();
                break;
            }

            if !capturing {
                self.bridge.set_capturing(true);
                capturing = true;
            }

            let frame = self.bridge.read_frame(self.frame_bytes, self.poll_interval);
            if !frame.is_empty() {
                engine_input.write(&frame);
            } else if self.bridge.is_closed() {
                log::warn!("detection-loop: audio source closed, stopping");
                self.control.stop();
                break;
            }

            if self.control.take_detection() {
                // Runner first: an unpause racing with this must not be
                // followed by a stale runner pause.
                self.runner.pause();
                if !self.control.pause() {
                    continue;
                }
                self.bridge.set_capturing(false);
                capturing = false;

                log::info!("detection-loop: keyword detected");
                self.dispatch();
            }
        }

        self.bridge.terminate();
        log::debug!("detection-loop: finished");
    }

    /// A panicking callback is logged; the loop stays alive and paused.
    fn dispatch(&mut self) {
        if catch_unwind(AssertUnwindSafe(|| (self.callback)())).is_err() {
            log::error!("detection-loop: wake callback panicked");
        }
    }
}
