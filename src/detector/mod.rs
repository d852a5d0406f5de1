//! Wake-word detector facade.
//!
//! # Threads
//!
//! ```text
//! host thread          wake-detector thread          engine-runner thread
//! ───────────          ────────────────────          ────────────────────
//! build()  ──────────▶ (pending)
//! start()  ──────────▶ DetectionLoop::run
//! unpause() ─────────▶   AudioBridge ─frame─▶ ByteStream ─chunk─▶ Engine
//!                        take_detection ◀──── signal_detection ◀─ TriggerDetector
//!                        pause, callback()
//! terminate() ───────▶   exit, release device ──────────────────▶ stop engine
//! ```
//!
//! [`LoopControl`] is the only state shared between the three threads.

pub mod controller;
pub mod state;
pub mod worker;

pub use controller::{DetectorBuilder, DetectorError, DetectorHandle, WakeWordDetector};
pub use state::{LoopControl, LoopState};
pub use worker::{DetectionLoop, InterruptCheck, WakeCallback};
