//! Keyword-spotting engine glue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  EngineAcquirer ── ensure_present ──▶ precise-engine exe │
//! │                                              │           │
//! │                                              ▼           │
//! │  ByteStream ──▶ EngineRunner ──▶ PreciseEngine (stdio)   │
//! │   (input)       "engine-runner"        │                 │
//! │                       ▲                ▼ probability     │
//! │                       └──── TriggerDetector ──▶ on_activation
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use precise_wake::config::DetectorConfig;
//! use precise_wake::engine::{EngineAcquirer, EngineRunner, PreciseEngine, TriggerDetector};
//!
//! let config = DetectorConfig::default();
//! let exe = config.engine.executable_path();
//! EngineAcquirer::new(&config.engine)?.ensure_present(&exe, &config.platform())?;
//!
//! let engine = PreciseEngine::start(&exe, "hey-mycroft.pb", config.chunk_size)?;
//! let trigger = TriggerDetector::new(config.chunk_size, config.sensitivity, config.trigger_level);
//! let runner = EngineRunner::start(Box::new(engine), trigger, config.chunk_size, || {
//!     println!("wake word!");
//! })?;
//! runner.input().write(&[0u8; 2048]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acquire;
pub mod process;
pub mod runner;
pub mod trigger;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use acquire::{install_root, AcquireError, Acquisition, EngineAcquirer, ReleaseAsset};
pub use process::{Engine, EngineError, PreciseEngine};
pub use runner::EngineRunner;
pub use trigger::TriggerDetector;

#[cfg(test)]
pub use process::{MockEngine, MockScript};
