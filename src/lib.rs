//! Background wake-word detection on top of the Mycroft Precise engine.
//!
//! A [`WakeWordDetector`] listens to the default microphone, streams
//! 16 kHz mono PCM into a `precise-engine` subprocess and calls a host
//! callback each time the wake word is heard.  The engine executable is
//! downloaded from the project's GitHub releases on first use.
//!
//! ```rust,no_run
//! use precise_wake::{DetectorConfig, WakeWordDetector};
//!
//! let mut config = DetectorConfig::load().unwrap_or_default();
//! config.model_path = Some("hey-mycroft.pb".into());
//!
//! let detector = WakeWordDetector::builder(config)
//!     .callback(|| println!("wake word!"))
//!     .build()?;
//! detector.start()?;
//! detector.unpause();
//! # Ok::<(), precise_wake::DetectorError>(())
//! ```

pub mod audio;
pub mod config;
pub mod detector;
pub mod engine;

pub use config::DetectorConfig;
pub use detector::{DetectorBuilder, DetectorError, DetectorHandle, WakeWordDetector};
