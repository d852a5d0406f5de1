//! Audio side of the detector: microphone capture → PCM conversion → byte stream.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → downmix_to_mono → resample_to_16k
//!           → f32_to_pcm16le → ByteStream → DetectionLoop → engine
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use precise_wake::audio::AudioBridge;
//! use precise_wake::config::AudioConfig;
//!
//! let mut bridge = AudioBridge::open(&AudioConfig::default()).unwrap();
//! bridge.set_capturing(true);
//! let frame = bridge.read_frame(2048, Duration::from_millis(10));
//! println!("read {} bytes of 16 kHz PCM", frame.len());
//! bridge.terminate();
//! ```

pub mod capture;
pub mod convert;
pub mod silence;
pub mod stream;

pub use capture::{AudioBridge, CaptureError};
pub use convert::{
    downmix_to_mono, f32_to_pcm16le, resample_to_16k, to_engine_pcm, TARGET_SAMPLE_RATE,
};
pub use silence::{with_silenced_stderr, StderrSilencer};
pub use stream::ByteStream;
