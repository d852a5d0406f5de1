//! Configuration module for the wake-word detector.
//!
//! Provides `DetectorConfig` (top-level settings), sub-configs for the engine
//! and audio capture, `AppPaths` for cross-platform data directories, and
//! TOML persistence via `DetectorConfig::load` / `DetectorConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    native_platform, AudioConfig, ConfigError, DetectorConfig, EngineConfig, DEFAULT_RELEASE_URL,
};
