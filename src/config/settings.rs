//! Detector settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;

/// Latest-release metadata for the Precise engine builds.
pub const DEFAULT_RELEASE_URL: &str =
    "https://api.github.com/repos/MycroftAI/mycroft-precise/releases/latest";

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors raised while loading or saving `settings.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("settings could not be serialised: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Where the engine executable lives and where to fetch it from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit executable path.  `None` uses [`AppPaths::engine_executable`].
    pub executable: Option<PathBuf>,
    /// Release metadata endpoint returning `{ "assets": [...] }`.
    pub release_url: String,
    /// Asset names must start with this prefix...
    pub asset_prefix: String,
    /// ...and end with this suffix.
    pub asset_suffix: String,
    /// Upper bound for each HTTP request made during the first-run download.
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: None,
            release_url: DEFAULT_RELEASE_URL.into(),
            asset_prefix: AppPaths::ENGINE_NAME.into(),
            asset_suffix: ".tar.gz".into(),
            timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    /// Resolved executable path.
    pub fn executable_path(&self) -> PathBuf {
        self.executable
            .clone()
            .unwrap_or_else(|| AppPaths::new().engine_executable)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture.
///
/// The wire format handed to the engine is fixed: mono, 16-bit little-endian
/// PCM at 16 kHz.  Only the read granularity is tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Maximum number of bytes moved from the microphone to the engine per
    /// loop iteration (2048 bytes = 1024 samples = 64 ms).
    pub frame_bytes: usize,
    /// Redirect the process stderr to the null device while the audio
    /// backend opens the device.
    pub silence_backend_stderr: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_bytes: 2048,
            silence_backend_stderr: true,
        }
    }
}

// ---------------------------------------------------------------------------
// DetectorConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level detector configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use precise_wake::config::DetectorConfig;
///
/// let mut config = DetectorConfig::load().unwrap();
/// config.model_path = Some("hey-mycroft.pb".into());
/// config.sensitivity = 0.6;
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Trained keyword model handed to the engine.  Required.
    pub model_path: Option<PathBuf>,
    /// 0.0 – 1.0.  Larger values fire on lower engine probabilities.
    pub sensitivity: f32,
    /// Consecutive activated chunks required before an activation fires.
    pub trigger_level: u32,
    /// Bytes of PCM the engine consumes per prediction.
    pub chunk_size: usize,
    /// Platform tag used to pick the release asset.  `None` derives it from
    /// the compile target.
    pub platform: Option<String>,
    /// Seconds to wait after the engine starts before listening.  `None`
    /// picks a platform default (see [`DetectorConfig::startup_delay`]).
    pub startup_delay_secs: Option<u64>,
    /// Idle wait of the detection loop while paused or starved of audio.
    pub poll_interval_ms: u64,
    pub engine: EngineConfig,
    pub audio: AudioConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            sensitivity: 0.5,
            trigger_level: 3,
            chunk_size: 2048,
            platform: None,
            startup_delay_secs: None,
            poll_interval_ms: 10,
            engine: EngineConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(DetectorConfig::default())` when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Platform tag matched against release asset names.
    pub fn platform(&self) -> String {
        self.platform
            .clone()
            .unwrap_or_else(|| native_platform().to_string())
    }

    /// Delay between starting the engine and listening.
    ///
    /// The engine loads tensorflow on start, which takes around ten seconds
    /// on ARM boards; other platforms start without delay.
    pub fn startup_delay(&self) -> Duration {
        let secs = match self.startup_delay_secs {
            Some(secs) => secs,
            None if self.platform().starts_with("arm") => 10,
            None => 0,
        };
        Duration::from_secs(secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Release asset tag for the architecture this crate was compiled for.
pub fn native_platform() -> &'static str {
    match std::env::consts::ARCH {
        "arm" => "armv7l",
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
