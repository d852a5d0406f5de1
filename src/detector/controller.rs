//! Host-facing facade: [`DetectorBuilder`] and [`WakeWordDetector`].
//!
//! Construction does all the fallible work up front, before any
//! detection thread exists:
//!
//! 1. validate the callback, the model path and the tuning parameters;
//! 2. make sure the engine executable is installed (downloading it on
//!    first run) and spawn it, unless the host injected an [`Engine`];
//! 3. open the default microphone, unless the host supplied a stream;
//! 4. start the engine runner, paused.
//!
//! [`WakeWordDetector::start`] then spawns the `wake-detector` thread,
//! which stays paused until the host calls
//! [`unpause`](WakeWordDetector::unpause).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use super::state::{LoopControl, LoopState};
use super::worker::{DetectionLoop, InterruptCheck, WakeCallback};
use crate::audio::{AudioBridge, ByteStream, CaptureError};
use crate::config::{AppPaths, DetectorConfig};
use crate::engine::{
    AcquireError, Engine, EngineAcquirer, EngineError, EngineRunner, PreciseEngine,
    TriggerDetector,
};

// ---------------------------------------------------------------------------
// DetectorError
// ---------------------------------------------------------------------------

/// Everything that can stop a detector from being built or started.
///
/// The configuration variants are raised before any thread or device is
/// touched.  [`EngineUnavailable`](Self::EngineUnavailable) means wake-word
/// detection cannot run on this machine; hosts should disable the feature
/// rather than exit.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("no wake callback was provided")]
    MissingCallback,

    #[error("no model path was provided")]
    MissingModelPath,

    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("sensitivity must be within 0.0..=1.0, got {0}")]
    InvalidSensitivity(f32),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("wake-word engine unavailable: {0}")]
    EngineUnavailable(#[from] AcquireError),

    #[error("audio device error: {0}")]
    Device(#[from] CaptureError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("failed to spawn detection thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("detector has been terminated")]
    Terminated,
}

// ---------------------------------------------------------------------------
// DetectorBuilder
// ---------------------------------------------------------------------------

/// Collects options for a [`WakeWordDetector`].
///
/// ```rust,no_run
/// use precise_wake::config::DetectorConfig;
/// use precise_wake::detector::WakeWordDetector;
///
/// let mut config = DetectorConfig::default();
/// config.model_path = Some("hey-mycroft.pb".into());
///
/// let detector = WakeWordDetector::builder(config)
///     .callback(|| println!("wake word!"))
///     .build()?;
/// detector.start()?;
/// detector.unpause();
/// # Ok::<(), precise_wake::detector::DetectorError>(())
/// ```
pub struct DetectorBuilder {
    config: DetectorConfig,
    callback: Option<WakeCallback>,
    audio: Option<Arc<ByteStream>>,
    engine: Option<Box<dyn Engine>>,
    interrupt: Option<InterruptCheck>,
}

impl DetectorBuilder {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            callback: None,
            audio: None,
            engine: None,
            interrupt: None,
        }
    }

    /// Called on the detection thread each time the wake word is heard.
    /// The detector is already paused when it runs.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Read 16 kHz mono 16-bit little-endian PCM from `stream` instead of
    /// opening the default microphone.
    pub fn audio_stream(mut self, stream: Arc<ByteStream>) -> Self {
        self.audio = Some(stream);
        self
    }

    /// Use `engine` instead of downloading and spawning `precise-engine`.
    pub fn engine(mut self, engine: Box<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Stop the detection thread once `check` returns `true`.  It is polled
    /// between frames.
    pub fn interrupt_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.interrupt = Some(Box::new(check));
        self
    }

    /// Validate the options and bring up the engine and audio source.
    ///
    /// This blocks: a first run downloads the engine, and a spawned engine
    /// gets its startup delay (10 s on ARM).  Async hosts should call it
    /// from `spawn_blocking` or a plain thread.  When the executable is
    /// already present no HTTP client is created.
    ///
    /// # Errors
    ///
    /// Configuration variants when an option is missing or out of range,
    /// [`DetectorError::EngineUnavailable`] when the engine cannot be
    /// installed, [`DetectorError::Device`] when the microphone cannot be
    /// opened and [`DetectorError::Engine`] when the engine fails to start.
    pub fn build(self) -> Result<WakeWordDetector, DetectorError> {
        let Self {
            config,
            callback,
            audio,
            engine,
            interrupt,
        } = self;

        let callback = callback.ok_or(DetectorError::MissingCallback)?;
        let requested = config
            .model_path
            .clone()
            .ok_or(DetectorError::MissingModelPath)?;
        let model = AppPaths::new()
            .resolve_model(&requested)
            .ok_or(DetectorError::ModelNotFound(requested))?;
        if !(0.0..=1.0).contains(&config.sensitivity) {
            return Err(DetectorError::InvalidSensitivity(config.sensitivity));
        }
        if config.chunk_size == 0 {
            return Err(DetectorError::InvalidChunkSize);
        }

        let (engine, spawned) = match engine {
            Some(engine) => (engine, false),
            None => {
                let exe = config.engine.executable_path();
                if !exe.exists() {
                    EngineAcquirer::new(&config.engine)?
                        .ensure_present(&exe, &config.platform())?;
                }
                let engine: Box<dyn Engine> =
                    Box::new(PreciseEngine::start(&exe, &model, config.chunk_size)?);
                (engine, true)
            }
        };

        let bridge = match audio {
            Some(stream) => AudioBridge::from_stream(stream),
            None => AudioBridge::open(&config.audio)?,
        };

        let control = Arc::new(LoopControl::new());
        let signal = Arc::clone(&control);
        let trigger = TriggerDetector::new(
            config.chunk_size,
            config.sensitivity,
            config.trigger_level,
        );
        let runner = Arc::new(EngineRunner::start(
            engine,
            trigger,
            config.chunk_size,
            move || signal.signal_detection(),
        )?);
        runner.pause();

        if spawned {
            let delay = config.startup_delay();
            if !delay.is_zero() {
                log::info!("wake-detector: waiting {delay:?} for the engine to load");
                thread::sleep(delay);
            }
        }

        let mut worker = DetectionLoop::new(
            Arc::clone(&control),
            Arc::clone(&runner),
            bridge,
            callback,
            config.audio.frame_bytes,
            config.poll_interval(),
        );
        if let Some(check) = interrupt {
            worker = worker.with_interrupt(check);
        }

        log::debug!("wake-detector: built with model {}", model.display());
        Ok(WakeWordDetector {
            handle: DetectorHandle { control, runner },
            pending: Mutex::new(Some(worker)),
            thread: Mutex::new(None),
            terminated: AtomicBool::new(false),
        })
    }
}

// ---------------------------------------------------------------------------
// DetectorHandle
// ---------------------------------------------------------------------------

/// Cloneable pause/unpause handle, usable from inside the wake callback.
#[derive(Clone)]
pub struct DetectorHandle {
    control: Arc<LoopControl>,
    runner: Arc<EngineRunner>,
}

impl DetectorHandle {
    /// Stop listening.  No callback fires until [`unpause`](Self::unpause).
    pub fn pause(&self) {
        // Runner first, so a racing unpause always wins with a live runner.
        self.runner.pause();
        if self.control.pause() {
            log::info!("wake-detector: paused");
        }
    }

    /// Resume listening on fresh audio.  Any activation from before the
    /// call is discarded.
    pub fn unpause(&self) {
        if self.control.state() != LoopState::Paused {
            return;
        }
        self.runner.play();
        if self.control.resume() {
            log::info!("wake-detector: listening");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.control.state() == LoopState::Paused
    }
}

// ---------------------------------------------------------------------------
// WakeWordDetector
// ---------------------------------------------------------------------------

/// Background wake-word detector.
///
/// Starts paused.  After each detection the detector pauses itself and
/// runs the callback once; call [`unpause`](Self::unpause) to listen again.
/// Dropping the detector terminates it.
pub struct WakeWordDetector {
    handle: DetectorHandle,
    pending: Mutex<Option<DetectionLoop>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    terminated: AtomicBool,
}

impl WakeWordDetector {
    pub fn builder(config: DetectorConfig) -> DetectorBuilder {
        DetectorBuilder::new(config)
    }

    fn thread_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the detection thread.  Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// [`DetectorError::Terminated`] after [`terminate`](Self::terminate),
    /// [`DetectorError::Spawn`] if the OS refuses a new thread.
    pub fn start(&self) -> Result<(), DetectorError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(DetectorError::Terminated);
        }

        let mut slot = self.thread_slot();
        if slot.is_some() {
            return Ok(());
        }
        let Some(worker) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Err(DetectorError::Terminated);
        };

        match thread::Builder::new()
            .name("wake-detector".into())
            .spawn(move || worker.run())
        {
            Ok(thread) => {
                *slot = Some(thread);
                log::debug!("wake-detector: started");
                Ok(())
            }
            Err(e) => {
                drop(slot);
                self.terminate();
                Err(DetectorError::Spawn(e))
            }
        }
    }

    pub fn pause(&self) {
        self.handle.pause();
    }

    pub fn unpause(&self) {
        self.handle.unpause();
    }

    pub fn is_paused(&self) -> bool {
        self.handle.is_paused()
    }

    /// `true` while the detection thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.control.state() != LoopState::Stopped
            && self.thread_slot().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Handle for pausing and unpausing from other threads or from inside
    /// the callback.
    pub fn handle(&self) -> DetectorHandle {
        self.handle.clone()
    }

    /// Stop the detection thread, release the audio device and stop the
    /// engine.  Only the first call has an effect.
    ///
    /// Safe to call from the wake callback; the detection thread then
    /// exits on its own after the callback returns.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.handle.control.stop();

        // Never started: dropping the worker releases the bridge.
        drop(
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let thread = self.thread_slot().take();
        if let Some(thread) = thread {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                log::error!("wake-detector: detection thread panicked");
            }
        }

        self.handle.runner.stop();
        log::info!("wake-detector: terminated");
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl Drop for WakeWordDetector {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
