//! Engine trait and the subprocess-backed Precise implementation.
//!
//! # Overview
//!
//! [`Engine`] is the interface the runner drives: one chunk of PCM in, one
//! wake-word probability out.  It is object-safe and `Send` so a runner
//! thread can own a `Box<dyn Engine>`.
//!
//! [`PreciseEngine`] talks to the prebuilt `precise-engine` executable over
//! its stdio protocol: the process is started as
//! `precise-engine <model> <chunk_size>`, each chunk is written raw to its
//! stdin and it answers with one floating point probability per line.
//!
//! [`MockEngine`] (available under `#[cfg(test)]`) replays scripted
//! probabilities.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use thiserror::Error;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors raised while starting or talking to an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start engine {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine pipe I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine expected {expected}-byte chunks, got {got}")]
    ChunkSize { expected: usize, got: usize },

    #[error("engine returned an unparsable prediction: {0:?}")]
    BadPrediction(String),

    #[error("engine process exited")]
    Exited,
}

// ---------------------------------------------------------------------------
// Engine trait
// ---------------------------------------------------------------------------

/// Keyword-spotting inference backend.
///
/// # Contract
///
/// - `chunk` is 16 kHz mono 16-bit little-endian PCM.
/// - The returned probability is in `[0.0, 1.0]`.
pub trait Engine: Send {
    /// Score one chunk of audio.
    fn predict(&mut self, chunk: &[u8]) -> Result<f32, EngineError>;

    /// Release the backend.  Called once by the runner on shutdown.
    fn stop(&mut self) {}
}

// Compile-time assertion: Box<dyn Engine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Engine>) {}
};

// ---------------------------------------------------------------------------
// PreciseEngine
// ---------------------------------------------------------------------------

/// Wraps a running `precise-engine` child process.
pub struct PreciseEngine {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    chunk_size: usize,
    line: String,
}

impl std::fmt::Debug for PreciseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreciseEngine")
            .field("pid", &self.child.id())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl PreciseEngine {
    /// Start `executable` with `model` loaded.
    ///
    /// # Errors
    ///
    /// [`EngineError::Spawn`] if the executable cannot be launched.
    pub fn start(
        executable: impl AsRef<Path>,
        model: impl AsRef<Path>,
        chunk_size: usize,
    ) -> Result<Self, EngineError> {
        let executable = executable.as_ref();
        let mut child = Command::new(executable)
            .arg(model.as_ref())
            .arg(chunk_size.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: executable.to_path_buf(),
                source,
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Exited);
            }
        };

        log::debug!(
            "engine: started {} (pid {}, chunk {} bytes)",
            executable.display(),
            child.id(),
            chunk_size
        );

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            chunk_size,
            line: String::new(),
        })
    }
}

impl Engine for PreciseEngine {
    fn predict(&mut self, chunk: &[u8]) -> Result<f32, EngineError> {
        if chunk.len() != self.chunk_size {
            return Err(EngineError::ChunkSize {
                expected: self.chunk_size,
                got: chunk.len(),
            });
        }

        let stdin = self.stdin.as_mut().ok_or(EngineError::Exited)?;
        stdin.write_all(chunk)?;
        stdin.flush()?;

        self.line.clear();
        if self.stdout.read_line(&mut self.line)? == 0 {
            return Err(EngineError::Exited);
        }
        parse_prediction(&self.line)
    }

    fn stop(&mut self) {
        // Closing stdin lets the engine exit on its own; kill covers a hung one.
        drop(self.stdin.take());
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        match self.child.wait() {
            Ok(status) => log::debug!("engine: process exited with {status}"),
            Err(e) => log::warn!("engine: failed to reap process: {e}"),
        }
    }
}

impl Drop for PreciseEngine {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            self.stop();
        }
    }
}

fn parse_prediction(line: &str) -> Result<f32, EngineError> {
    let trimmed = line.trim();
    trimmed
        .parse::<f32>()
        .ok()
        .filter(|p| p.is_finite())
        .ok_or_else(|| EngineError::BadPrediction(trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// MockEngine  (test-only)
// ---------------------------------------------------------------------------

/// Handle used by tests to feed probabilities to a running [`MockEngine`].
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockScript {
    queue: std::sync::Mutex<std::collections::VecDeque<Result<f32, ()>>>,
    calls: std::sync::atomic::AtomicUsize,
    stopped: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockScript {
    /// Queue probabilities returned by the next predictions.
    pub fn push(&self, probs: &[f32]) {
        self.queue.lock().unwrap().extend(probs.iter().copied().map(Ok));
    }

    /// Queue an engine failure.
    pub fn push_failure(&self) {
        self.queue.lock().unwrap().push_back(Err(()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Scripted engine; returns `0.0` once the script runs dry.
#[cfg(test)]
pub struct MockEngine {
    script: std::sync::Arc<MockScript>,
}

#[cfg(test)]
impl MockEngine {
    pub fn new() -> (Self, std::sync::Arc<MockScript>) {
        let script = std::sync::Arc::new(MockScript::default());
        (
            Self {
                script: std::sync::Arc::clone(&script),
            },
            script,
        )
    }
}

#[cfg(test)]
impl Engine for MockEngine {
    fn predict(&mut self, _chunk: &[u8]) -> Result<f32, EngineError> {
        self.script
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.script.queue.lock().unwrap().pop_front() {
            Some(Ok(p)) => Ok(p),
            Some(Err(())) => Err(EngineError::Exited),
            None => Ok(0.0),
        }
    }

    fn stop(&mut self) {
        self.script
            .stopped
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
