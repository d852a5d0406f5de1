//! Dedicated thread that pumps PCM chunks through an [`Engine`].
//!
//! [`EngineRunner`] owns an input [`ByteStream`].  Whoever holds the runner
//! writes audio into [`EngineRunner::input`]; the `engine-runner` thread
//! takes exactly `chunk_size` bytes at a time, scores them and hands the
//! probability to a [`TriggerDetector`].  When the detector fires, the
//! activation handler runs on the runner thread.
//!
//! An engine error ends the runner thread.  The error is logged, the input
//! stream is closed so later writes are dropped, and no further activations
//! are produced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::process::{Engine, EngineError};
use super::trigger::TriggerDetector;
use crate::audio::ByteStream;

/// How long the runner thread blocks waiting for a full chunk before it
/// rechecks its stop flag.
const CHUNK_WAIT: Duration = Duration::from_millis(50);

/// Handle to a running engine thread.
pub struct EngineRunner {
    input: Arc<ByteStream>,
    paused: Arc<AtomicBool>,
    rearm: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EngineRunner {
    /// Spawn the runner thread.
    ///
    /// `on_activation` is called from the runner thread, at most once per
    /// activation reported by `trigger`.
    pub fn start<F>(
        mut engine: Box<dyn Engine>,
        mut trigger: TriggerDetector,
        chunk_size: usize,
        on_activation: F,
    ) -> Result<Self, EngineError>
    where
        F: Fn() + Send + 'static,
    {
        let input = Arc::new(ByteStream::new());
        let paused = Arc::new(AtomicBool::new(false));
        let rearm = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let thread_input = Arc::clone(&input);
        let thread_paused = Arc::clone(&paused);
        let thread_rearm = Arc::clone(&rearm);
        let thread_running = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("engine-runner".into())
            .spawn(move || {
                while thread_running.load(Ordering::Acquire) {
                    let Some(chunk) = thread_input.read_exact_timeout(chunk_size, CHUNK_WAIT)
                    else {
                        if thread_input.is_closed() {
                            break;
                        }
                        continue;
                    };

                    if thread_paused.load(Ordering::Acquire) {
                        continue;
                    }
                    if thread_rearm.swap(false, Ordering::AcqRel) {
                        trigger.reset();
                    }

                    match engine.predict(&chunk) {
                        Ok(prob) => {
                            log::trace!("engine-runner: prediction {prob:.3}");
                            if trigger.update(prob) {
                                on_activation();
                            }
                        }
                        Err(e) => {
                            log::error!("engine-runner: engine failed, detection stopped: {e}");
                            break;
                        }
                    }
                }

                thread_input.close();
                thread_input.clear();
                thread_running.store(false, Ordering::Release);
                engine.stop();
                log::debug!("engine-runner: finished");
            })
            .map_err(EngineError::Io)?;

        Ok(Self {
            input,
            paused,
            rearm,
            running,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stream the runner consumes.  Write 16 kHz mono 16-bit PCM here.
    pub fn input(&self) -> Arc<ByteStream> {
        Arc::clone(&self.input)
    }

    /// Keep draining input but skip inference.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume inference on fresh audio.  Anything queued while paused is
    /// dropped and the trigger starts from a clean state.
    pub fn play(&self) {
        self.input.clear();
        self.rearm.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// `false` once the thread has exited (stopped or engine failure).
    pub fn is_alive(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self
                .thread
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|t| !t.is_finished())
    }

    /// Stop the thread and release the engine.  Safe to call repeatedly.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.input.close();

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            // An activation handler that stops the runner must not join itself.
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                log::error!("engine-runner: thread panicked");
            }
        }
    }
}

impl Drop for EngineRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::process::MockEngine;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const CHUNK: usize = 8;

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn start_counting() -> (EngineRunner, Arc<crate::engine::process::MockScript>, Arc<AtomicUsize>) {
        let (engine, script) = MockEngine::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let runner = EngineRunner::start(
            Box::new(engine),
            TriggerDetector::new(CHUNK, 0.5, 0),
            CHUNK,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        (runner, script, fired)
    }

    #[test]
    fn activation_handler_runs_on_trigger() {
        let (runner, script, fired) = start_counting();
        script.push(&[0.1, 0.9]);

        runner.input().write(&[0; CHUNK * 2]);
        assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1));
        assert_eq!(script.calls(), 2);
    }

    #[test]
    fn partial_chunks_wait_for_more_audio() {
        let (runner, script, _fired) = start_counting();
        runner.input().write(&[0; CHUNK - 1]);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(script.calls(), 0);

        runner.input().write(&[0; 1]);
        assert!(wait_until(|| script.calls() == 1));
    }

    #[test]
    fn paused_runner_skips_inference() {
        let (runner, script, fired) = start_counting();
        runner.pause();
        assert!(runner.is_paused());
        script.push(&[0.9]);

        runner.input().write(&[0; CHUNK * 3]);
        assert!(wait_until(|| runner.input().is_empty()));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(script.calls(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        runner.play();
        runner.input().write(&[0; CHUNK]);
        assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn engine_failure_ends_the_thread() {
        let (runner, script, fired) = start_counting();
        script.push_failure();
        runner.input().write(&[0; CHUNK]);

        assert!(wait_until(|| !runner.is_alive()));
        assert!(script.is_stopped());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dead_runner_drops_further_input() {
        let (runner, script, _fired) = start_counting();
        script.push_failure();
        runner.input().write(&[0; CHUNK]);
        assert!(wait_until(|| !runner.is_alive()));

        for _ in 0..100 {
            runner.input().write(&[0; 320]);
        }
        assert!(runner.input().is_closed());
        assert!(runner.input().is_empty());
    }

    #[test]
    fn play_rearms_the_trigger() {
        let (runner, script, fired) = start_counting();
        script.push(&[0.9]);
        runner.input().write(&[0; CHUNK]);
        assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1));

        // Still inside the refractory window, but play() starts it over.
        runner.pause();
        runner.play();
        script.push(&[0.9]);
        runner.input().write(&[0; CHUNK]);
        assert!(wait_until(|| fired.load(Ordering::SeqCst) == 2));
    }

    #[test]
    fn stop_joins_and_stops_engine() {
        let (runner, script, _fired) = start_counting();
        runner.stop();
        runner.stop();
        assert!(!runner.is_alive());
        assert!(script.is_stopped());
        assert!(runner.input().is_closed());
    }
}
