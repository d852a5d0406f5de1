//! Microphone capture via `cpal`, exposed as a byte stream.
//!
//! [`AudioBridge`] opens the default input device, converts every callback
//! buffer to 16 kHz mono 16-bit PCM and appends it to a shared
//! [`ByteStream`].  The detection loop drains that stream frame by frame.
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream is created
//! and owned by a dedicated `audio-bridge` thread.  The bridge itself only
//! holds the stop channel and can move freely between threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use thiserror::Error;

use super::convert::to_engine_pcm;
use super::silence::with_silenced_stderr;
use super::stream::ByteStream;
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the microphone.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported input sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to spawn audio-bridge thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("audio-bridge thread exited before reporting the device state")]
    BridgeGone,
}

/// Native format reported by the opened device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeviceFormat {
    sample_rate: u32,
    channels: u16,
}

struct DeviceOwner {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// AudioBridge
// ---------------------------------------------------------------------------

/// Readable byte source fed by a live microphone (or by the caller).
///
/// Capture starts gated off: samples are discarded until
/// [`set_capturing`](Self::set_capturing) turns it on.
pub struct AudioBridge {
    buffer: Arc<ByteStream>,
    capturing: Arc<AtomicBool>,
    device: Option<DeviceOwner>,
    terminated: bool,
}

impl AudioBridge {
    /// Open the system default input device.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NoDevice`] when no input device is present,
    /// or the cpal error that prevented the stream from starting (device
    /// busy, unsupported configuration, ...).
    pub fn open(config: &AudioConfig) -> Result<Self, CaptureError> {
        let buffer = Arc::new(ByteStream::new());
        let capturing = Arc::new(AtomicBool::new(false));
        let silence = config.silence_backend_stderr;

        let (ready_tx, ready_rx) = mpsc::channel::<Result<DeviceFormat, CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_buffer = Arc::clone(&buffer);
        let thread_capturing = Arc::clone(&capturing);
        let thread = thread::Builder::new()
            .name("audio-bridge".into())
            .spawn(move || {
                let opened =
                    with_silenced_stderr(silence, || open_stream(thread_buffer, thread_capturing));
                match opened {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        // Blocks until terminate() sends or the bridge is dropped.
                        let _ = stop_rx.recv();
                        if let Err(e) = stream.pause() {
                            log::debug!("audio-bridge: pause on shutdown failed: {e}");
                        }
                        drop(stream);
                        log::debug!("audio-bridge: device released");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(CaptureError::Thread)?;

        let format = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(CaptureError::BridgeGone);
            }
        };

        log::info!(
            "audio-bridge: capturing from default input ({} Hz, {} ch)",
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            buffer,
            capturing,
            device: Some(DeviceOwner { stop_tx, thread }),
            terminated: false,
        })
    }

    /// Wrap a caller-fed stream instead of opening a device.
    ///
    /// The caller writes 16 kHz mono 16-bit little-endian PCM into `stream`.
    pub fn from_stream(stream: Arc<ByteStream>) -> Self {
        Self {
            buffer: stream,
            capturing: Arc::new(AtomicBool::new(false)),
            device: None,
            terminated: false,
        }
    }

    /// Take up to `max` bytes, waiting at most `timeout` for data.
    ///
    /// An empty result is an underrun, not an error.
    pub fn read_frame(&self, max: usize, timeout: Duration) -> Vec<u8> {
        self.buffer.read_timeout(max, timeout)
    }

    /// Gate the microphone callback.  Turning capture on drops any audio
    /// buffered before the call.
    pub fn set_capturing(&self, on: bool) {
        if on {
            self.buffer.clear();
        }
        self.capturing.store(on, Ordering::Release);
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    /// `true` once the buffer is closed and no more audio will arrive.
    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    /// Stop the stream, close the buffer and release the device.
    ///
    /// Only the first call has an effect.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.capturing.store(false, Ordering::Release);
        self.buffer.close();

        if let Some(owner) = self.device.take() {
            let _ = owner.stop_tx.send(());
            if owner.thread.join().is_err() {
                log::error!("audio-bridge: owner thread panicked");
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for AudioBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ---------------------------------------------------------------------------
// Stream construction
// ---------------------------------------------------------------------------

fn open_stream(
    buffer: Arc<ByteStream>,
    capturing: Arc<AtomicBool>,
) -> Result<(cpal::Stream, DeviceFormat), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    let supported = device.default_input_config()?;
    let sample_format = supported.sample_format();
    let format = DeviceFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build::<f32>(&device, &config, format, buffer, capturing)?,
        cpal::SampleFormat::I16 => build::<i16>(&device, &config, format, buffer, capturing)?,
        cpal::SampleFormat::U16 => build::<u16>(&device, &config, format, buffer, capturing)?,
        cpal::SampleFormat::I32 => build::<i32>(&device, &config, format, buffer, capturing)?,
        other => return Err(CaptureError::UnsupportedFormat(other)),
    };

    stream.play()?;
    Ok((stream, format))
}

fn build<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: DeviceFormat,
    buffer: Arc<ByteStream>,
    capturing: Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !capturing.load(Ordering::Acquire) {
                return;
            }
            let samples: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
            buffer.write(&to_engine_pcm(&samples, format.channels, format.sample_rate));
        },
        |err: cpal::StreamError| {
            log::error!("audio-bridge: stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
