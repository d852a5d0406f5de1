//! Thread-safe byte FIFO shared between a producer and a consumer thread.
//!
//! [`ByteStream`] is the glue between the microphone and the engine: the
//! cpal callback appends PCM bytes, the detection loop drains them in
//! frames, and the engine runner blocks until a full chunk is available.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use precise_wake::audio::ByteStream;
//!
//! let stream = ByteStream::new();
//! stream.write(&[1, 2, 3, 4]);
//! assert_eq!(stream.read(3), vec![1, 2, 3]);
//! assert_eq!(stream.read_exact_timeout(2, Duration::from_millis(5)), None);
//! assert_eq!(stream.read(8), vec![4]);
//! ```

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    buf: VecDeque<u8>,
    closed: bool,
}

/// Unbounded byte FIFO with blocking and non-blocking reads.
///
/// Once [`close`](Self::close)d, writes are dropped and blocked readers wake
/// up; bytes already buffered can still be read.
#[derive(Debug, Default)]
pub struct ByteStream {
    inner: Mutex<Inner>,
    readable: Condvar,
}

impl ByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `data` and wake any waiting reader.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.buf.extend(data);
        self.readable.notify_all();
    }

    /// Take up to `max` bytes without waiting.  May return an empty vector.
    pub fn read(&self, max: usize) -> Vec<u8> {
        let mut inner = self.lock();
        take(&mut inner.buf, max)
    }

    /// Take up to `max` bytes, waiting at most `timeout` for the first byte
    /// to arrive.  Returns an empty vector on timeout or when closed and
    /// drained.
    pub fn read_timeout(&self, max: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.buf.is_empty() && !inner.closed {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            inner = self
                .readable
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        take(&mut inner.buf, max)
    }

    /// Take exactly `n` bytes, waiting at most `timeout` for them.
    ///
    /// Returns `None` if fewer than `n` bytes arrived in time (nothing is
    /// consumed in that case) or the stream was closed before enough data
    /// arrived.
    pub fn read_exact_timeout(&self, n: usize, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.buf.len() < n && !inner.closed {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = self
                .readable
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if inner.buf.len() < n {
            return None;
        }
        Some(take(&mut inner.buf, n))
    }

    /// Discard everything buffered.
    pub fn clear(&self) {
        self.lock().buf.clear();
    }

    /// Stop accepting writes and wake all readers.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        self.readable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn take(buf: &mut VecDeque<u8>, max: usize) -> Vec<u8> {
    let n = max.min(buf.len());
    buf.drain(..n).collect()
}
