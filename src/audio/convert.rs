//! PCM conversion from the device's native format to the engine's format.
//!
//! The engine consumes **16 kHz mono 16-bit little-endian** PCM.  Devices
//! usually deliver interleaved `f32` at 44.1 or 48 kHz, so each callback
//! buffer goes through:
//!
//! 1. [`downmix_to_mono`]: average interleaved channels.
//! 2. [`resample_to_16k`]: linear interpolation to 16 000 Hz.
//! 3. [`f32_to_pcm16le`]: clamp, scale and serialise.

/// Sample rate the engine expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// * `channels == 1` returns the input as an owned `Vec`.
/// * `channels == 0` returns an empty vector.
///
/// ```rust
/// use precise_wake::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample_to_16k
// ---------------------------------------------------------------------------

/// Resample `samples` from `source_rate` Hz to 16 000 Hz using linear
/// interpolation.
///
/// Each cpal buffer is resampled on its own, so interpolation does not
/// carry across buffer boundaries.  That is inaudible to the engine.
pub fn resample_to_16k(samples: &[f32], source_rate: u32) -> Vec<f32> {
    if source_rate == TARGET_SAMPLE_RATE || source_rate == 0 {
        return samples.to_vec();
    }

    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = TARGET_SAMPLE_RATE as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = match (samples.get(idx), samples.get(idx + 1)) {
            (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
            (Some(a), None) => *a,
            _ => 0.0,
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// f32_to_pcm16le
// ---------------------------------------------------------------------------

/// Convert `[-1.0, 1.0]` samples to 16-bit little-endian PCM bytes.
///
/// Out-of-range samples are clamped.
pub fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Full device-buffer → engine-bytes conversion.
pub fn to_engine_pcm(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<u8> {
    let mono = downmix_to_mono(samples, channels);
    let resampled = resample_to_16k(&mono, sample_rate);
    f32_to_pcm16le(&resampled)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
