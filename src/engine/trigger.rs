//! Debouncing of per-chunk probabilities into activation events.

/// Audio span (in bytes of 16-bit PCM) that must pass after an activation
/// before the detector can fire again.
const REFRACTORY_BYTES: i64 = 8 * 2048;

/// Turns a stream of engine probabilities into discrete activations.
///
/// A chunk counts as activated when its probability exceeds
/// `1.0 - sensitivity`.  More than `trigger_level` consecutive activated
/// chunks fire once, after which the detector stays quiet for a refractory
/// window of `8 * 2048` bytes worth of chunks.  Activated chunks inside
/// that window restart it.
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    chunk_size: usize,
    sensitivity: f32,
    trigger_level: u32,
    activation: i64,
}

impl TriggerDetector {
    pub fn new(chunk_size: usize, sensitivity: f32, trigger_level: u32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            sensitivity,
            trigger_level,
            activation: 0,
        }
    }

    /// Feed one probability; returns `true` when an activation fires.
    pub fn update(&mut self, prob: f32) -> bool {
        let chunk_activated = prob > 1.0 - self.sensitivity;

        if chunk_activated || self.activation < 0 {
            self.activation += 1;
            let has_activated = self.activation > i64::from(self.trigger_level);
            if has_activated || (chunk_activated && self.activation < 0) {
                // Floor division: a partial chunk still counts as a whole one.
                self.activation = (-REFRACTORY_BYTES).div_euclid(self.chunk_size as i64);
            }
            return has_activated;
        }

        if self.activation > 0 {
            self.activation -= 1;
        }
        false
    }

    /// Forget any partial or refractory state.
    pub fn reset(&mut self) {
        self.activation = 0;
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn trigger_level(&self) -> u32 {
        self.trigger_level
    }
}
