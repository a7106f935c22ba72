use serde::{Deserialize, Serialize};

use super::pitch::{rms, PitchEstimator};
use crate::util::round_to;

/// Coarse vocal label derived from pitch alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceHint {
    Calm,
    Neutral,
    Energetic,
}

impl VoiceHint {
    pub fn from_pitch(pitch: f32) -> Self {
        if pitch > 220.0 {
            VoiceHint::Energetic
        } else if pitch > 80.0 {
            VoiceHint::Neutral
        } else {
            VoiceHint::Calm
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceHint::Calm => "calm",
            VoiceHint::Neutral => "neutral",
            VoiceHint::Energetic => "energetic",
        }
    }
}

/// Raw per-tick measurements before rounding.
#[derive(Clone, Copy, Debug)]
pub struct TickFeatures {
    /// Time in milliseconds
    pub time_ms: u64,
    /// RMS level of the analysis buffer
    pub volume: f32,
    /// Estimated pitch in Hz, 0.0 when undetermined
    pub pitch: f32,
}

impl TickFeatures {
    pub fn measure(buffer: &[f32], sample_rate: u32, estimator: &PitchEstimator, time_ms: u64) -> Self {
        Self {
            time_ms,
            volume: rms(buffer),
            pitch: estimator.estimate(buffer, sample_rate),
        }
    }
}

/// What a listener sees once per emission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioSnapshot {
    pub timestamp: u64,
    pub volume: f32,
    pub pitch: f32,
    pub variability: f32,
    pub hint: VoiceHint,
}

impl AudioSnapshot {
    pub fn from_features(features: &TickFeatures) -> Self {
        let variability = round_to(features.volume * 10.0 + features.pitch / 800.0, 3);
        Self {
            timestamp: features.time_ms,
            volume: round_to(features.volume, 3),
            pitch: round_to(features.pitch, 1),
            variability,
            hint: VoiceHint::from_pitch(features.pitch),
        }
    }

    pub fn from_buffer(buffer: &[f32], sample_rate: u32, estimator: &PitchEstimator, timestamp: u64) -> Self {
        Self::from_features(&TickFeatures::measure(buffer, sample_rate, estimator, timestamp))
    }

    pub fn is_voiced(&self) -> bool {
        self.pitch > 0.0
    }
}

/// Rate limiter for snapshot emission.
///
/// A tick passes when nothing has been emitted yet or strictly more than
/// `interval_ms` has elapsed since the last emitted tick.
#[derive(Clone, Debug)]
pub struct EmitThrottle {
    interval_ms: u64,
    last_emit: Option<u64>,
}

impl EmitThrottle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_emit: None,
        }
    }

    pub fn ready(&mut self, now_ms: u64) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > self.interval_ms,
        };
        if due {
            self.last_emit = Some(now_ms);
        }
        due
    }
}
