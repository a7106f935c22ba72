use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::audio::features::AudioSnapshot;
use crate::face::recognition::FaceSnapshot;
use crate::util::round_to;

pub const DEFAULT_TIMELINE_LEN: usize = 60;

const UNDETERMINED: &str = "undetermined";

/// One row of the combined face + voice timeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MultimodalSample {
    pub timestamp: u64,
    pub faces: usize,
    pub recognition: Option<String>,
    pub expression: Option<String>,
    pub attention_score: f32,
    pub audio_energy: f32,
    pub pitch: f32,
    pub variability: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metrics {
    pub engagement: f32,
    pub presence: f32,
    pub vocal_energy: f32,
    pub dominant_emotion: String,
}

/// Bounded timeline where each new snapshot carries the other modality's
/// latest values forward.
#[derive(Clone, Debug)]
pub struct Timeline {
    samples: VecDeque<MultimodalSample>,
    capacity: usize,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(DEFAULT_TIMELINE_LEN)
    }
}

impl Timeline {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// A face snapshot without a recognition or expression keeps the
    /// previous sample's value for that field.
    pub fn push_face(&mut self, face: &FaceSnapshot) -> &MultimodalSample {
        let mut prev = self.samples.back().cloned().unwrap_or_default();
        self.push(MultimodalSample {
            timestamp: face.timestamp,
            faces: face.faces,
            recognition: face.recognition.clone().or(prev.recognition.take()),
            expression: face.expression.clone().or(prev.expression.take()),
            attention_score: face.attention_score,
            ..prev
        })
    }

    pub fn push_audio(&mut self, audio: &AudioSnapshot) -> &MultimodalSample {
        let prev = self.samples.back().cloned().unwrap_or_default();
        self.push(MultimodalSample {
            timestamp: audio.timestamp,
            audio_energy: audio.volume,
            pitch: audio.pitch,
            variability: audio.variability,
            ..prev
        })
    }

    fn push(&mut self, sample: MultimodalSample) -> &MultimodalSample {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        // Just pushed, so never empty.
        &self.samples[self.samples.len() - 1]
    }

    pub fn samples(&self) -> impl Iterator<Item = &MultimodalSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn metrics(&self) -> Metrics {
        if self.samples.is_empty() {
            return Metrics {
                engagement: 0.0,
                presence: 0.0,
                vocal_energy: 0.0,
                dominant_emotion: UNDETERMINED.to_string(),
            };
        }

        let n = self.samples.len() as f32;
        let mean = |f: fn(&MultimodalSample) -> f32| self.samples.iter().map(f).sum::<f32>() / n;
        let faces_avg = mean(|s| s.faces as f32);
        let attention_avg = mean(|s| s.attention_score);
        let vocal_avg = mean(|s| s.audio_energy);

        Metrics {
            engagement: round_to(attention_avg.min(1.0), 2),
            presence: round_to((faces_avg / 2.0).min(1.0), 2),
            vocal_energy: round_to((vocal_avg * 4.0).min(1.0), 2),
            dominant_emotion: self.dominant_expression().unwrap_or(UNDETERMINED).to_string(),
        }
    }

    /// Most frequent expression; ties go to the one seen first.
    fn dominant_expression(&self) -> Option<&str> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for expr in self.samples.iter().filter_map(|s| s.expression.as_deref()) {
            match counts.iter_mut().find(|(name, _)| *name == expr) {
                Some((_, count)) => *count += 1,
                None => counts.push((expr, 1)),
            }
        }
        // max_by_key keeps the last maximum; reversed, that is the first seen.
        counts
            .into_iter()
            .rev()
            .max_by_key(|&(_, count)| count)
            .map(|(name, _)| name)
    }
}
