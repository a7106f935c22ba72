use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

use super::decode::AudioData;
use super::features::{AudioSnapshot, EmitThrottle, TickFeatures, VoiceHint};
use super::pitch::PitchEstimator;
use crate::util::round_to;

/// Tick layout and emission policy for offline analysis.
#[derive(Clone, Debug)]
pub struct AnalysisSettings {
    pub frame_size: usize,
    pub tick_rate: u32,
    pub emit_interval_ms: u64,
    pub estimator: PitchEstimator,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            tick_rate: 60,
            emit_interval_ms: 80,
            estimator: PitchEstimator::default(),
        }
    }
}

/// Whole-file statistics over every tick, emitted or not.
#[derive(Clone, Debug, Serialize)]
pub struct SignatureSummary {
    pub duration: f32,
    pub sample_rate: u32,
    pub ticks: usize,
    pub emitted: usize,
    pub voiced_ratio: f32,
    pub mean_pitch: f32,
    pub peak_volume: f32,
    pub dominant_hint: VoiceHint,
}

/// Analyze a decoded file tick by tick.
///
/// Features are measured in parallel since ticks are independent; the
/// emission throttle then runs in tick order.
pub fn analyze(
    audio: &AudioData,
    settings: &AnalysisSettings,
    progress: Option<&ProgressBar>,
) -> (SignatureSummary, Vec<AudioSnapshot>) {
    let ticks = tick_windows(audio.samples.len(), audio.sample_rate, settings.frame_size, settings.tick_rate);
    log::info!(
        "Analyzing {} ticks (frame={} samples, {} ticks/s)",
        ticks.len(),
        settings.frame_size,
        settings.tick_rate
    );

    if let Some(pb) = progress {
        pb.set_length(ticks.len() as u64);
    }

    let sr = audio.sample_rate;
    let features: Vec<TickFeatures> = ticks
        .par_iter()
        .map(|&(start, end)| {
            let time_ms = end as u64 * 1000 / sr.max(1) as u64;
            let tick = TickFeatures::measure(&audio.samples[start..end], sr, &settings.estimator, time_ms);
            if let Some(pb) = progress {
                pb.inc(1);
            }
            tick
        })
        .collect();

    let mut throttle = EmitThrottle::new(settings.emit_interval_ms);
    let snapshots: Vec<AudioSnapshot> = features
        .iter()
        .filter(|f| throttle.ready(f.time_ms))
        .map(AudioSnapshot::from_features)
        .collect();

    let summary = summarize(audio, &features, snapshots.len());
    log::info!(
        "Signature: {} ticks, {} emitted, voiced={:.0}%, mean pitch={:.1}Hz, dominant={}",
        summary.ticks,
        summary.emitted,
        summary.voiced_ratio * 100.0,
        summary.mean_pitch,
        summary.dominant_hint.as_str()
    );

    (summary, snapshots)
}

/// Sample ranges analysed at each tick.
///
/// Each tick sees the `frame_size` samples ending at its position. Ticks start
/// once a full frame is available; a file shorter than one frame gets a single
/// tick over everything it has.
pub fn tick_windows(len: usize, sample_rate: u32, frame_size: usize, tick_rate: u32) -> Vec<(usize, usize)> {
    if len == 0 || sample_rate == 0 || tick_rate == 0 || frame_size == 0 {
        return Vec::new();
    }
    if len < frame_size {
        return vec![(0, len)];
    }

    let hop = sample_rate as f64 / tick_rate as f64;
    let mut windows = Vec::new();
    let mut k = 0u64;
    loop {
        let end = frame_size + (k as f64 * hop).round() as usize;
        if end > len {
            break;
        }
        windows.push((end - frame_size, end));
        k += 1;
    }
    windows
}

fn summarize(audio: &AudioData, features: &[TickFeatures], emitted: usize) -> SignatureSummary {
    let voiced: Vec<f32> = features.iter().map(|f| f.pitch).filter(|&p| p > 0.0).collect();
    let voiced_ratio = if features.is_empty() {
        0.0
    } else {
        voiced.len() as f32 / features.len() as f32
    };
    let mean_pitch = if voiced.is_empty() {
        0.0
    } else {
        voiced.iter().sum::<f32>() / voiced.len() as f32
    };
    let peak_volume = features.iter().map(|f| f.volume).fold(0.0f32, f32::max);

    SignatureSummary {
        duration: audio.duration_secs(),
        sample_rate: audio.sample_rate,
        ticks: features.len(),
        emitted,
        voiced_ratio: round_to(voiced_ratio, 3),
        mean_pitch: round_to(mean_pitch, 1),
        peak_volume: round_to(peak_volume, 3),
        dominant_hint: dominant_hint(features),
    }
}

fn dominant_hint(features: &[TickFeatures]) -> VoiceHint {
    let mut counts: HashMap<VoiceHint, usize> = HashMap::new();
    for f in features {
        *counts.entry(VoiceHint::from_pitch(f.pitch)).or_insert(0) += 1;
    }
    // Ties resolve towards the calmer label.
    [VoiceHint::Calm, VoiceHint::Neutral, VoiceHint::Energetic]
        .into_iter()
        .fold((VoiceHint::Calm, 0usize), |best, hint| {
            let count = counts.get(&hint).copied().unwrap_or(0);
            if count > best.1 {
                (hint, count)
            } else {
                best
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, amplitude: f32, sample_rate: u32, secs: f32) -> AudioData {
        let len = (sample_rate as f32 * secs) as usize;
        let samples = (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        AudioData { samples, sample_rate }
    }

    #[test]
    fn windows_end_on_tick_positions() {
        let windows = tick_windows(48000, 48000, 2048, 60);
        assert_eq!(windows[0], (0, 2048));
        assert_eq!(windows[1], (800, 2848));
        assert!(windows.iter().all(|&(s, e)| e - s == 2048 && e <= 48000));
        // (48000 - 2048) / 800 = 57.44 -> ticks 0..=57
        assert_eq!(windows.len(), 58);
    }

    #[test]
    fn short_input_gets_single_window() {
        assert_eq!(tick_windows(500, 44100, 2048, 60), vec![(0, 500)]);
        assert!(tick_windows(0, 44100, 2048, 60).is_empty());
        assert!(tick_windows(5000, 0, 2048, 60).is_empty());
    }

    #[test]
    fn tone_is_voiced_and_throttled() {
        let audio = tone(180.0, 0.5, 44100, 1.0);
        let (summary, snapshots) = analyze(&audio, &AnalysisSettings::default(), None);

        assert_eq!(summary.sample_rate, 44100);
        assert!(summary.ticks > 50);
        assert_eq!(summary.emitted, snapshots.len());
        assert!(summary.emitted < summary.ticks);
        assert_eq!(summary.voiced_ratio, 1.0);
        assert!((summary.mean_pitch - 180.0).abs() < 9.0);
        assert_eq!(summary.dominant_hint, VoiceHint::Neutral);

        for pair in snapshots.windows(2) {
            assert!(pair[1].timestamp - pair[0].timestamp > 80);
        }
    }

    #[test]
    fn silence_is_calm_and_unvoiced() {
        let audio = AudioData {
            samples: vec![0.0; 44100],
            sample_rate: 44100,
        };
        let (summary, snapshots) = analyze(&audio, &AnalysisSettings::default(), None);
        assert_eq!(summary.voiced_ratio, 0.0);
        assert_eq!(summary.mean_pitch, 0.0);
        assert_eq!(summary.dominant_hint, VoiceHint::Calm);
        assert!(snapshots.iter().all(|s| !s.is_voiced()));
    }

    #[test]
    fn analysis_is_deterministic() {
        let audio = tone(330.0, 0.4, 48000, 0.5);
        let settings = AnalysisSettings::default();
        let (_, first) = analyze(&audio, &settings, None);
        let (_, second) = analyze(&audio, &settings, None);
        assert_eq!(first, second);
    }
}
