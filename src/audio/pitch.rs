/// Buffers quieter than this RMS are treated as silence.
pub const SILENCE_THRESHOLD: f32 = 0.01;
/// Largest lag (exclusive) the autocorrelation scan will try.
pub const MAX_LAG: usize = 1024;

/// A rising score above this is tracked as a period candidate.
const CANDIDATE_THRESHOLD: f32 = 0.9;
/// A candidate must clear this before a falling score ends the scan.
const CONFIDENT_THRESHOLD: f32 = 0.92;

/// Time-domain autocorrelation pitch estimator.
///
/// Returns the fundamental frequency in Hz, or 0.0 when the buffer is silent
/// or no lag is periodic enough. It never fails: every degenerate input
/// collapses to 0.0.
#[derive(Clone, Copy, Debug)]
pub struct PitchEstimator {
    pub silence_threshold: f32,
    pub max_lag: usize,
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self {
            silence_threshold: SILENCE_THRESHOLD,
            max_lag: MAX_LAG,
        }
    }
}

impl PitchEstimator {
    pub fn new(silence_threshold: f32, max_lag: usize) -> Self {
        Self {
            silence_threshold,
            max_lag,
        }
    }

    pub fn estimate(&self, buf: &[f32], sample_rate: u32) -> f32 {
        if buf.is_empty() || sample_rate == 0 {
            return 0.0;
        }

        let level = rms(buf);
        if !level.is_finite() || level < self.silence_threshold {
            return 0.0;
        }

        let size = buf.len();
        let max_lag = self.max_lag.min(size);
        let scores = (0..max_lag).map(|lag| lag_score(buf, lag));

        match pick_lag(scores) {
            Some(lag) if lag > 0 => {
                let frequency = sample_rate as f32 / lag as f32;
                if frequency.is_finite() {
                    frequency
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

/// Estimate pitch with the default silence threshold and lag window.
pub fn detect_pitch(buf: &[f32], sample_rate: u32) -> f32 {
    PitchEstimator::default().estimate(buf, sample_rate)
}

/// Root-mean-square level of a buffer; 0.0 for an empty one.
pub fn rms(buf: &[f32]) -> f32 {
    if buf.is_empty() {
        return 0.0;
    }
    (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
}

/// Similarity of the buffer with itself shifted by `lag`, 1.0 = identical.
/// Callers keep `lag < buf.len()`.
fn lag_score(buf: &[f32], lag: usize) -> f32 {
    let overlap = buf.len() - lag;
    let diff: f32 = buf[..overlap]
        .iter()
        .zip(&buf[lag..])
        .map(|(a, b)| (a - b).abs())
        .sum();
    1.0 - diff / overlap as f32
}

/// Single forward scan over per-lag scores (index = lag).
///
/// Rising scores above the candidate threshold become the best lag. Once the
/// best score is confident, the first score below it ends the scan. A best
/// score between the two thresholds does not stop the scan.
fn pick_lag<I>(scores: I) -> Option<usize>
where
    I: IntoIterator<Item = f32>,
{
    let mut best_lag = None;
    let mut best_score = 0.0f32;
    let mut last_score = 1.0f32;

    for (lag, score) in scores.into_iter().enumerate() {
        if score > CANDIDATE_THRESHOLD && score > last_score {
            best_score = score;
            best_lag = Some(lag);
        } else if best_score > CONFIDENT_THRESHOLD && score < best_score {
            return best_lag;
        }
        last_score = score;
    }

    if best_score > CONFIDENT_THRESHOLD {
        best_lag
    } else {
        None
    }
}
