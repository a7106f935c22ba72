use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::time::{Duration, Instant};

use super::features::{AudioSnapshot, EmitThrottle};
use super::pitch::PitchEstimator;
use crate::util::now_millis;

/// Roughly one display frame.
const TICK: Duration = Duration::from_millis(16);

pub struct CaptureSettings {
    pub device: Option<String>,
    pub frame_size: usize,
    pub emit_interval_ms: u64,
    pub estimator: PitchEstimator,
    pub seconds: Option<u64>,
}

/// Stream microphone input through the pitch estimator, handing each
/// throttled snapshot to `on_snapshot`.
pub fn listen<F>(settings: &CaptureSettings, mut on_snapshot: F) -> Result<()>
where
    F: FnMut(&AudioSnapshot) -> Result<()>,
{
    anyhow::ensure!(settings.frame_size > 0, "Frame size must be positive");

    let host = cpal::default_host();
    log::info!("Audio host: {}", host.id().name());

    let device = match settings.device.as_deref() {
        None | Some("default") => host.default_input_device().context("No default input found")?,
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .with_context(|| format!("Input device not found: {}", name))?,
    };
    log::info!("Using input device: {}", device.name().unwrap_or_default());

    let supported = device
        .default_input_config()
        .context("Failed to query input configuration")?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    log::info!("Capture format: {}Hz, {} channel(s)", sample_rate, channels);

    // Half a second of headroom between the callback and the analysis loop.
    let rb = HeapRb::<f32>::new((sample_rate as usize / 2).max(settings.frame_size * 2));
    let (mut prod, mut cons) = rb.split();

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _| {
            if channels <= 1 {
                let _ = prod.push_slice(data);
            } else {
                for frame in data.chunks(channels) {
                    let _ = prod.try_push(frame.iter().sum::<f32>() / channels as f32);
                }
            }
        },
        |err| log::warn!("Input stream error: {}", err),
        None,
    )?;
    stream.play().context("Failed to start input stream")?;

    let mut window = vec![0.0f32; settings.frame_size];
    let mut scratch = vec![0.0f32; settings.frame_size];
    let mut clock = EmitClock::new(settings.emit_interval_ms, Instant::now());
    let deadline = settings.seconds.map(|s| Instant::now() + Duration::from_secs(s));

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(TICK);

        while cons.occupied_len() > 0 {
            let read = cons.pop_slice(&mut scratch);
            if read == 0 {
                break;
            }
            slide_window(&mut window, &scratch[..read]);
        }

        if !clock.ready(Instant::now()) {
            continue;
        }
        let snapshot =
            AudioSnapshot::from_buffer(&window, sample_rate, &settings.estimator, now_millis());
        log::debug!("pitch={:.1}Hz volume={:.3}", snapshot.pitch, snapshot.volume);
        on_snapshot(&snapshot)?;
    }

    drop(stream);
    log::info!("Capture stopped");
    Ok(())
}

/// Throttle paced by a monotonic clock; wall time is only used to stamp
/// snapshots.
struct EmitClock {
    started: Instant,
    throttle: EmitThrottle,
}

impl EmitClock {
    fn new(interval_ms: u64, started: Instant) -> Self {
        Self {
            started,
            throttle: EmitThrottle::new(interval_ms),
        }
    }

    fn ready(&mut self, at: Instant) -> bool {
        let elapsed = at.saturating_duration_since(self.started).as_millis() as u64;
        self.throttle.ready(elapsed)
    }
}

/// Append `incoming` to a fixed-length window, dropping the oldest samples.
fn slide_window(window: &mut [f32], incoming: &[f32]) {
    let len = window.len();
    if incoming.len() >= len {
        window.copy_from_slice(&incoming[incoming.len() - len..]);
        return;
    }
    window.copy_within(incoming.len().., 0);
    window[len - incoming.len()..].copy_from_slice(incoming);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_latest_samples() {
        let mut window = vec![0.0, 1.0, 2.0, 3.0];
        slide_window(&mut window, &[4.0, 5.0]);
        assert_eq!(window, vec![2.0, 3.0, 4.0, 5.0]);

        slide_window(&mut window, &[6.0, 7.0, 8.0, 9.0, 10.0]);
        assert_eq!(window, vec![7.0, 8.0, 9.0, 10.0]);

        slide_window(&mut window, &[]);
        assert_eq!(window, vec![7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn clock_paces_from_start_instant() {
        let start = Instant::now();
        let at = |ms: u64| start + Duration::from_millis(ms);
        let mut clock = EmitClock::new(80, start);

        assert!(clock.ready(at(0)));
        assert!(!clock.ready(at(50)));
        assert!(!clock.ready(at(80)));
        assert!(clock.ready(at(81)));
        assert!(!clock.ready(at(120)));
        assert!(clock.ready(at(162)));
    }
}
