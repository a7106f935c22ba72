mod analytics;
mod audio;
mod cli;
mod config;
mod face;
mod util;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use analytics::events::{AuditSync, EventLog};
use analytics::timeline::{Metrics, MultimodalSample, Timeline};
use audio::analysis::{AnalysisSettings, SignatureSummary};
use audio::features::AudioSnapshot;
use audio::pitch::PitchEstimator;
use cli::{AnalyzeArgs, Cli, Command, ListenArgs, MatchArgs, TemplateAction};
use config::Config;
use face::recognition::{FaceSnapshot, FrameDetections, Recognizer};
use face::store::{default_store_path, TemplateStore};

#[derive(Serialize)]
struct AnalysisReport<'a> {
    summary: &'a SignatureSummary,
    metrics: Metrics,
    snapshots: &'a [AudioSnapshot],
    timeline: Vec<&'a MultimodalSample>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let cfg = match config::find_config(cli.config.as_deref()) {
        Some(path) => match config::load_config(&path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };

    match cli.command {
        Command::Analyze(args) => run_analyze(args, &cfg),
        Command::Listen(args) => run_listen(args, &cfg),
        Command::Match(args) => run_match(args, &cfg),
        Command::Templates { store, action } => run_templates(store, action, &cfg),
    }
}

fn estimator(cfg: &Config) -> PitchEstimator {
    PitchEstimator::new(cfg.audio.silence_threshold, cfg.audio.max_lag)
}

fn resolve_store_path(explicit: Option<PathBuf>, cfg: &Config) -> Result<PathBuf> {
    explicit
        .or_else(|| cfg.face.store.clone())
        .or_else(default_store_path)
        .context("Cannot determine template store location; pass --store")
}

fn run_analyze(mut args: AnalyzeArgs, cfg: &Config) -> Result<()> {
    // Config values apply only when the CLI is at its default
    if args.frame_size == 2048 { args.frame_size = cfg.audio.frame_size; }
    if args.tick_rate == 60 { args.tick_rate = cfg.audio.tick_rate; }
    if args.emit_interval_ms == 80 { args.emit_interval_ms = cfg.audio.emit_interval_ms; }

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    log::info!("Input: {}", args.input.display());

    // 1. Decode
    let audio_data = audio::decode::decode_file(&args.input)?;

    // 2. Per-tick signature
    let settings = AnalysisSettings {
        frame_size: args.frame_size,
        tick_rate: args.tick_rate,
        emit_interval_ms: args.emit_interval_ms,
        estimator: estimator(cfg),
    };
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ticks ({eta} remaining)")?
            .progress_chars("=>-"),
    );
    let (summary, snapshots) = audio::analysis::analyze(&audio_data, &settings, Some(&pb));
    pb.finish_with_message("Analysis complete");

    // 3. Merge with face snapshots into the timeline and audit log
    let faces: Vec<FaceSnapshot> = match args.faces {
        Some(ref path) => read_json_lines(path)?,
        None => Vec::new(),
    };
    if !faces.is_empty() {
        log::info!("Merging {} face snapshots", faces.len());
    }

    let mut timeline = Timeline::new(cfg.analytics.timeline_len);
    let mut events = EventLog::new(cfg.analytics.event_capacity);
    let mut sync = AuditSync::new(cfg.analytics.sync_delay_ms);
    merge_streams(&snapshots, &faces, &mut timeline, &mut sync, &mut events);
    sync.flush(&mut events);

    let metrics = timeline.metrics();
    log::info!(
        "Metrics: engagement={:.2} presence={:.2} vocal_energy={:.2} dominant={}",
        metrics.engagement,
        metrics.presence,
        metrics.vocal_energy,
        metrics.dominant_emotion
    );

    // 4. Report
    let report = AnalysisReport {
        summary: &summary,
        metrics,
        snapshots: &snapshots,
        timeline: timeline.samples().collect(),
    };
    match args.output {
        Some(ref path) => {
            write_json(path, &report)?;
            log::info!("Report written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if let Some(ref path) = args.events {
        write_json(path, &events)?;
        log::info!("{} audit events written to {}", events.len(), path.display());
    }

    Ok(())
}

/// Feed audio and face snapshots into the timeline in timestamp order; audio
/// goes first on equal timestamps.
fn merge_streams(
    audio: &[AudioSnapshot],
    faces: &[FaceSnapshot],
    timeline: &mut Timeline,
    sync: &mut AuditSync,
    events: &mut EventLog,
) {
    let (mut a, mut f) = (0, 0);
    while a < audio.len() || f < faces.len() {
        let take_audio = match (audio.get(a), faces.get(f)) {
            (Some(snap), Some(face)) => snap.timestamp <= face.timestamp,
            (Some(_), None) => true,
            _ => false,
        };
        let sample = if take_audio {
            a += 1;
            timeline.push_audio(&audio[a - 1]).clone()
        } else {
            f += 1;
            timeline.push_face(&faces[f - 1]).clone()
        };
        let now = sample.timestamp;
        sync.offer(sample, now, events);
    }
}

#[cfg(feature = "live")]
fn run_listen(mut args: ListenArgs, cfg: &Config) -> Result<()> {
    if args.frame_size == 2048 { args.frame_size = cfg.audio.frame_size; }

    let settings = audio::capture::CaptureSettings {
        device: args.device,
        frame_size: args.frame_size,
        emit_interval_ms: cfg.audio.emit_interval_ms,
        estimator: estimator(cfg),
        seconds: args.seconds,
    };

    let mut timeline = Timeline::new(cfg.analytics.timeline_len);
    let stdout = std::io::stdout();
    audio::capture::listen(&settings, |snapshot| {
        timeline.push_audio(snapshot);
        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, snapshot)?;
        writeln!(out)?;
        Ok(())
    })?;

    let metrics = timeline.metrics();
    log::info!(
        "Session: {} samples, vocal_energy={:.2}",
        timeline.len(),
        metrics.vocal_energy
    );
    Ok(())
}

#[cfg(not(feature = "live"))]
fn run_listen(_args: ListenArgs, _cfg: &Config) -> Result<()> {
    anyhow::bail!(
        "Microphone capture requires the 'live' feature. \
         Rebuild with: cargo build --features live"
    );
}

fn run_match(mut args: MatchArgs, cfg: &Config) -> Result<()> {
    if args.threshold == 0.6 { args.threshold = cfg.face.threshold; }

    let store_path = resolve_store_path(args.store, cfg)?;
    let store = TemplateStore::open(&store_path)?;
    store.require_consent()?;

    let frames: Vec<FrameDetections> = read_json_lines(&args.input)?;
    log::info!(
        "Matching {} frames against {} template(s), threshold={:.2}",
        frames.len(),
        store.templates().len(),
        args.threshold
    );

    let recognizer = Recognizer::new(args.threshold);
    let mut out = open_output(args.output.as_deref())?;
    let mut recognized = 0usize;
    for frame in &frames {
        let snapshot = recognizer.evaluate(frame, store.templates());
        if snapshot.recognition.is_some() {
            recognized += 1;
        }
        serde_json::to_writer(&mut out, &snapshot)?;
        writeln!(out)?;
    }
    out.flush()?;

    log::info!("Recognized a template in {}/{} frames", recognized, frames.len());
    Ok(())
}

fn run_templates(store: Option<PathBuf>, action: TemplateAction, cfg: &Config) -> Result<()> {
    let store_path = resolve_store_path(store, cfg)?;
    let mut store = TemplateStore::open(&store_path)?;

    match action {
        TemplateAction::List => {
            println!("Store: {}", store.path().display());
            println!("Consent: {}", if store.has_consent() { "accepted" } else { "pending" });
            println!("Templates:");
            for t in store.templates() {
                println!("  {:<16} {:<20} {} dims", t.id, t.name, t.descriptor.len());
            }
            println!("Captures:");
            for c in store.captures() {
                println!("  {:<16} {}", c.id, c.source);
            }
            return Ok(());
        }
        TemplateAction::Add { name, descriptor } => {
            let content = std::fs::read_to_string(&descriptor)
                .with_context(|| format!("Failed to read descriptor file: {}", descriptor.display()))?;
            let values: Vec<f32> = serde_json::from_str(&content)
                .with_context(|| format!("Descriptor must be a JSON array of numbers: {}", descriptor.display()))?;
            let t = store.add_template(&name, values)?;
            log::info!("Template \"{}\" saved with id {}", t.name, t.id);
        }
        TemplateAction::Remove { id } => {
            let t = store.remove_template(&id)?;
            log::info!("Template \"{}\" removed", t.name);
        }
        TemplateAction::Capture { source } => {
            let c = store.record_capture(&source);
            log::info!("Capture {} recorded", c.id);
        }
        TemplateAction::Consent => {
            store.accept_consent();
            log::info!("Consent recorded");
        }
        TemplateAction::Clear => {
            store.clear_all();
            log::info!("All templates, captures and consent removed");
        }
    }

    store.save()?;
    Ok(())
}

/// Parse one JSON value per non-empty line, skipping lines that fail to parse.
fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut items = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(item) => items.push(item),
            Err(e) => log::warn!("{}:{}: skipping malformed line: {}", path.display(), lineno + 1, e),
        }
    }
    Ok(items)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn open_output(path: Option<&Path>) -> Result<BufWriter<Box<dyn Write>>> {
    let sink: Box<dyn Write> = match path {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    Ok(BufWriter::new(sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::features::VoiceHint;

    fn audio_snap(timestamp: u64, volume: f32) -> AudioSnapshot {
        AudioSnapshot {
            timestamp,
            volume,
            pitch: 150.0,
            variability: 1.0,
            hint: VoiceHint::Neutral,
        }
    }

    fn face_snap(timestamp: u64, name: Option<&str>) -> FaceSnapshot {
        FaceSnapshot {
            timestamp,
            faces: 1,
            recognition: name.map(str::to_string),
            expression: Some("happy".to_string()),
            attention_score: 0.9,
            descriptor_distance: name.map(|_| 0.1),
        }
    }

    #[test]
    fn merges_streams_in_timestamp_order() {
        let audio = vec![audio_snap(0, 0.1), audio_snap(100, 0.2), audio_snap(700, 0.3)];
        let faces = vec![face_snap(100, Some("ana")), face_snap(1500, None)];
        let mut timeline = Timeline::default();
        let mut events = EventLog::default();
        let mut sync = AuditSync::new(500);

        merge_streams(&audio, &faces, &mut timeline, &mut sync, &mut events);
        sync.flush(&mut events);

        let stamps: Vec<u64> = timeline.samples().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![0, 100, 100, 700, 1500]);

        let last = timeline.samples().last().unwrap();
        assert_eq!(last.recognition.as_deref(), Some("ana"));
        assert_eq!(last.audio_energy, 0.3);

        let third = timeline.samples().nth(2).unwrap();
        assert_eq!(third.recognition.as_deref(), Some("ana"));
        assert_eq!(third.audio_energy, 0.2);

        // Bursts collapse to their latest sample: 100 (face), 700, 1500.
        let logged: Vec<u64> = events.events().map(|e| e.timestamp).collect();
        assert_eq!(logged, vec![100, 700, 1500]);
    }

    #[test]
    fn reads_json_lines_skipping_bad_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");
        std::fs::write(
            &path,
            "{\"timestamp\": 1, \"detections\": []}\n\nnot json\n{\"timestamp\": 2}\n",
        )
        .unwrap();
        let frames: Vec<FrameDetections> = read_json_lines(&path).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].timestamp, 2);
    }

    #[test]
    fn explicit_store_path_wins() {
        let cfg = Config::default();
        let path = resolve_store_path(Some(PathBuf::from("faces.json")), &cfg).unwrap();
        assert_eq!(path, PathBuf::from("faces.json"));
    }
}
