use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub face: FaceConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default = "default_max_lag")]
    pub max_lag: usize,
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    #[serde(default = "default_emit_interval_ms")]
    pub emit_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct FaceConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub store: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_timeline_len")]
    pub timeline_len: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_sync_delay_ms")]
    pub sync_delay_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            max_lag: default_max_lag(),
            silence_threshold: default_silence_threshold(),
            tick_rate: default_tick_rate(),
            emit_interval_ms: default_emit_interval_ms(),
        }
    }
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            store: None,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            timeline_len: default_timeline_len(),
            event_capacity: default_event_capacity(),
            sync_delay_ms: default_sync_delay_ms(),
        }
    }
}

impl Config {
    /// Replace values that would stall analysis with their defaults.
    fn validated(mut self) -> Self {
        if self.audio.frame_size == 0 {
            log::warn!("audio.frame_size must be positive, using {}", default_frame_size());
            self.audio.frame_size = default_frame_size();
        }
        if self.audio.tick_rate == 0 {
            log::warn!("audio.tick_rate must be positive, using {}", default_tick_rate());
            self.audio.tick_rate = default_tick_rate();
        }
        self
    }
}

fn default_frame_size() -> usize { 2048 }
fn default_max_lag() -> usize { crate::audio::pitch::MAX_LAG }
fn default_silence_threshold() -> f32 { crate::audio::pitch::SILENCE_THRESHOLD }
fn default_tick_rate() -> u32 { 60 }
fn default_emit_interval_ms() -> u64 { 80 }
fn default_threshold() -> f32 { crate::face::recognition::DEFAULT_THRESHOLD }
fn default_timeline_len() -> usize { crate::analytics::timeline::DEFAULT_TIMELINE_LEN }
fn default_event_capacity() -> usize { crate::analytics::events::DEFAULT_EVENT_CAPACITY }
fn default_sync_delay_ms() -> u64 { crate::analytics::events::DEFAULT_SYNC_DELAY_MS }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<Config>(&content) {
        Ok(cfg) => Some(cfg.validated()),
        Err(e) => {
            log::warn!("Invalid config {}: {}", path.display(), e);
            None
        }
    }
}

/// Explicit path, else `./vocalis.toml`, else the user config directories.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("vocalis.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("vocalis").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("vocalis").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
