use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn positive_usize() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..)
}

#[derive(Parser, Debug)]
#[command(name = "vocalis", about = "Voice pitch signature and face template matching")]
pub struct Cli {
    /// Config file (defaults to ./vocalis.toml or ~/.config/vocalis/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract the audio signature of a file (WAV, MP3, FLAC, OGG)
    Analyze(AnalyzeArgs),
    /// Stream the audio signature of a microphone
    Listen(ListenArgs),
    /// Match face detections (JSON lines) against saved templates
    Match(MatchArgs),
    /// Manage saved face templates
    Templates {
        /// Template store file
        #[arg(long)]
        store: Option<PathBuf>,

        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(clap::Args, Debug)]
pub struct AnalyzeArgs {
    /// Input audio file
    pub input: PathBuf,

    /// Face snapshots (JSON lines from `vocalis match`) to merge into the timeline
    #[arg(long)]
    pub faces: Option<PathBuf>,

    /// Write snapshots, summary and metrics as JSON here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the audit event log as JSON
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Samples per analysis buffer
    #[arg(long, default_value_t = 2048, value_parser = positive_usize())]
    pub frame_size: usize,

    /// Analysis ticks per second
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..))]
    pub tick_rate: u32,

    /// Minimum milliseconds between emitted snapshots
    #[arg(long, default_value_t = 80)]
    pub emit_interval_ms: u64,
}

#[derive(clap::Args, Debug)]
pub struct ListenArgs {
    /// Input device name
    #[arg(short, long)]
    pub device: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    pub seconds: Option<u64>,

    /// Samples per analysis buffer
    #[arg(long, default_value_t = 2048, value_parser = positive_usize())]
    pub frame_size: usize,
}

#[derive(clap::Args, Debug)]
pub struct MatchArgs {
    /// Detections file, one `{"timestamp", "detections"}` object per line
    pub input: PathBuf,

    /// Template store file
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Maximum descriptor distance for a match
    #[arg(long, default_value_t = 0.6)]
    pub threshold: f32,

    /// Write face snapshots as JSON lines here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum TemplateAction {
    /// List saved templates and captures
    List,
    /// Save a descriptor under a name
    Add {
        #[arg(long)]
        name: String,
        /// JSON file holding an array of numbers
        #[arg(long)]
        descriptor: PathBuf,
    },
    /// Remove a template by id
    Remove { id: String },
    /// Record a dataset capture
    Capture { source: String },
    /// Accept the biometric data consent notice
    Consent,
    /// Delete all templates, captures and consent
    Clear,
}
