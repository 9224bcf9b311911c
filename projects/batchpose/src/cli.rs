use crate::pipeline::types::FailurePolicy;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// File that receives a copy of every log line
    #[arg(long, global = true, env = "BATCHPOSE_LOG_FILE", default_value = "app.log")]
    pub log_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split a video into batches, transform them in parallel and re-encode in order
    Process(ProcessArgs),
    /// Show a live dashboard of independently sampled sensors
    Live(LiveArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Single,
    Multi,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// Person detection with bounding-box overlay
    Detect,
    /// Copy frames through untouched
    Identity,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ProcessArgs {
    /// Input video file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output video file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Processing mode; `single` forces one worker
    #[arg(short, long, value_enum)]
    pub mode: Option<Mode>,

    /// Number of parallel workers
    #[arg(short = 't', long = "workers")]
    pub workers: Option<usize>,

    /// Size every frame is normalized to, as WIDTHxHEIGHT
    #[arg(long, default_value = "640x480")]
    pub resolution: String,

    /// Per-frame transform
    #[arg(long, value_enum, default_value_t = EngineKind::Detect)]
    pub engine: EngineKind,

    /// Path to the RT-DETR model weights
    #[arg(long, env = "BATCHPOSE_MODEL", default_value = "models/rtdetr-v2-s.onnx")]
    pub model: String,

    /// Minimum detection confidence drawn on the output
    #[arg(long, default_value_t = 0.5)]
    pub min_conf: f32,

    /// Share this many engines between workers instead of one per worker
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// What to do with a frame whose transform fails
    #[arg(long, value_enum, default_value_t = FailurePolicy::Drop)]
    pub on_frame_error: FailurePolicy,

    /// Abandon workers still running after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl ProcessArgs {
    pub fn worker_count(&self) -> usize {
        match (self.mode, self.workers) {
            (Some(Mode::Single), _) => 1,
            (_, Some(workers)) => workers,
            (Some(Mode::Multi), None) => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            (None, None) => 1,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct LiveArgs {
    /// Camera device index
    #[arg(short, long, default_value_t = 0)]
    pub camera: i32,

    /// Requested camera resolution, as WIDTHxHEIGHT
    #[arg(short, long, default_value = "1920x1080")]
    pub resolution: String,

    /// Display refresh rate in Hz
    #[arg(short, long, default_value_t = 30.0)]
    pub frequency: f64,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
