mod cli;
mod live;
mod pipeline;
mod run_report;
mod video;

use anyhow::Result;
use cli::{Args, Command};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(log_file: &Path) {
    let file_layer = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
        Err(e) => {
            eprintln!("Cannot open log file {}: {}", log_file.display(), e);
            None
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse_args();
    init_tracing(&args.log_file);

    let result = match &args.command {
        Command::Process(process) => video::processor::process_video(process).map(|stats| {
            tracing::info!(
                "Done: {} frames written, {} dropped in {:.2}s ({:.2}s in workers)",
                stats.frames_written,
                stats.frames_dropped,
                stats.total_time.as_secs_f64(),
                stats.pipeline_time.as_secs_f64()
            );
        }),
        Command::Live(live) => live::run_live(live),
    };

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}
