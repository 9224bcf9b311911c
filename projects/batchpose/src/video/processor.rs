use crate::cli::{EngineKind, ProcessArgs};
use crate::pipeline::coordinator::{CoordinatorConfig, PipelineCoordinator};
use crate::pipeline::engine::{DedicatedEngines, EnginePool, EngineProvider};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::transforms::{MatEngine, Passthrough, PersonOverlay};
use crate::run_report::RunReport;
use crate::video::opencv_reader::OpencvReader;
use crate::video::opencv_writer::OpencvWriter;
use crate::video::{FrameSink, FrameSize, FrameSource};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ProcessingStats {
    pub frames_written: usize,
    pub frames_dropped: usize,
    pub pipeline_time: Duration,
    pub total_time: Duration,
}

fn progress_bar(len: u64, label: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => tracing::debug!("Progress template rejected: {}", e),
    }
    pb.set_message(label);
    pb
}

/// Writes `frames` to `sink` in order.
///
/// Any failure is fatal and reports how many frames made it out.
pub fn export_frames<F, K>(
    sink: &mut K,
    path: &Path,
    fps: f64,
    size: FrameSize,
    frames: Vec<F>,
    pb: &ProgressBar,
) -> PipelineResult<usize>
where
    K: FrameSink<F> + ?Sized,
{
    let mut written = 0;
    let failed = |written: usize, e: anyhow::Error| PipelineError::SinkWrite {
        written,
        reason: format!("{:#}", e),
    };

    sink.open(path, fps, size).map_err(|e| failed(0, e))?;
    for frame in frames {
        if let Err(e) = sink.write(&frame) {
            // Best effort: keep what was written playable.
            let _ = sink.close();
            return Err(failed(written, e));
        }
        written += 1;
        pb.inc(1);
    }
    sink.close().map_err(|e| failed(written, e))?;

    Ok(written)
}

fn build_provider(args: &ProcessArgs, worker_count: usize) -> Arc<dyn EngineProvider<MatEngine>> {
    let model = args.model.clone();
    let min_conf = args.min_conf;
    let engine_kind = args.engine;
    let factory = move || -> Result<MatEngine> {
        Ok(match engine_kind {
            EngineKind::Identity => MatEngine::Passthrough(Passthrough),
            EngineKind::Detect => MatEngine::PersonOverlay(PersonOverlay::load(&model, min_conf)?),
        })
    };

    match args.pool_size {
        Some(size) if size < worker_count => {
            tracing::info!("Sharing {} engines between {} workers", size, worker_count);
            let pool = EnginePool::new(size, factory);
            if pool.size() < size {
                tracing::warn!("Only {} of {} pooled engines loaded", pool.size(), size);
            }
            Arc::new(pool)
        }
        _ => Arc::new(DedicatedEngines::new(factory)),
    }
}

/// Runs a whole `process` invocation: decode, transform in parallel, encode, report.
pub fn process_video(args: &ProcessArgs) -> Result<ProcessingStats> {
    let start_time = Instant::now();

    // Everything that can be rejected up front is, before the input is opened.
    let worker_count = args.worker_count();
    let mut config = CoordinatorConfig::new(worker_count);
    config.failure_policy = args.on_frame_error;
    config.deadline = args.timeout_secs.map(Duration::from_secs);
    config.validate()?;
    let output_size: FrameSize = args.resolution.parse()?;
    if args.pool_size == Some(0) {
        return Err(PipelineError::InvalidConfiguration(
            "pool size must be at least 1".to_string(),
        )
        .into());
    }

    let mut reader = OpencvReader::open(&args.input, Some(output_size))?;
    let fps = reader.source_fps()?;
    let total_frames = reader.frame_count()?;
    tracing::info!(
        "Processing {} frames ({}) from {} with {} workers",
        total_frames,
        reader.frame_size()?,
        args.input.display(),
        worker_count
    );

    let provider = build_provider(args, worker_count);
    let pb = progress_bar(total_frames as u64, "processing");
    let coordinator = PipelineCoordinator::new(config).with_progress(pb.clone());
    let run = coordinator.run(&mut reader, provider)?;
    pb.finish_with_message("processed");
    drop(reader);

    // Nothing to encode; leave no empty output behind.
    if let Some(reason) = run.engine_failure() {
        return Err(PipelineError::EngineAcquisition {
            batch_index: 0,
            reason: format!("no batch could load an engine: {}", reason),
        }
        .into());
    }

    let report = RunReport::from_run(
        &run,
        &args.input,
        &args.output,
        worker_count,
        args.on_frame_error,
    );
    let pipeline_time = run.elapsed;
    let frames_dropped = run.dropped_frames();

    let export_pb = progress_bar(run.frames.len() as u64, "writing");
    let mut writer = OpencvWriter::default();
    let frames_written = export_frames(
        &mut writer,
        &args.output,
        fps,
        output_size,
        run.frames,
        &export_pb,
    )?;
    export_pb.finish_with_message("written");

    let report_path = RunReport::report_path(&args.output);
    if let Err(e) = report.write(&report_path) {
        tracing::warn!("Failed to write run report {}: {:#}", report_path.display(), e);
    }

    let total_time = start_time.elapsed();
    if frames_dropped > 0 {
        tracing::warn!("{} frames were dropped", frames_dropped);
    }
    tracing::info!(
        "Processing time ({} workers): {:.2} seconds (pipeline {:.2}s, {} frames written)",
        worker_count,
        total_time.as_secs_f64(),
        pipeline_time.as_secs_f64(),
        frames_written
    );

    Ok(ProcessingStats {
        frames_written,
        frames_dropped,
        pipeline_time,
        total_time,
    })
}
