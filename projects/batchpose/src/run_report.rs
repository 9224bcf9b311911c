use crate::pipeline::types::{FailurePolicy, PipelineRun, WorkerReport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Summary of one `process` run, written next to the output video.
#[derive(Serialize, Debug, Clone)]
pub struct RunReport {
    pub created_at: DateTime<Utc>,
    pub input: PathBuf,
    pub output: PathBuf,
    pub worker_count: usize,
    /// How failed frames were handled; explains `frames_dropped`.
    pub failure_policy: FailurePolicy,
    pub frames_in: usize,
    pub frames_out: usize,
    pub frames_dropped: usize,
    pub elapsed_secs: f64,
    pub frames_per_second: f64,
    pub batches: Vec<WorkerReport>,
}

impl RunReport {
    pub fn from_run<F>(
        run: &PipelineRun<F>,
        input: &Path,
        output: &Path,
        worker_count: usize,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            created_at: run.started_at,
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            worker_count,
            failure_policy,
            frames_in: run.input_frames,
            frames_out: run.frames.len(),
            frames_dropped: run.dropped_frames(),
            elapsed_secs: run.elapsed.as_secs_f64(),
            frames_per_second: run.frames_per_second(),
            batches: run.reports.clone(),
        }
    }

    /// `out.mp4` -> `out.mp4.report.json`
    pub fn report_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_os_string();
        name.push(".report.json");
        PathBuf::from(name)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        tracing::info!("Run report written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Batch, WorkerOutcome};
    use std::time::Duration;

    fn sample_run() -> PipelineRun<u32> {
        let first = Batch {
            index: 0,
            first_frame: 0,
            frames: vec![0u32, 1, 2],
        };
        let second = Batch {
            index: 1,
            first_frame: 3,
            frames: vec![3u32, 4],
        };

        let mut completed = WorkerReport::new(&first, WorkerOutcome::Completed);
        completed.frames_out = 3;
        let failed = WorkerReport::new(
            &second,
            WorkerOutcome::EngineUnavailable("weights not found".into()),
        );

        PipelineRun {
            started_at: Utc::now(),
            elapsed: Duration::from_millis(500),
            input_frames: 5,
            reports: vec![completed, failed],
            frames: vec![0, 1, 2],
        }
    }

    #[test]
    fn test_report_path_appends_suffix() {
        assert_eq!(
            RunReport::report_path(Path::new("/tmp/out.mp4")),
            PathBuf::from("/tmp/out.mp4.report.json")
        );
    }

    #[test]
    fn test_report_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let report = RunReport::from_run(
            &sample_run(),
            Path::new("in.mp4"),
            &output,
            2,
            FailurePolicy::PassThrough,
        );

        assert_eq!(report.frames_dropped, 2);
        assert_eq!(report.frames_per_second, 6.0);

        let path = RunReport::report_path(&output);
        report.write(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["frames_in"], 5);
        assert_eq!(json["failure_policy"], "pass_through");
        assert_eq!(json["frames_out"], 3);
        assert_eq!(json["batches"][0]["outcome"]["status"], "completed");
        assert_eq!(json["batches"][1]["outcome"]["status"], "engine_unavailable");
        assert_eq!(json["batches"][1]["outcome"]["reason"], "weights not found");
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let report = RunReport::from_run(
            &sample_run(),
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            2,
            FailurePolicy::Drop,
        );
        assert!(report
            .write(Path::new("/nonexistent/dir/out.mp4.report.json"))
            .is_err());
    }
}
