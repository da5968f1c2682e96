//! Per-job orchestration: probe, plan, download, encode, finalize.

mod naming;
mod plan;
mod workdir;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use naming::{caption_text, output_basename, output_extension, sanitize_filename, write_caption_file};
pub use plan::{JobPlan, plan_job, plan_resolution_and_mode};
pub use workdir::WorkDir;

use crate::bitrate::check_overshoot;
use crate::config::RunOptions;
use crate::discovery::Toolchain;
use crate::downloader::{DownloadOptions, Downloader};
use crate::encoder::{EncodeRun, Encoder};
use crate::error::{AppError, PipelineStage};
use crate::media::{DownloadedVideo, OutputVideo};
use crate::pool::{JobExecutor, QueuedJob};
use crate::progress::{JobId, JobResult, LogLine, Reporter, Stage, Update, humanize_bytes};

/// What a finished job produced. Serialized by `plan --json`.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub url: String,
    pub planned: bool,
    pub plan: JobPlan,
    pub video: DownloadedVideo,
    pub output: Option<OutputVideo>,
    pub caption_path: Option<PathBuf>,
    pub overshot: bool,
    pub overshoot_ratio: f64,
    /// Set only when the work directory was kept.
    pub temp_dir: Option<PathBuf>,
}

pub struct JobService {
    downloader: Downloader,
    encoder: Option<Encoder>,
    opts: RunOptions,
}

impl JobService {
    pub fn new(tools: Toolchain, opts: RunOptions) -> Result<Self, AppError> {
        if tools.downloader.as_os_str().is_empty() {
            return Err(AppError::Config("downloader path is required".to_string()));
        }
        let encoder = tools.encoder.filter(|p| !p.as_os_str().is_empty());
        if !opts.dry_run && encoder.is_none() {
            return Err(AppError::Config("ffmpeg path is required".to_string()));
        }
        Ok(Self {
            downloader: Downloader::new(tools.downloader, opts.platforms.clone()),
            encoder: encoder.map(Encoder::new),
            opts,
        })
    }

    pub fn options(&self) -> &RunOptions {
        &self.opts
    }

    /// Runs one job without emitting its terminal events.
    pub async fn run_job(
        &self,
        job_id: JobId,
        url: &str,
        reporter: Option<Arc<dyn Reporter>>,
        cancel: &CancellationToken,
    ) -> Result<JobReport, AppError> {
        let work_dir = WorkDir::create(&self.opts.effective_temp_root(), self.opts.keep_temp)?;
        let temp_dir = work_dir.is_kept().then(|| work_dir.path().to_path_buf());
        log::debug!(
            target: "sniplette::pipeline",
            "[{}] Work dir {}",
            job_id,
            work_dir.path().display()
        );

        let dl_opts = DownloadOptions {
            metadata_only: self.opts.dry_run,
            work_dir: work_dir.path(),
            verbose: self.opts.verbose,
            reporter: reporter.clone(),
            job_id,
        };
        let video = self
            .downloader
            .download(url, &dl_opts, cancel)
            .await
            .map_err(|e| e.in_stage(PipelineStage::Downloader))?;

        let plan = plan_job(&self.opts, &video);
        log::info!(
            target: "sniplette::pipeline",
            "[{}] Plan: {} ({}p, {})",
            job_id,
            plan.output_path.display(),
            plan.encode.long_side_px,
            if plan.encode.mode_crf {
                format!("CRF {}", plan.encode.crf)
            } else {
                format!("{} kbps", plan.video_kbps)
            }
        );

        if self.opts.dry_run {
            return Ok(JobReport {
                url: url.to_string(),
                planned: true,
                plan,
                video,
                output: None,
                caption_path: None,
                overshot: false,
                overshoot_ratio: 0.0,
                temp_dir,
            });
        }

        let encoder = self
            .encoder
            .as_ref()
            .ok_or_else(|| AppError::Config("ffmpeg path is required".to_string()))?;
        let run = EncodeRun {
            verbose: self.opts.verbose,
            reporter: reporter.clone(),
            job_id,
        };
        let output = encoder
            .encode(&video, &plan.encode, &plan.output_path, run, cancel)
            .await
            .map_err(|e| e.in_stage(PipelineStage::Encode))?;

        let caption_path = if self.opts.writes_caption() {
            self.write_caption(job_id, &video, &output.output_path, reporter.as_deref())
        } else {
            None
        };

        let (overshot, overshoot_ratio) = if plan.encode.mode_crf {
            (false, 0.0)
        } else {
            check_overshoot(output.bytes, plan.encode.max_size_mb)
        };
        if overshot {
            log::warn!(
                target: "sniplette::pipeline",
                "[{}] Output is {:.0}% of the {} MB target",
                job_id,
                overshoot_ratio * 100.0,
                plan.encode.max_size_mb
            );
        }

        Ok(JobReport {
            url: url.to_string(),
            planned: false,
            plan,
            video,
            output: Some(output),
            caption_path,
            overshot,
            overshoot_ratio,
            temp_dir,
        })
    }

    /// Best-effort; a failure is logged and the job still succeeds.
    fn write_caption(
        &self,
        job_id: JobId,
        video: &DownloadedVideo,
        output_path: &Path,
        reporter: Option<&dyn Reporter>,
    ) -> Option<PathBuf> {
        match write_caption_file(output_path, &caption_text(video)) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!(
                    target: "sniplette::pipeline",
                    "[{}] Failed to write caption: {}",
                    job_id,
                    e
                );
                if let (Some(reporter), true) = (reporter, self.opts.verbose) {
                    reporter.log(LogLine {
                        job_id,
                        line: format!("warning: failed to write caption: {e}"),
                    });
                }
                None
            }
        }
    }

    /// Runs one job and emits its terminal update and result.
    pub async fn execute_job(
        &self,
        job_id: JobId,
        url: &str,
        reporter: Arc<dyn Reporter>,
        cancel: &CancellationToken,
    ) -> Result<JobReport, Arc<AppError>> {
        match self.run_job(job_id, url, Some(Arc::clone(&reporter)), cancel).await {
            Ok(report) => {
                let (path, bytes, message) = finished_message(&report);
                reporter.update(Update::new(job_id, Stage::Completed, message).with_percent(100.0));
                reporter.result(JobResult {
                    job_id,
                    output_path: Some(path),
                    bytes,
                    error: None,
                });
                Ok(report)
            }
            Err(err) => {
                if err.is_aborted() {
                    log::info!(target: "sniplette::pipeline", "[{}] Aborted", job_id);
                } else {
                    log::error!(target: "sniplette::pipeline", "[{}] {}", job_id, err);
                }
                let err = Arc::new(err);
                reporter.update(Update::new(job_id, Stage::Error, err.to_string()));
                reporter.result(JobResult::failed(job_id, Arc::clone(&err)));
                Err(err)
            }
        }
    }
}

fn finished_message(report: &JobReport) -> (PathBuf, u64, String) {
    match &report.output {
        Some(output) => (
            output.output_path.clone(),
            output.bytes,
            format!(
                "Saved: {} ({})",
                display_name(&output.output_path),
                humanize_bytes(output.bytes)
            ),
        ),
        None => (
            report.plan.output_path.clone(),
            0,
            format!("Planned: {} (dry-run)", display_name(&report.plan.output_path)),
        ),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl JobExecutor for JobService {
    type Output = JobReport;

    async fn execute(
        &self,
        job: QueuedJob,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Result<JobReport, Arc<AppError>> {
        self.execute_job(job.id, &job.url, reporter, &cancel).await
    }
}
