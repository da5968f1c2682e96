//! Metadata probing and media download through the external downloader.
//!
//! Two invocations per job: a `--dump-json` probe, then (unless only
//! metadata is wanted) a fetch into the job's work directory with live
//! progress parsed from `[download]` lines.

mod metadata;
mod progress;
mod select;
pub mod url;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

pub use metadata::{VideoInfo, parse_video_info};
pub use progress::{DownloadLine, classify_line, parse_eta};
pub use select::select_downloaded_file;
pub use self::url::{HostAlias, Platform, PlatformPolicy, UnsupportedPlatform, detect_platform};

use crate::error::AppError;
use crate::media::DownloadedVideo;
use crate::process::{CommandSpec, run_command};
use crate::progress::{JobId, LogLine, Reporter, Stage, Update};

const FORMAT_SELECTOR: &str = "bestvideo+bestaudio/best";
const OUTPUT_TEMPLATE: &str = "%(id)s.%(ext)s";

pub struct DownloadOptions<'a> {
    /// Probe only; the returned video has no `input_path`.
    pub metadata_only: bool,
    pub work_dir: &'a Path,
    pub verbose: bool,
    pub reporter: Option<Arc<dyn Reporter>>,
    pub job_id: JobId,
}

impl DownloadOptions<'_> {
    fn emit(&self, update: Update) {
        if let Some(reporter) = &self.reporter {
            reporter.update(update);
        }
    }

    /// Echo to our own terminal only when nobody is listening for events.
    fn echo(&self) -> bool {
        self.verbose && self.reporter.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Downloader {
    path: PathBuf,
    policy: PlatformPolicy,
}

impl Downloader {
    pub fn new(path: impl Into<PathBuf>, policy: PlatformPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_supported(&self, url: &str) -> Result<(), AppError> {
        match self.policy.unsupported_platform(url) {
            Some(platform) => Err(AppError::UnsupportedPlatform {
                platform: platform.to_string(),
                url: url.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub async fn download(
        &self,
        url: &str,
        opts: &DownloadOptions<'_>,
        cancel: &CancellationToken,
    ) -> Result<DownloadedVideo, AppError> {
        opts.emit(Update::new(opts.job_id, Stage::Metadata, "Fetching metadata"));

        self.check_supported(url)?;
        let target = self.policy.normalize(url);
        self.check_supported(&target)?;
        if target != url {
            log::debug!(
                target: "sniplette::downloader",
                "[{}] Normalized URL {} -> {}",
                opts.job_id,
                url,
                target
            );
        }

        let info = self.fetch_metadata(&target, opts, cancel).await?;
        let mut video = info.into_video(url);
        log::info!(
            target: "sniplette::downloader",
            "[{}] Metadata: id={}, duration={}s, size={}x{}",
            opts.job_id,
            video.id,
            video.duration_sec,
            video.width,
            video.height
        );
        if opts.metadata_only {
            return Ok(video);
        }

        self.fetch_media(&target, opts, cancel).await?;
        let input = select_downloaded_file(opts.work_dir, &video.id)?;
        log::debug!(
            target: "sniplette::downloader",
            "[{}] Downloaded file: {}",
            opts.job_id,
            input.display()
        );
        video.input_path = Some(input);
        Ok(video)
    }

    async fn fetch_metadata(
        &self,
        url: &str,
        opts: &DownloadOptions<'_>,
        cancel: &CancellationToken,
    ) -> Result<VideoInfo, AppError> {
        let args = vec![
            "--dump-json".to_string(),
            "-f".to_string(),
            FORMAT_SELECTOR.to_string(),
            "--no-playlist".to_string(),
            url.to_string(),
        ];
        let mut spec = CommandSpec::new(&self.path, args)
            .capture_stdout(true)
            .verbose(opts.echo());
        if opts.verbose {
            if let Some(reporter) = opts.reporter.clone() {
                let job_id = opts.job_id;
                spec = spec.on_stderr(move |line| {
                    reporter.log(LogLine {
                        job_id,
                        line: line.to_string(),
                    })
                });
            }
        }

        let stdout = match run_command(spec, cancel).await {
            Ok(output) => output.stdout,
            // A failing probe that still printed the dump is usable.
            Err(AppError::ProcessFailed {
                program,
                code,
                stdout,
                stderr,
            }) => {
                if stdout.trim().is_empty() {
                    return Err(AppError::ProcessFailed {
                        program,
                        code,
                        stdout,
                        stderr,
                    });
                }
                log::warn!(
                    target: "sniplette::downloader",
                    "[{}] Metadata probe exited with code {}, using its output anyway",
                    opts.job_id,
                    code
                );
                stdout
            }
            Err(e) => return Err(e),
        };
        parse_video_info(&stdout)
    }

    async fn fetch_media(
        &self,
        url: &str,
        opts: &DownloadOptions<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let template = opts.work_dir.join(OUTPUT_TEMPLATE);
        let mut args = vec![
            "-f".to_string(),
            FORMAT_SELECTOR.to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--no-playlist".to_string(),
        ];
        if opts.reporter.is_some() {
            args.push("--newline".to_string());
        }
        args.push(url.to_string());

        opts.emit(Update::new(opts.job_id, Stage::Downloading, "Starting download").with_percent(0.0));

        let mut spec = CommandSpec::new(&self.path, args)
            .dir(opts.work_dir)
            .verbose(opts.echo());
        if let Some(reporter) = &opts.reporter {
            let merging = Arc::new(AtomicBool::new(false));
            spec = spec
                .on_stdout(line_handler(
                    Arc::clone(reporter),
                    opts.job_id,
                    opts.verbose,
                    Arc::clone(&merging),
                ))
                .on_stderr(line_handler(
                    Arc::clone(reporter),
                    opts.job_id,
                    opts.verbose,
                    merging,
                ));
        }
        run_command(spec, cancel).await?;
        Ok(())
    }
}

/// Turns downloader output into events. Once merging starts, later
/// `[download]` lines are not reported so the stage never goes backwards.
fn line_handler(
    reporter: Arc<dyn Reporter>,
    job_id: JobId,
    verbose: bool,
    merging: Arc<AtomicBool>,
) -> impl FnMut(&str) + Send + 'static {
    move |line: &str| {
        if verbose {
            reporter.log(LogLine {
                job_id,
                line: line.to_string(),
            });
        }
        match classify_line(line) {
            DownloadLine::Progress {
                percent,
                speed,
                eta,
            } => {
                if merging.load(Ordering::Relaxed) {
                    return;
                }
                reporter.update(Update {
                    job_id,
                    stage: Stage::Downloading,
                    percent,
                    eta,
                    bytes: None,
                    speed,
                    message: "Downloading".to_string(),
                });
            }
            DownloadLine::Merging => {
                merging.store(true, Ordering::Relaxed);
                reporter.update(Update::new(job_id, Stage::Merging, "Merging"));
            }
            DownloadLine::Other => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        updates: Mutex<Vec<Update>>,
        logs: Mutex<Vec<LogLine>>,
    }

    impl Reporter for Collect {
        fn update(&self, update: Update) {
            self.updates.lock().push(update);
        }
        fn log(&self, line: LogLine) {
            self.logs.lock().push(line);
        }
        fn result(&self, _result: crate::progress::JobResult) {}
    }

    #[test]
    fn handler_reports_progress_then_merge() {
        let collect = Arc::new(Collect::default());
        let reporter: Arc<dyn Reporter> = collect.clone();
        let mut handle = line_handler(reporter, JobId(4), false, Arc::new(AtomicBool::new(false)));
        handle("[instagram] abc: Downloading webpage");
        handle("[download]  10.0% of 5.00MiB at 1.00MiB/s ETA 00:04");
        handle("[Merger] Merging formats into \"abc.mp4\"");
        handle("[download] 100% of 5.00MiB");

        let updates = collect.updates.lock();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].stage, Stage::Downloading);
        assert_eq!(updates[0].percent, Some(10.0));
        assert_eq!(updates[0].speed.as_deref(), Some("1.00MiB/s"));
        assert_eq!(updates[1].stage, Stage::Merging);
        assert_eq!(updates[1].job_id, JobId(4));
        assert!(collect.logs.lock().is_empty());
    }

    #[test]
    fn verbose_handler_forwards_every_line() {
        let collect = Arc::new(Collect::default());
        let reporter: Arc<dyn Reporter> = collect.clone();
        let mut handle = line_handler(reporter, JobId(1), true, Arc::new(AtomicBool::new(false)));
        handle("[youtube] x: Downloading m3u8");
        handle("[download]   1.0% of 1MiB");
        assert_eq!(collect.logs.lock().len(), 2);
        assert_eq!(collect.updates.lock().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_platform_fails_before_any_subprocess() {
        let dir = tempfile::tempdir().expect("tempdir");
        let collect = Arc::new(Collect::default());
        // Nonexistent binary: reaching the subprocess would yield a spawn error instead.
        let dl = Downloader::new("/nonexistent/yt-dlp", PlatformPolicy::default());
        let opts = DownloadOptions {
            metadata_only: true,
            work_dir: dir.path(),
            verbose: false,
            reporter: Some(collect.clone()),
            job_id: JobId(1),
        };
        let err = dl
            .download("https://www.threads.com/@a/post/1", &opts, &CancellationToken::new())
            .await
            .expect_err("threads is unsupported");
        assert!(err.is_unsupported_platform());
        let updates = collect.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].stage, Stage::Metadata);
        assert_eq!(updates[0].percent, None);
    }
}
