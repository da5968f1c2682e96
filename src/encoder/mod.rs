//! Encoding through the external encoder.
//!
//! Output is H.264/AAC fast-start MP4, or AAC-only `.m4a`. Progress comes
//! from `-progress pipe:1` on stdout and is turned into [`Update`]s by
//! [`ProgressState`].

mod builder;
mod progress;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use builder::{
    RateControl, build_audio_args, build_video_args, format_args_for_display_multiline,
    rate_control, scale_filter,
};
pub use progress::ProgressState;

use crate::error::AppError;
use crate::media::{DownloadedVideo, EncodeOptions, OutputVideo};
use crate::process::{CommandSpec, run_command};
use crate::progress::{JobId, LogLine, Reporter, Stage, Update};

/// Per-invocation settings that are not part of the encoding plan.
pub struct EncodeRun {
    pub verbose: bool,
    pub reporter: Option<Arc<dyn Reporter>>,
    pub job_id: JobId,
}

#[derive(Debug, Clone)]
pub struct Encoder {
    path: PathBuf,
}

impl Encoder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encodes `video.input_path` to `output_path`.
    ///
    /// A failed or cancelled encode never leaves a partial output behind.
    pub async fn encode(
        &self,
        video: &DownloadedVideo,
        enc: &EncodeOptions,
        output_path: &Path,
        run: EncodeRun,
        cancel: &CancellationToken,
    ) -> Result<OutputVideo, AppError> {
        let input = video
            .input_path
            .as_deref()
            .ok_or_else(|| AppError::Config("no input file to encode".to_string()))?;
        if !enc.audio_only && !enc.mode_crf {
            if video.duration_sec.is_nan() || video.duration_sec <= 0.0 {
                return Err(AppError::Config(
                    "bitrate mode requires a known duration".to_string(),
                ));
            }
            if enc.max_size_mb == 0 {
                return Err(AppError::Config(
                    "bitrate mode requires a positive size target".to_string(),
                ));
            }
        }

        // Verbose runs pass encoder output through untouched.
        let include_progress = run.reporter.is_some() && !run.verbose;
        let (args, rate) = if enc.audio_only {
            (
                build_audio_args(input, enc, output_path, include_progress),
                None,
            )
        } else {
            let (args, rate) = build_video_args(input, video, enc, output_path, include_progress);
            (args, Some(rate))
        };

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        log::debug!(
            target: "sniplette::encoder",
            "[{}] Encoder args:\n{}",
            run.job_id,
            format_args_for_display_multiline(&args)
        );

        let mut spec = CommandSpec::new(&self.path, args)
            .capture_stdout(!include_progress)
            .verbose(run.verbose && run.reporter.is_none());
        if let Some(reporter) = &run.reporter {
            let mut start = Update::new(run.job_id, Stage::Encoding, "Encoding");
            if !enc.audio_only {
                start = start.with_percent(0.0);
            } else {
                start.message = "Encoding (audio)".to_string();
            }
            reporter.update(start);

            let mut state = ProgressState::new(run.job_id, video.duration_sec, enc.audio_only);
            let stdout_reporter = Arc::clone(reporter);
            let verbose = run.verbose;
            let job_id = run.job_id;
            spec = spec.on_stdout(move |line| {
                if verbose {
                    stdout_reporter.log(LogLine {
                        job_id,
                        line: line.to_string(),
                    });
                }
                if let Some(update) = state.feed(line) {
                    stdout_reporter.update(update);
                }
            });
            if verbose {
                let stderr_reporter = Arc::clone(reporter);
                spec = spec.on_stderr(move |line| {
                    stderr_reporter.log(LogLine {
                        job_id,
                        line: line.to_string(),
                    })
                });
            }
        }

        if let Err(err) = run_command(spec, cancel).await {
            remove_partial(output_path);
            return Err(err);
        }

        let bytes = fs::metadata(output_path)?.len();
        let (crf_used, video_kbps_used) = match rate {
            Some(RateControl::Crf(crf)) => (crf, 0),
            Some(RateControl::BitrateKbps(kbps)) => (0, kbps),
            None => (0, 0),
        };
        log::info!(
            target: "sniplette::encoder",
            "[{}] Encoded {} ({} bytes)",
            run.job_id,
            output_path.display(),
            bytes
        );
        Ok(OutputVideo {
            output_path: output_path.to_path_buf(),
            bytes,
            crf_used,
            video_kbps_used,
            long_side_px: if enc.audio_only { 0 } else { enc.long_side_px },
            audio_only: enc.audio_only,
        })
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!(
            target: "sniplette::encoder",
            "Removed partial output {}",
            path.display()
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            target: "sniplette::encoder",
            "Failed to remove partial output {}: {}",
            path.display(),
            e
        ),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn source(dir: &Path) -> DownloadedVideo {
        let input = dir.join("abc.mp4");
        fs::write(&input, b"source").expect("write input");
        DownloadedVideo {
            id: "abc".into(),
            width: 1920,
            height: 1080,
            duration_sec: 10.0,
            input_path: Some(input),
            ..Default::default()
        }
    }

    fn quiet_run() -> EncodeRun {
        EncodeRun {
            verbose: false,
            reporter: None,
            job_id: JobId(1),
        }
    }

    #[tokio::test]
    async fn writes_output_and_reports_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        // The output path is the last argument.
        let bin = script(dir.path(), "ffmpeg", r#"for a; do out="$a"; done; printf 'encoded' > "$out""#);
        let out = dir.path().join("out").join("abc.mp4");
        let result = Encoder::new(&bin)
            .encode(
                &source(dir.path()),
                &EncodeOptions::default(),
                &out,
                quiet_run(),
                &CancellationToken::new(),
            )
            .await
            .expect("encode");
        assert_eq!(result.bytes, 7);
        assert_eq!(result.crf_used, 22);
        assert_eq!(result.video_kbps_used, 0);
        assert_eq!(result.output_path, out);
    }

    #[tokio::test]
    async fn failure_removes_partial_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = script(
            dir.path(),
            "ffmpeg",
            r#"for a; do out="$a"; done; printf 'partial' > "$out"; echo 'Conversion failed!' >&2; exit 1"#,
        );
        let out = dir.path().join("encoded.mp4");
        let err = Encoder::new(&bin)
            .encode(
                &source(dir.path()),
                &EncodeOptions::default(),
                &out,
                quiet_run(),
                &CancellationToken::new(),
            )
            .await
            .expect_err("encoder fails");
        assert!(err.to_string().contains("Conversion failed!"));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn bitrate_mode_needs_duration_and_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut video = source(dir.path());
        video.duration_sec = 0.0;
        let enc = EncodeOptions {
            mode_crf: false,
            max_size_mb: 50,
            ..Default::default()
        };
        let encoder = Encoder::new("/nonexistent/ffmpeg");
        let out = dir.path().join("x.mp4");
        let err = encoder
            .encode(&video, &enc, &out, quiet_run(), &CancellationToken::new())
            .await
            .expect_err("no duration");
        assert!(matches!(err, AppError::Config(_)));

        video.duration_sec = 10.0;
        let enc = EncodeOptions {
            max_size_mb: 0,
            ..enc
        };
        let err = encoder
            .encode(&video, &enc, &out, quiet_run(), &CancellationToken::new())
            .await
            .expect_err("no target");
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn progress_stream_becomes_updates() {
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Collect(Mutex<Vec<Update>>);
        impl Reporter for Collect {
            fn update(&self, update: Update) {
                self.0.lock().push(update);
            }
            fn log(&self, _line: LogLine) {}
            fn result(&self, _result: crate::progress::JobResult) {}
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let bin = script(
            dir.path(),
            "ffmpeg",
            "for a; do out=\"$a\"; done\n\
             printf 'out_time_ms=5000000\\nspeed=2x\\nprogress=continue\\n'\n\
             printf 'out_time_ms=10000000\\nprogress=end\\n'\n\
             printf 'ok' > \"$out\"",
        );
        let collect = Arc::new(Collect::default());
        let run = EncodeRun {
            verbose: false,
            reporter: Some(collect.clone()),
            job_id: JobId(3),
        };
        Encoder::new(&bin)
            .encode(
                &source(dir.path()),
                &EncodeOptions::default(),
                &dir.path().join("o.mp4"),
                run,
                &CancellationToken::new(),
            )
            .await
            .expect("encode");
        let updates = collect.0.lock();
        let percents: Vec<Option<f64>> = updates.iter().map(|u| u.percent).collect();
        assert_eq!(percents, [Some(0.0), Some(50.0), Some(100.0)]);
        assert!(updates.iter().all(|u| u.stage == Stage::Encoding));
        assert_eq!(updates[1].speed.as_deref(), Some("2x"));
    }
}
