//! Turning probed metadata and run options into an encoding plan.

use std::path::PathBuf;

use serde::Serialize;

use super::naming::{output_basename, output_extension};
use crate::bitrate::{compute_video_kbps, safe_audio_kbps};
use crate::config::{
    AUDIO_BITRATE_KBPS, ENCODER_PRESET, ENCODER_PROFILE, KEY_INT, RunOptions, VIDEO_MAX_KBPS,
    VIDEO_MIN_KBPS,
};
use crate::media::{DownloadedVideo, EncodeOptions};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPlan {
    pub encode: EncodeOptions,
    pub output_path: PathBuf,
    /// Estimated video bitrate; 0 outside bitrate mode.
    pub video_kbps: u32,
}

/// Target long side (never above the source's) and the CRF to use.
pub fn plan_resolution_and_mode(
    opts: &RunOptions,
    video: &DownloadedVideo,
    preset_crf: u32,
) -> (u32, u32) {
    let mut target = opts.effective_resolution();
    if let Some(source_long) = video.long_side() {
        if source_long < target {
            target = source_long;
        }
    }
    (target, preset_crf)
}

/// Whether the plan uses constant quality rather than a size target.
fn uses_crf(max_size_mb: u32, duration_sec: f64, audio_only: bool) -> bool {
    max_size_mb == 0 || duration_sec.is_nan() || duration_sec <= 0.0 || audio_only
}

pub fn plan_job(opts: &RunOptions, video: &DownloadedVideo) -> JobPlan {
    let (long_side_px, crf) = plan_resolution_and_mode(opts, video, opts.effective_crf());
    let max_size_mb = opts.effective_max_size_mb();
    let encode = EncodeOptions {
        long_side_px,
        mode_crf: uses_crf(max_size_mb, video.duration_sec, opts.audio_only),
        crf,
        max_size_mb,
        audio_bitrate_kbps: AUDIO_BITRATE_KBPS,
        video_min_kbps: VIDEO_MIN_KBPS,
        video_max_kbps: VIDEO_MAX_KBPS,
        preset: ENCODER_PRESET.to_string(),
        profile: ENCODER_PROFILE.to_string(),
        audio_only: opts.audio_only,
        key_int: KEY_INT,
    };

    let file_name = format!(
        "{}.{}",
        output_basename(video, &encode),
        output_extension(encode.audio_only)
    );
    let output_path = opts.out_dir.join(file_name);

    let video_kbps = if encode.mode_crf {
        0
    } else {
        compute_video_kbps(
            max_size_mb,
            video.duration_sec,
            safe_audio_kbps(encode.audio_bitrate_kbps),
            encode.video_min_kbps,
            encode.video_max_kbps,
        )
    };

    JobPlan {
        encode,
        output_path,
        video_kbps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quality;

    fn video(width: u32, height: u32, duration_sec: f64) -> DownloadedVideo {
        DownloadedVideo {
            id: "abc".into(),
            uploader: "someone".into(),
            width,
            height,
            duration_sec,
            ..Default::default()
        }
    }

    #[test]
    fn never_upscales() {
        let opts = RunOptions {
            resolution: Some(1080),
            ..Default::default()
        };
        let (res, _) = plan_resolution_and_mode(&opts, &video(720, 720, 10.0), 22);
        assert_eq!(res, 720);
        let (res, _) = plan_resolution_and_mode(&opts, &video(1920, 1080, 10.0), 22);
        assert_eq!(res, 1080);
        let (res, _) = plan_resolution_and_mode(&opts, &video(0, 0, 10.0), 22);
        assert_eq!(res, 1080);
    }

    #[test]
    fn preset_drives_defaults() {
        let opts = RunOptions {
            quality: Quality::Low,
            out_dir: PathBuf::from("/out"),
            ..Default::default()
        };
        let plan = plan_job(&opts, &video(1080, 1920, 30.0));
        assert_eq!(plan.encode.long_side_px, 540);
        assert!(!plan.encode.mode_crf);
        assert_eq!(plan.encode.max_size_mb, 20);
        assert_eq!(plan.encode.crf, 26);
        assert_eq!(plan.video_kbps, 5496);
        assert_eq!(plan.output_path, PathBuf::from("/out/someone_abc_540p_20MB.mp4"));
    }

    #[test]
    fn crf_mode_is_forced() {
        let explicit_zero = RunOptions {
            max_size_mb: Some(0),
            ..Default::default()
        };
        let plan = plan_job(&explicit_zero, &video(1920, 1080, 30.0));
        assert!(plan.encode.mode_crf);
        assert_eq!(plan.video_kbps, 0);
        assert_eq!(
            plan.output_path.file_name().and_then(|n| n.to_str()),
            Some("someone_abc_720p_CRF22.mp4")
        );

        let unknown_duration = plan_job(&RunOptions::default(), &video(1920, 1080, 0.0));
        assert!(unknown_duration.encode.mode_crf);

        let audio = RunOptions {
            audio_only: true,
            ..Default::default()
        };
        let plan = plan_job(&audio, &video(1920, 1080, 30.0));
        assert!(plan.encode.mode_crf);
        assert!(plan.encode.audio_only);
        assert_eq!(
            plan.output_path.file_name().and_then(|n| n.to_str()),
            Some("someone_abc_audio.m4a")
        );
    }

    #[test]
    fn fixed_constants() {
        let plan = plan_job(&RunOptions::default(), &video(1920, 1080, 30.0));
        assert_eq!(plan.encode.audio_bitrate_kbps, 96);
        assert_eq!(plan.encode.video_min_kbps, 500);
        assert_eq!(plan.encode.video_max_kbps, 8000);
        assert_eq!(plan.encode.preset, "veryfast");
        assert_eq!(plan.encode.profile, "main");
        assert_eq!(plan.encode.key_int, 48);
    }
}
