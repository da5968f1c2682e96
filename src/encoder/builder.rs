//! Encoder argument construction.

use std::path::Path;

use crate::bitrate::{compute_video_kbps, safe_audio_kbps};
use crate::media::{DownloadedVideo, EncodeOptions};

const DEFAULT_LONG_SIDE: u32 = 720;
const DEFAULT_CRF: u32 = 22;
const DEFAULT_AUDIO_ONLY_KBPS: u32 = 128;

/// Rate control actually chosen for a video encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    Crf(u32),
    BitrateKbps(u32),
}

/// Even-dimension scale filter fixing the long side.
pub fn scale_filter(long_side: u32, width: u32, height: u32) -> String {
    let long_side = if long_side == 0 {
        DEFAULT_LONG_SIDE
    } else {
        long_side
    };
    let vertical = width > 0 && height > 0 && height > width;
    if vertical {
        format!("scale=-2:{long_side}")
    } else {
        format!("scale={long_side}:-2")
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() { default } else { value }
}

fn progress_args(args: &mut Vec<String>) {
    args.extend(["-progress", "pipe:1", "-nostats"].map(String::from));
}

/// Rate control for `enc`, given the source duration.
pub fn rate_control(enc: &EncodeOptions, duration_sec: f64) -> RateControl {
    if enc.mode_crf {
        let crf = if enc.crf == 0 { DEFAULT_CRF } else { enc.crf };
        RateControl::Crf(crf)
    } else {
        RateControl::BitrateKbps(compute_video_kbps(
            enc.max_size_mb,
            duration_sec,
            safe_audio_kbps(enc.audio_bitrate_kbps),
            enc.video_min_kbps,
            enc.video_max_kbps,
        ))
    }
}

/// H.264/AAC fast-start MP4 arguments. The output path is always last.
pub fn build_video_args(
    input: &Path,
    video: &DownloadedVideo,
    enc: &EncodeOptions,
    output: &Path,
    include_progress: bool,
) -> (Vec<String>, RateControl) {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vf".into(),
        scale_filter(enc.long_side_px, video.width, video.height),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        or_default(&enc.preset, crate::config::ENCODER_PRESET).into(),
        "-profile:v".into(),
        or_default(&enc.profile, crate::config::ENCODER_PROFILE).into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", safe_audio_kbps(enc.audio_bitrate_kbps)),
        "-movflags".into(),
        "+faststart".into(),
    ];

    if enc.key_int > 0 {
        let gop = enc.key_int.to_string();
        args.extend(["-g".into(), gop.clone(), "-keyint_min".into(), gop]);
    }

    let rate = rate_control(enc, video.duration_sec);
    match rate {
        RateControl::Crf(crf) => args.extend(["-crf".into(), crf.to_string()]),
        RateControl::BitrateKbps(kbps) => args.extend(["-b:v".into(), format!("{kbps}k")]),
    }

    if include_progress {
        progress_args(&mut args);
    }
    args.push(output.to_string_lossy().into_owned());
    (args, rate)
}

/// AAC-only arguments; no video stream, no scale filter.
pub fn build_audio_args(
    input: &Path,
    enc: &EncodeOptions,
    output: &Path,
    include_progress: bool,
) -> Vec<String> {
    let kbps = if enc.audio_bitrate_kbps == 0 {
        DEFAULT_AUDIO_ONLY_KBPS
    } else {
        enc.audio_bitrate_kbps
    };
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vn".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{kbps}k"),
        "-movflags".into(),
        "+faststart".into(),
    ];
    if include_progress {
        progress_args(&mut args);
    }
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let takes_value = arg.starts_with('-')
            && args
                .get(i + 1)
                .is_some_and(|next| !next.starts_with('-') || next == "-2");
        let line = if takes_value {
            i += 2;
            format!("  {} {}", arg, args[i - 1])
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(width: u32, height: u32, duration_sec: f64) -> DownloadedVideo {
        DownloadedVideo {
            id: "abc".into(),
            width,
            height,
            duration_sec,
            ..Default::default()
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        let idx = args.iter().position(|a| a == flag)?;
        args.get(idx + 1).map(String::as_str)
    }

    #[test]
    fn scale_filter_orientation() {
        assert_eq!(scale_filter(720, 1920, 1080), "scale=720:-2");
        assert_eq!(scale_filter(720, 1080, 1920), "scale=-2:720");
        assert_eq!(scale_filter(540, 720, 720), "scale=540:-2");
        assert_eq!(scale_filter(0, 0, 0), "scale=720:-2");
        assert_eq!(scale_filter(1080, 0, 1920), "scale=1080:-2");
    }

    #[test]
    fn crf_mode_args() {
        let enc = EncodeOptions {
            long_side_px: 720,
            mode_crf: true,
            crf: 26,
            ..Default::default()
        };
        let (args, rate) = build_video_args(
            Path::new("/in.webm"),
            &video(1080, 1920, 30.0),
            &enc,
            Path::new("/out/x.mp4"),
            false,
        );
        assert_eq!(rate, RateControl::Crf(26));
        assert_eq!(&args[..3], ["-y", "-i", "/in.webm"]);
        assert_eq!(value_after(&args, "-vf"), Some("scale=-2:720"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-preset"), Some("veryfast"));
        assert_eq!(value_after(&args, "-profile:v"), Some("main"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("yuv420p"));
        assert_eq!(value_after(&args, "-b:a"), Some("96k"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(value_after(&args, "-g"), Some("48"));
        assert_eq!(value_after(&args, "-keyint_min"), Some("48"));
        assert_eq!(value_after(&args, "-crf"), Some("26"));
        assert!(!args.iter().any(|a| a == "-b:v"));
        assert!(!args.iter().any(|a| a == "-progress"));
        assert_eq!(args.last().map(String::as_str), Some("/out/x.mp4"));
    }

    #[test]
    fn bitrate_mode_args() {
        let enc = EncodeOptions {
            mode_crf: false,
            max_size_mb: 50,
            audio_bitrate_kbps: 128,
            video_max_kbps: 10000,
            key_int: 0,
            ..Default::default()
        };
        let (args, rate) = build_video_args(
            Path::new("/in.mp4"),
            &video(1920, 1080, 60.0),
            &enc,
            Path::new("/out.mp4"),
            true,
        );
        assert_eq!(rate, RateControl::BitrateKbps(6862));
        assert_eq!(value_after(&args, "-b:v"), Some("6862k"));
        assert!(!args.iter().any(|a| a == "-crf"));
        assert!(!args.iter().any(|a| a == "-g"));
        let n = args.len();
        assert_eq!(&args[n - 4..], ["-progress", "pipe:1", "-nostats", "/out.mp4"]);
    }

    #[test]
    fn zero_crf_defaults_and_low_audio_is_floored() {
        let enc = EncodeOptions {
            crf: 0,
            audio_bitrate_kbps: 32,
            preset: String::new(),
            ..Default::default()
        };
        let (args, rate) =
            build_video_args(Path::new("/i"), &video(0, 0, 0.0), &enc, Path::new("/o"), false);
        assert_eq!(rate, RateControl::Crf(22));
        assert_eq!(value_after(&args, "-b:a"), Some("64k"));
        assert_eq!(value_after(&args, "-preset"), Some("veryfast"));
    }

    #[test]
    fn audio_only_args() {
        let enc = EncodeOptions {
            audio_only: true,
            audio_bitrate_kbps: 96,
            ..Default::default()
        };
        let args = build_audio_args(Path::new("/in.mkv"), &enc, Path::new("/out.m4a"), true);
        assert_eq!(
            args,
            [
                "-y", "-i", "/in.mkv", "-vn", "-c:a", "aac", "-b:a", "96k", "-movflags",
                "+faststart", "-progress", "pipe:1", "-nostats", "/out.m4a"
            ]
        );
        let enc = EncodeOptions {
            audio_bitrate_kbps: 0,
            ..enc
        };
        let args = build_audio_args(Path::new("/in.mkv"), &enc, Path::new("/out.m4a"), false);
        assert_eq!(value_after(&args, "-b:a"), Some("128k"));
        assert!(!args.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn display_pairs_flags_with_values() {
        let args: Vec<String> = ["-y", "-i", "/in.mp4", "-vf", "scale=720:-2", "/out.mp4"]
            .map(String::from)
            .to_vec();
        assert_eq!(
            format_args_for_display_multiline(&args),
            "  -y\n  -i /in.mp4\n  -vf scale=720:-2\n  /out.mp4"
        );
        assert_eq!(format_args_for_display_multiline(&[]), "");
    }
}
