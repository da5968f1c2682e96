//! Per-job media records passed between the adapters and the pipeline.

use std::path::PathBuf;

use serde::Serialize;

/// Probed source video. Produced once by the downloader and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadedVideo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub description: String,
    /// 0 when unknown.
    pub width: u32,
    pub height: u32,
    /// 0 when unknown.
    pub duration_sec: f64,
    pub url: String,
    /// Local media file, set once fetched.
    pub input_path: Option<PathBuf>,
}

impl DownloadedVideo {
    /// Larger of width and height, or `None` when either is unknown.
    pub fn long_side(&self) -> Option<u32> {
        (self.width > 0 && self.height > 0).then(|| self.width.max(self.height))
    }

    pub fn is_vertical(&self) -> bool {
        self.width > 0 && self.height > 0 && self.height > self.width
    }
}

/// The encoding plan for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeOptions {
    pub long_side_px: u32,
    /// Constant quality when true, size-constrained bitrate otherwise.
    pub mode_crf: bool,
    pub crf: u32,
    pub max_size_mb: u32,
    pub audio_bitrate_kbps: u32,
    pub video_min_kbps: u32,
    pub video_max_kbps: u32,
    pub preset: String,
    pub profile: String,
    pub audio_only: bool,
    /// GOP size; 0 leaves it to the encoder.
    pub key_int: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            long_side_px: 720,
            mode_crf: true,
            crf: 22,
            max_size_mb: 0,
            audio_bitrate_kbps: crate::config::AUDIO_BITRATE_KBPS,
            video_min_kbps: crate::config::VIDEO_MIN_KBPS,
            video_max_kbps: crate::config::VIDEO_MAX_KBPS,
            preset: crate::config::ENCODER_PRESET.to_string(),
            profile: crate::config::ENCODER_PROFILE.to_string(),
            audio_only: false,
            key_int: crate::config::KEY_INT,
        }
    }
}

/// Result of a successful encode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputVideo {
    pub output_path: PathBuf,
    pub bytes: u64,
    /// Zero unless CRF mode was used.
    pub crf_used: u32,
    /// Zero unless bitrate mode was used.
    pub video_kbps_used: u32,
    pub long_side_px: u32,
    pub audio_only: bool,
}
