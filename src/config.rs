//! Run configuration and quality presets.

use std::path::PathBuf;

use crate::downloader::PlatformPolicy;

/// Fixed parts of every encoding plan.
pub const AUDIO_BITRATE_KBPS: u32 = 96;
pub const VIDEO_MIN_KBPS: u32 = 500;
pub const VIDEO_MAX_KBPS: u32 = 8000;
pub const ENCODER_PRESET: &str = "veryfast";
pub const ENCODER_PROFILE: &str = "main";
pub const KEY_INT: u32 = 48;

pub const DEFAULT_JOBS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    pub fn default_resolution(self) -> u32 {
        match self {
            Self::Low => 540,
            Self::Medium => 720,
            Self::High => 1080,
        }
    }

    pub fn default_max_size_mb(self) -> u32 {
        match self {
            Self::Low => 20,
            Self::Medium => 50,
            Self::High => 100,
        }
    }

    pub fn default_crf(self) -> u32 {
        match self {
            Self::Low => 26,
            Self::Medium => 22,
            Self::High => 19,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionMode {
    #[default]
    Txt,
    None,
}

/// Everything a job needs to know about the user's request.
///
/// `None` in the optional fields means "use the preset".
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub out_dir: PathBuf,
    pub quality: Quality,
    pub resolution: Option<u32>,
    /// `Some(0)` selects constant-quality mode explicitly.
    pub max_size_mb: Option<u32>,
    pub crf: Option<u32>,
    pub audio_only: bool,
    pub caption: CaptionMode,
    pub keep_temp: bool,
    pub verbose: bool,
    pub dry_run: bool,
    /// Parent of per-job work directories. Defaults to `$TMPDIR/sniplette`.
    pub temp_root: Option<PathBuf>,
    pub platforms: PlatformPolicy,
}

impl RunOptions {
    pub fn effective_resolution(&self) -> u32 {
        self.resolution
            .filter(|&r| r > 0)
            .unwrap_or_else(|| self.quality.default_resolution())
    }

    pub fn effective_max_size_mb(&self) -> u32 {
        self.max_size_mb
            .unwrap_or_else(|| self.quality.default_max_size_mb())
    }

    pub fn effective_crf(&self) -> u32 {
        self.crf
            .filter(|&c| c > 0)
            .unwrap_or_else(|| self.quality.default_crf())
    }

    pub fn effective_temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sniplette"))
    }

    pub fn writes_caption(&self) -> bool {
        self.caption == CaptionMode::Txt
    }
}

/// Worker count coerced to at least one.
pub fn effective_jobs(jobs: Option<usize>) -> usize {
    jobs.unwrap_or(DEFAULT_JOBS).max(1)
}
