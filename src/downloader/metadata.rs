//! Downloader `--dump-json` output parsing.

use serde::Deserialize;

use crate::error::AppError;
use crate::media::DownloadedVideo;

/// Subset of the downloader's info dict we care about. Every field may be
/// absent or `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

impl VideoInfo {
    fn has_id(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }

    pub fn into_video(self, url: &str) -> DownloadedVideo {
        DownloadedVideo {
            id: self.id.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            uploader: self.uploader.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            width: dimension(self.width),
            height: dimension(self.height),
            duration_sec: self.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0),
            url: url.to_string(),
            input_path: None,
        }
    }
}

fn dimension(value: Option<f64>) -> u32 {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v.round() as u32)
        .unwrap_or(0)
}

/// Finds the metadata object in `output`.
///
/// The first JSON value is tried first; if that fails or has no `id`, lines
/// are scanned from the end for the last object with a non-empty `id`, since
/// diagnostics can be interleaved with the dump.
pub fn parse_video_info(output: &str) -> Result<VideoInfo, AppError> {
    let data = output.trim();
    let first = serde_json::Deserializer::from_str(data)
        .into_iter::<VideoInfo>()
        .next();
    let first_err = match first {
        Some(Ok(info)) if info.has_id() => return Ok(info),
        Some(Ok(_)) => "metadata has no id".to_string(),
        Some(Err(e)) => e.to_string(),
        None => "empty output".to_string(),
    };

    for line in data.lines().rev().map(str::trim) {
        if !line.starts_with('{') {
            continue;
        }
        if let Ok(info) = serde_json::from_str::<VideoInfo>(line) {
            if info.has_id() {
                return Ok(info);
            }
        }
    }

    Err(AppError::Metadata(format!("parse metadata JSON: {first_err}")))
}
