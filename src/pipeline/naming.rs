//! Output file naming and caption sidecar text.

use std::fs;
use std::path::{Path, PathBuf};

use crate::media::{DownloadedVideo, EncodeOptions};

const MAX_NAME_CHARS: usize = 200;
const FORBIDDEN: &[char] = &[
    ' ', '[', ']', '/', '\\', ':', '*', '?', '"', '<', '>', '|', '#', '%', '{', '}', '$', '!',
    '@', '+', '^', '~', '`', '=', '&', ';',
];
const UNKNOWN_UPLOADER: &str = "unknown";

/// Makes `s` safe as a file name component. Never returns an empty string.
pub fn sanitize_filename(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = if FORBIDDEN.contains(&c) { '_' } else { c };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed: String = out
        .trim_matches(['.', '_', '-'])
        .chars()
        .take(MAX_NAME_CHARS)
        .collect();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

/// Base name (no extension) describing the source and the encoding plan.
pub fn output_basename(video: &DownloadedVideo, enc: &EncodeOptions) -> String {
    let uploader = if video.uploader.trim().is_empty() {
        UNKNOWN_UPLOADER
    } else {
        &video.uploader
    };
    let id = if video.id.is_empty() {
        &video.title
    } else {
        &video.id
    };
    let mut parts = vec![sanitize_filename(uploader), sanitize_filename(id)];
    if enc.audio_only {
        parts.push("audio".to_string());
    } else {
        parts.push(format!("{}p", enc.long_side_px));
        if enc.mode_crf {
            parts.push(format!("CRF{}", enc.crf));
        } else if enc.max_size_mb > 0 {
            parts.push(format!("{}MB", enc.max_size_mb));
        }
    }
    parts.join("_")
}

pub fn output_extension(audio_only: bool) -> &'static str {
    if audio_only { "m4a" } else { "mp4" }
}

/// Title, uploader and URL lines, then the original description.
pub fn caption_text(video: &DownloadedVideo) -> String {
    let mut text = String::new();
    for line in [video.title.trim(), video.uploader.trim(), video.url.as_str()] {
        if !line.is_empty() {
            text.push_str(line);
            text.push('\n');
        }
    }
    text.push_str("\n---\nORIGINAL CAPTION\n");
    if !video.description.is_empty() {
        text.push_str(&video.description);
        text.push('\n');
    }
    text
}

/// Writes `content` next to `output_path` with a `.txt` extension.
pub fn write_caption_file(output_path: &Path, content: &str) -> std::io::Result<PathBuf> {
    let path = output_path.with_extension("txt");
    fs::write(&path, content)?;
    Ok(path)
}
