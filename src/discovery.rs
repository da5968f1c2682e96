//! Locating the external downloader and encoder binaries.
//!
//! Resolution happens once at startup; the result is a [`Toolchain`] value
//! handed to the pipeline, never a global.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::AppError;

pub const DOWNLOADER_ENV: &str = "SNIPLETTE_DL_BINARY";
pub const LEGACY_DOWNLOADER_ENV: &str = "IG2WA_DL_BINARY";
pub const ENCODER_ENV: &str = "FFMPEG_PATH";

const DOWNLOADER_NAMES: [&str; 2] = ["yt-dlp", "youtube-dl"];
const ENCODER_NAME: &str = "ffmpeg";

/// Resolved external tool locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolchain {
    pub downloader: PathBuf,
    /// Not needed for plan-only runs.
    pub encoder: Option<PathBuf>,
}

#[cfg(target_os = "windows")]
fn executable_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    if Path::new(name).extension().is_some() {
        vec![dir.join(name)]
    } else {
        vec![dir.join(format!("{name}.exe")), dir.join(name)]
    }
}

#[cfg(not(target_os = "windows"))]
fn executable_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// First executable named `name` in the given PATH-style list.
fn find_in_path(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let path_var = path_var?;
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| executable_candidates(&dir, name))
        .find(|candidate| is_executable(candidate))
}

fn common_paths(name: &str) -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from(format!("/opt/homebrew/bin/{name}")),
            PathBuf::from(format!("/usr/local/bin/{name}")),
            PathBuf::from(format!("/opt/local/bin/{name}")),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from(format!("/usr/bin/{name}")),
            PathBuf::from(format!("/usr/local/bin/{name}")),
        ]
    }

    #[cfg(not(unix))]
    {
        let _ = name;
        vec![]
    }
}

/// An explicit path, or a bare name looked up in PATH.
fn resolve_explicit(value: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = PathBuf::from(value);
    if candidate.exists() {
        return Some(candidate);
    }
    let is_bare_name = candidate.components().count() == 1;
    if is_bare_name {
        find_in_path(value, path_var)
    } else {
        None
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn find_downloader_in(
    custom: Option<&str>,
    env_value: Option<String>,
    legacy_env_value: Option<String>,
    path_var: Option<&OsStr>,
) -> Result<PathBuf, AppError> {
    let explicit = custom
        .map(str::to_string)
        .filter(|v| !v.trim().is_empty())
        .map(|v| (v, "--dl-binary"))
        .or_else(|| non_empty(env_value).map(|v| (v, DOWNLOADER_ENV)))
        .or_else(|| non_empty(legacy_env_value).map(|v| (v, LEGACY_DOWNLOADER_ENV)));

    if let Some((value, source)) = explicit {
        return match resolve_explicit(&value, path_var) {
            Some(path) => {
                log::debug!(
                    target: "sniplette::discovery",
                    "Downloader from {}: {}",
                    source,
                    path.display()
                );
                Ok(path)
            }
            None => Err(AppError::DependencyNotFound(format!(
                "could not find downloader at {value:?} (from {source})"
            ))),
        };
    }

    for name in DOWNLOADER_NAMES {
        if let Some(path) = find_in_path(name, path_var) {
            log::debug!(
                target: "sniplette::discovery",
                "Downloader found in PATH: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    log::error!(
        target: "sniplette::discovery",
        "Downloader not found in PATH"
    );
    Err(AppError::DependencyNotFound(
        "could not find yt-dlp or youtube-dl in PATH. Please install yt-dlp:\n  - macOS: brew install yt-dlp\n  - Linux: pipx install yt-dlp\n  - Windows: winget install yt-dlp"
            .to_string(),
    ))
}

fn find_encoder_in(
    custom: Option<&str>,
    env_value: Option<String>,
    path_var: Option<&OsStr>,
) -> Result<PathBuf, AppError> {
    if let Some(value) = custom.filter(|v| !v.trim().is_empty()) {
        return resolve_explicit(value, path_var).ok_or_else(|| {
            AppError::DependencyNotFound(format!("could not find ffmpeg at {value:?}"))
        });
    }

    if let Some(value) = non_empty(env_value) {
        let p = PathBuf::from(&value);
        if p.exists() {
            log::debug!(
                target: "sniplette::discovery",
                "FFmpeg path from {} env: {}",
                ENCODER_ENV,
                p.display()
            );
            return Ok(p);
        }
        log::warn!(
            target: "sniplette::discovery",
            "{} points to a missing file, falling back to PATH: {}",
            ENCODER_ENV,
            value
        );
    }

    if let Some(p) = find_in_path(ENCODER_NAME, path_var) {
        log::debug!(
            target: "sniplette::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    for path in common_paths(ENCODER_NAME) {
        if is_executable(&path) {
            log::debug!(
                target: "sniplette::discovery",
                "FFmpeg found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    log::error!(
        target: "sniplette::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::DependencyNotFound(
        "could not find ffmpeg. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Downloader lookup order: `custom`, `SNIPLETTE_DL_BINARY`,
/// `IG2WA_DL_BINARY`, then `yt-dlp` and `youtube-dl` on PATH.
pub fn find_downloader(custom: Option<&str>) -> Result<PathBuf, AppError> {
    let path_var = std::env::var_os("PATH");
    find_downloader_in(
        custom,
        std::env::var(DOWNLOADER_ENV).ok(),
        std::env::var(LEGACY_DOWNLOADER_ENV).ok(),
        path_var.as_deref(),
    )
}

/// Encoder lookup order: `custom`, `FFMPEG_PATH`, `ffmpeg` on PATH, then
/// common install locations.
pub fn find_encoder(custom: Option<&str>) -> Result<PathBuf, AppError> {
    let path_var = std::env::var_os("PATH");
    find_encoder_in(custom, std::env::var(ENCODER_ENV).ok(), path_var.as_deref())
}
