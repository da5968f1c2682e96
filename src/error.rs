//! Crate error type and the exit-code taxonomy surfaced to the shell.

use std::fmt;
use std::path::PathBuf;

/// Pipeline stage an error is attributed to. Rendered as the message prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Downloader,
    Encode,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downloader => f.write_str("downloader"),
            Self::Encode => f.write_str("encode"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    DependencyNotFound(String),

    #[error("{platform} is not supported by the downloader: {url}")]
    UnsupportedPlatform { platform: String, url: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}{}", stderr_summary(.stderr))]
    ProcessFailed {
        program: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("metadata: {0}")]
    Metadata(String),

    #[error("no downloaded file found in {}", .0.display())]
    NoDownloadedFile(PathBuf),

    #[error("{stage}: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<AppError>,
    },

    #[error("aborted")]
    Aborted,
}

/// Process exit status categories. Scripts branch on these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExitCategory {
    Ok = 0,
    Cli = 1,
    MissingDependency = 2,
    Download = 3,
    Encode = 4,
}

impl ExitCategory {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl AppError {
    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn in_stage(self, stage: PipelineStage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Innermost error, with stage wrappers peeled off.
    pub fn root(&self) -> &AppError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.root(), Self::Aborted)
    }

    pub fn is_unsupported_platform(&self) -> bool {
        matches!(self.root(), Self::UnsupportedPlatform { .. })
    }

    pub fn exit_category(&self) -> ExitCategory {
        match self {
            Self::Stage {
                stage: PipelineStage::Downloader,
                ..
            } => ExitCategory::Download,
            Self::Stage {
                stage: PipelineStage::Encode,
                ..
            } => ExitCategory::Encode,
            Self::DependencyNotFound(_) => ExitCategory::MissingDependency,
            Self::UnsupportedPlatform { .. } | Self::Metadata(_) | Self::NoDownloadedFile(_) => {
                ExitCategory::Download
            }
            _ => ExitCategory::Cli,
        }
    }
}

const SUMMARY_MAX_CHARS: usize = 160;
const ELLIPSIS: &str = "…";

/// Last non-empty stderr line, truncated. Tools print the actual failure last.
fn stderr_summary(stderr: &str) -> String {
    let Some(line) = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return String::new();
    };
    if line.chars().count() <= SUMMARY_MAX_CHARS {
        format!(": {line}")
    } else {
        let head: String = line.chars().take(SUMMARY_MAX_CHARS - 1).collect();
        format!(": {head}{ELLIPSIS}")
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "aborted" {
            AppError::Aborted
        } else {
            AppError::Config(s)
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_aborted_string() {
        let e = AppError::from("aborted");
        assert!(matches!(e, AppError::Aborted));
    }

    #[test]
    fn from_other_string_is_config() {
        let e = AppError::from("downloader path is required");
        assert!(matches!(&e, AppError::Config(m) if m == "downloader path is required"));
        assert_eq!(e.exit_category(), ExitCategory::Cli);
    }

    #[test]
    fn stage_prefix_in_message() {
        let e = AppError::Aborted.in_stage(PipelineStage::Encode);
        assert_eq!(e.to_string(), "encode: aborted");
        assert!(e.is_aborted());
        assert_eq!(e.exit_category(), ExitCategory::Encode);
    }

    #[test]
    fn process_failure_uses_last_stderr_line() {
        let e = AppError::ProcessFailed {
            program: "yt-dlp".into(),
            code: 1,
            stdout: String::new(),
            stderr: "WARNING: slow\nERROR: Video unavailable\n\n".into(),
        };
        assert_eq!(e.to_string(), "yt-dlp exited with code 1: ERROR: Video unavailable");
        let wrapped = e.in_stage(PipelineStage::Downloader);
        assert_eq!(wrapped.exit_category(), ExitCategory::Download);
    }

    #[test]
    fn process_failure_without_stderr() {
        let e = AppError::ProcessFailed {
            program: "ffmpeg".into(),
            code: 69,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(e.to_string(), "ffmpeg exited with code 69");
    }

    #[test]
    fn long_stderr_line_is_truncated() {
        let long = "x".repeat(500);
        let summary = stderr_summary(&long);
        assert!(summary.ends_with(ELLIPSIS));
        assert_eq!(summary.chars().count(), 2 + SUMMARY_MAX_CHARS);
    }

    #[test]
    fn unsupported_platform_is_classified() {
        let e = AppError::UnsupportedPlatform {
            platform: "Threads".into(),
            url: "https://www.threads.net/@a/post/1".into(),
        }
        .in_stage(PipelineStage::Downloader);
        assert!(e.is_unsupported_platform());
        assert!(!e.is_aborted());
        assert_eq!(
            e.to_string(),
            "downloader: Threads is not supported by the downloader: https://www.threads.net/@a/post/1"
        );
    }

    #[test]
    fn dependency_error_maps_to_missing_dependency() {
        let e = AppError::DependencyNotFound("ffmpeg not found".into());
        assert_eq!(e.exit_category().code(), 2);
    }
}
