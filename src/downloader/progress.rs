//! Parsing of the downloader's human-readable progress lines.
//!
//! `[download]  45.2% of 10.00MiB at  1.50MiB/s ETA 00:04`
//!
//! Percent, speed and ETA are extracted independently; any of them may be
//! missing.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)%").expect("valid percent regex"));
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" at\s+(\S+)").expect("valid speed regex"));
static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ETA\s+(\S+)").expect("valid eta regex"));

const DOWNLOAD_PREFIX: &str = "[download]";

/// What one output line means to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadLine {
    Progress {
        percent: Option<f64>,
        speed: Option<String>,
        eta: Option<Duration>,
    },
    Merging,
    /// Anything else; only surfaced in verbose mode.
    Other,
}

pub fn classify_line(line: &str) -> DownloadLine {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix(DOWNLOAD_PREFIX) {
        return DownloadLine::Progress {
            percent: parse_percent(rest),
            speed: parse_speed(rest),
            eta: ETA_RE
                .captures(rest)
                .and_then(|c| parse_eta(&c[1])),
        };
    }
    if trimmed.contains("Merging formats") || trimmed.contains("[Merger]") {
        return DownloadLine::Merging;
    }
    DownloadLine::Other
}

fn parse_percent(rest: &str) -> Option<f64> {
    PERCENT_RE
        .captures(rest)
        .and_then(|c| c[1].parse::<f64>().ok())
}

fn parse_speed(rest: &str) -> Option<String> {
    SPEED_RE.captures(rest).map(|c| c[1].to_string())
}

/// `SS`, `MM:SS` or `HH:MM:SS`. Anything else, including values that
/// overflow, is rejected.
pub fn parse_eta(s: &str) -> Option<Duration> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut secs = 0u64;
    for part in parts {
        let n: u64 = part.parse().ok()?;
        secs = secs.checked_mul(60)?.checked_add(n)?;
    }
    Some(Duration::from_secs(secs))
}
