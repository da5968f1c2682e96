//! Progress event vocabulary shared by the adapters, the pipeline and every consumer.
//!
//! Producers only ever talk to a [`Reporter`]. The pool wires a
//! [`ChannelReporter`] per run; the plain printer and the live dashboard are
//! reporters too, fed from the pool's consumer loop.

mod channel;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;

pub use channel::{ChannelReporter, EventReceiver, JobEvent, event_channel};

/// Stable per-run job identity. Assigned by the pool before anything starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Coarse job phase. Ordered by how far along a job is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Metadata,
    Downloading,
    Merging,
    Encoding,
    Completed,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Downloading => "downloading",
            Self::Merging => "merging",
            Self::Encoding => "encoding",
            Self::Completed => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One progress snapshot. `percent` is `None` while the total is unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub job_id: JobId,
    pub stage: Stage,
    pub percent: Option<f64>,
    pub eta: Option<Duration>,
    pub bytes: Option<u64>,
    pub speed: Option<String>,
    pub message: String,
}

impl Update {
    pub fn new(job_id: JobId, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            job_id,
            stage,
            percent: None,
            eta: None,
            bytes: None,
            speed: None,
            message: message.into(),
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }
}

/// Raw subprocess output line attributed to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub job_id: JobId,
    pub line: String,
}

/// Terminal event. Exactly one per job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: JobId,
    pub output_path: Option<PathBuf>,
    pub bytes: u64,
    pub error: Option<Arc<AppError>>,
}

impl JobResult {
    pub fn failed(job_id: JobId, error: Arc<AppError>) -> Self {
        Self {
            job_id,
            output_path: None,
            bytes: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Observer of job progress. Implementations must be cheap and non-blocking.
pub trait Reporter: Send + Sync {
    fn update(&self, update: Update);
    fn log(&self, line: LogLine);
    fn result(&self, result: JobResult);
}

/// Discards everything.
pub struct NopReporter;

impl Reporter for NopReporter {
    fn update(&self, _update: Update) {}
    fn log(&self, _line: LogLine) {}
    fn result(&self, _result: JobResult) {}
}

/// Human-readable byte count with a 1024 base: `512 B`, `1.5 MB`.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const SUFFIXES: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / UNIT as f64;
    let mut idx = 0;
    while value >= UNIT as f64 && idx < SUFFIXES.len() - 1 {
        value /= UNIT as f64;
        idx += 1;
    }
    format!("{value:.1} {}", SUFFIXES[idx])
}

/// `1:02:03` / `02:03` style rendering used by both consumers.
pub fn format_eta(eta: Duration) -> String {
    let total = eta.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
