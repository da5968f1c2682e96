//! Consumers of the job event stream: a live `indicatif` board and a plain
//! line printer for non-interactive output.
//!
//! Both keep a [`JobState`] per job and ignore anything that arrives for a
//! job after its result.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;

use crate::error::{AppError, ExitCategory};
use crate::logging;
use crate::pool::QueuedJob;
use crate::progress::{
    JobId, JobResult, LogLine, Reporter, Stage, Update, format_eta, humanize_bytes,
};

const BAR_TEMPLATE: &str = "{prefix:.bold} [{bar:30.cyan/blue}] {percent:>3}% {wide_msg}";
const SPINNER_TEMPLATE: &str = "{prefix:.bold} {spinner:.green} {wide_msg}";
const TICK: Duration = Duration::from_millis(120);

/// Latest known state of one job, as seen by a consumer.
#[derive(Debug, Clone)]
pub struct JobState {
    pub id: JobId,
    pub url: String,
    pub stage: Stage,
    pub percent: Option<f64>,
    pub message: String,
    pub speed: Option<String>,
    pub eta: Option<Duration>,
    pub bytes: Option<u64>,
    pub output: Option<PathBuf>,
    pub error: Option<Arc<AppError>>,
    pub done: bool,
}

impl JobState {
    pub fn new(id: JobId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            stage: Stage::Metadata,
            percent: None,
            message: "Queued".to_string(),
            speed: None,
            eta: None,
            bytes: None,
            output: None,
            error: None,
            done: false,
        }
    }

    /// Returns whether the update changed anything. Late and backwards
    /// updates are ignored.
    pub fn apply_update(&mut self, update: &Update) -> bool {
        if self.done || update.stage < self.stage {
            return false;
        }
        let stage_changed = update.stage != self.stage;
        self.stage = update.stage;
        self.percent = update.percent;
        self.message = update.message.clone();
        if stage_changed {
            self.speed = None;
            self.eta = None;
            self.bytes = None;
        }
        if update.speed.is_some() {
            self.speed = update.speed.clone();
        }
        if update.eta.is_some() {
            self.eta = update.eta;
        }
        if update.bytes.is_some() {
            self.bytes = update.bytes;
        }
        true
    }

    /// Closes the job. Only the first result counts.
    pub fn apply_result(&mut self, result: &JobResult) -> bool {
        if self.done {
            return false;
        }
        self.done = true;
        self.output = result.output_path.clone();
        self.bytes = Some(result.bytes);
        self.error = result.error.clone();
        if let Some(err) = &result.error {
            self.stage = Stage::Error;
            self.message = err.to_string();
        } else {
            // Keep the "Saved: ..." text of the terminal update when it arrived.
            if self.stage != Stage::Completed {
                self.message = result
                    .output_path
                    .as_ref()
                    .map(|p| format!("{} ({})", p.display(), humanize_bytes(result.bytes)))
                    .unwrap_or_default();
            }
            self.stage = Stage::Completed;
            self.percent = Some(100.0);
        }
        true
    }

    fn final_line(&self) -> String {
        match self.stage {
            Stage::Error => format!("error · {}", self.message),
            _ => format!("done · {}", self.message),
        }
    }

    /// `downloading · Downloading · 2.1MiB/s · ETA 00:12`
    pub fn status_line(&self) -> String {
        let mut parts = vec![self.stage.label().to_string()];
        if !self.message.is_empty() && self.message != self.stage.label() {
            parts.push(self.message.clone());
        }
        if !self.done {
            if let Some(speed) = &self.speed {
                parts.push(speed.clone());
            }
            if let Some(eta) = self.eta {
                parts.push(format!("ETA {}", format_eta(eta)));
            }
            if self.stage == Stage::Encoding {
                if let Some(bytes) = self.bytes {
                    parts.push(humanize_bytes(bytes));
                }
            }
        }
        parts.join(" · ")
    }
}

fn initial_states(jobs: &[QueuedJob]) -> BTreeMap<JobId, JobState> {
    jobs.iter()
        .map(|job| (job.id, JobState::new(job.id, job.url.clone())))
        .collect()
}

struct PlainEntry {
    state: JobState,
    printed: Option<Stage>,
}

/// Prints one line per stage change and per result.
pub struct PlainReporter {
    entries: Mutex<BTreeMap<JobId, PlainEntry>>,
    out: Mutex<Box<dyn Write + Send>>,
    verbose: bool,
}

impl PlainReporter {
    pub fn new(jobs: &[QueuedJob], out: impl Write + Send + 'static, verbose: bool) -> Self {
        let entries = initial_states(jobs)
            .into_iter()
            .map(|(id, state)| {
                (
                    id,
                    PlainEntry {
                        state,
                        printed: None,
                    },
                )
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            out: Mutex::new(Box::new(out)),
            verbose,
        }
    }

    pub fn stdout(jobs: &[QueuedJob], verbose: bool) -> Self {
        Self::new(jobs, std::io::stdout(), verbose)
    }

    fn print(&self, line: &str) {
        let mut out = self.out.lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

impl Reporter for PlainReporter {
    fn update(&self, update: Update) {
        let line = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&update.job_id) else {
                return;
            };
            if !entry.state.apply_update(&update) {
                return;
            }
            // Terminal updates are printed with the result.
            if update.stage.is_terminal() || entry.printed == Some(update.stage) {
                return;
            }
            entry.printed = Some(update.stage);
            format!("[{}] {}", update.job_id, entry.state.status_line())
        };
        self.print(&line);
    }

    fn log(&self, line: LogLine) {
        if self.verbose {
            self.print(&format!("[{}] {}", line.job_id, line.line));
        }
    }

    fn result(&self, result: JobResult) {
        let line = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&result.job_id) else {
                return;
            };
            if !entry.state.apply_result(&result) {
                return;
            }
            format!("[{}] {}", result.job_id, entry.state.final_line())
        };
        self.print(&line);
    }
}

/// Live multi-bar dashboard. One bar per job, in job order.
pub struct Dashboard {
    multi: MultiProgress,
    bars: BTreeMap<JobId, ProgressBar>,
    states: Mutex<BTreeMap<JobId, JobState>>,
    verbose: bool,
    owns_logger: bool,
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if self.owns_logger {
            logging::detach_dashboard();
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

impl Dashboard {
    /// Dashboard on stderr. Log output is routed above the bars until it is
    /// dropped.
    pub fn new(jobs: &[QueuedJob], verbose: bool) -> Self {
        let mut dashboard = Self::with_target(jobs, verbose, ProgressDrawTarget::stderr());
        logging::attach_dashboard(dashboard.multi.clone());
        dashboard.owns_logger = true;
        dashboard
    }

    /// Dashboard drawing to `target`; hidden targets are used in tests.
    pub fn with_target(jobs: &[QueuedJob], verbose: bool, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let bars = jobs
            .iter()
            .map(|job| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(spinner_style());
                bar.set_prefix(job.id.to_string());
                bar.set_message(format!("queued · {}", job.url));
                bar.enable_steady_tick(TICK);
                (job.id, bar)
            })
            .collect();
        Self {
            multi,
            bars,
            states: Mutex::new(initial_states(jobs)),
            verbose,
            owns_logger: false,
        }
    }

    fn render(&self, state: &JobState) {
        let Some(bar) = self.bars.get(&state.id) else {
            return;
        };
        match state.percent {
            Some(pct) if !state.done => {
                bar.set_style(bar_style());
                bar.set_position(pct.clamp(0.0, 100.0).round() as u64);
            }
            _ if !state.done => bar.set_style(spinner_style()),
            _ => {}
        }
        bar.set_message(state.status_line());
    }

    /// Snapshot of every job's state, in job order.
    pub fn states(&self) -> Vec<JobState> {
        self.states.lock().values().cloned().collect()
    }
}

impl Reporter for Dashboard {
    fn update(&self, update: Update) {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&update.job_id) else {
            return;
        };
        if state.apply_update(&update) {
            self.render(state);
        }
    }

    fn log(&self, line: LogLine) {
        if self.verbose {
            let _ = self.multi.println(format!("[{}] {}", line.job_id, line.line));
        }
    }

    fn result(&self, result: JobResult) {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&result.job_id) else {
            return;
        };
        if !state.apply_result(&result) {
            return;
        }
        if let Some(bar) = self.bars.get(&result.job_id) {
            let message = state.final_line();
            if result.error.is_some() {
                bar.abandon_with_message(message);
            } else {
                bar.set_style(bar_style());
                bar.finish_with_message(message);
            }
        }
    }
}

/// `N job(s) failed:` followed by one `- URL: message` line per failure.
pub fn failure_summary<'a>(
    failures: impl IntoIterator<Item = (&'a str, &'a AppError)>,
) -> Option<String> {
    let lines: Vec<String> = failures
        .into_iter()
        .map(|(url, err)| format!("- {url}: {err}"))
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!("{} job(s) failed:\n{}", lines.len(), lines.join("\n")))
}

/// Most specific category among the failures, or `Ok`.
pub fn run_exit_category<'a>(errors: impl IntoIterator<Item = &'a AppError>) -> ExitCategory {
    errors
        .into_iter()
        .map(AppError::exit_category)
        .max()
        .unwrap_or(ExitCategory::Ok)
}
