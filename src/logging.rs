//! Logger setup for the binary: coloured level, local wall-clock time, short target.
//!
//! While the live dashboard owns stderr, log lines are printed through its
//! [`MultiProgress`] so they land above the bars instead of through them.

use std::io::{self, IsTerminal, Write};

use indicatif::MultiProgress;
use log::LevelFilter;
use parking_lot::Mutex;
use time::OffsetDateTime;
use time::macros::format_description;

const CRATE_PREFIX: &str = "sniplette::";

static DASHBOARD: Mutex<Option<MultiProgress>> = parking_lot::const_mutex(None);

/// Level used when `RUST_LOG` is unset. The live dashboard owns the
/// terminal, so only warnings get through while it runs.
pub fn default_level(verbose: bool, dashboard: bool) -> LevelFilter {
    match (verbose, dashboard) {
        (true, _) => LevelFilter::Debug,
        (false, true) => LevelFilter::Warn,
        (false, false) => LevelFilter::Info,
    }
}

pub fn short_target(target: &str) -> &str {
    target.strip_prefix(CRATE_PREFIX).unwrap_or(target)
}

/// `HH:MM:SS` of `at`, in whatever offset it carries.
fn format_clock(at: OffsetDateTime) -> String {
    let time_fmt = format_description!("[hour]:[minute]:[second]");
    at.format(&time_fmt).unwrap_or_else(|_| "??:??:??".into())
}

/// Local time when the offset can be determined, UTC otherwise.
fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Sends log output through `multi` until [`detach_dashboard`].
pub fn attach_dashboard(multi: MultiProgress) {
    *DASHBOARD.lock() = Some(multi);
}

pub fn detach_dashboard() {
    DASHBOARD.lock().take();
}

pub(crate) fn dashboard_attached() -> bool {
    DASHBOARD.lock().is_some()
}

/// Writer that hides the dashboard's bars while a log line is written.
struct DashboardAware<W> {
    inner: W,
}

impl<W: Write> Write for DashboardAware<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let dashboard = DASHBOARD.lock().clone();
        match dashboard {
            Some(multi) => multi.suspend(|| self.inner.write_all(buf))?,
            None => self.inner.write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Installs the global logger. `RUST_LOG` overrides `default`.
/// Safe to call more than once; later calls are ignored.
pub fn init(default: LevelFilter) {
    let style = if io::stderr().is_terminal() {
        env_logger::WriteStyle::Always
    } else {
        env_logger::WriteStyle::Never
    };
    let _ = env_logger::Builder::new()
        .filter_level(default)
        .parse_env("RUST_LOG")
        .write_style(style)
        .target(env_logger::Target::Pipe(Box::new(DashboardAware {
            inner: io::stderr(),
        })))
        .format(|buf, record| {
            let level = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{}  {level}{:5}{level:#}  {}  {}",
                format_clock(now()),
                record.level(),
                short_target(record.target()),
                record.args()
            )
        })
        .try_init();
}
