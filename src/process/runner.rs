//! External process spawning with live line callbacks.
//!
//! Both output streams are read concurrently on the calling task. Every
//! complete line is handed to the stream's callback as soon as it arrives;
//! capture into memory is a separate, optional concern. Lines are read with a
//! growable buffer so multi-megabyte JSON dumps are fine.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;
const READ_BUFFER_BYTES: usize = 64 * 1024;

pub type LineCallback = Box<dyn FnMut(&str) + Send>;

/// One external invocation.
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Echo the command line and all output to our own stdout/stderr.
    pub verbose: bool,
    pub capture_stdout: bool,
    pub on_stdout: Option<LineCallback>,
    pub on_stderr: Option<LineCallback>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            dir: None,
            env: Vec::new(),
            verbose: false,
            capture_stdout: false,
            on_stdout: None,
            on_stderr: None,
        }
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self
    }

    pub fn on_stdout(mut self, cb: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_stdout = Some(Box::new(cb));
        self
    }

    pub fn on_stderr(mut self, cb: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_stderr = Some(Box::new(cb));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

#[derive(Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

struct ReadStreamConfig {
    capture: bool,
    limit: Option<usize>,
    echo: Option<Echo>,
    callback: Option<LineCallback>,
}

async fn read_stream<R: AsyncRead + Unpin>(reader: R, mut config: ReadStreamConfig) -> Vec<u8> {
    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, reader);
    let mut line_buf = Vec::with_capacity(256);
    let mut captured = Vec::new();
    loop {
        line_buf.clear();
        match reader.read_until(b'\n', &mut line_buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                log::warn!(target: "sniplette::process", "Stream read failed: {}", err);
                break;
            }
        }
        let text = String::from_utf8_lossy(&line_buf);
        let line = text.trim_end_matches(['\n', '\r']);
        if let Some(cb) = config.callback.as_mut() {
            cb(line);
        }
        match config.echo {
            Some(Echo::Stdout) => {
                let _ = writeln!(std::io::stdout().lock(), "{line}");
            }
            Some(Echo::Stderr) => {
                let _ = writeln!(std::io::stderr().lock(), "{line}");
            }
            None => {}
        }
        if config.capture {
            captured.extend_from_slice(line.as_bytes());
            captured.push(b'\n');
            if let Some(limit) = config.limit {
                if captured.len() > limit {
                    let excess = captured.len() - limit;
                    captured.drain(..excess);
                }
            }
        }
    }
    captured
}

/// Runs a process to completion, or until `cancel` fires.
///
/// A non-zero exit returns [`AppError::ProcessFailed`] carrying whatever was
/// captured. Cancellation kills the process (and its process group on unix)
/// and returns [`AppError::Aborted`].
pub async fn run_command(
    spec: CommandSpec,
    cancel: &CancellationToken,
) -> Result<CommandOutput, AppError> {
    let CommandSpec {
        program,
        args,
        dir,
        env,
        verbose,
        capture_stdout,
        on_stdout,
        on_stderr,
    } = spec;
    let name = program_name(&program);

    if cancel.is_cancelled() {
        return Err(AppError::aborted());
    }
    if verbose {
        let _ = writeln!(
            std::io::stderr().lock(),
            "+ {}",
            format_command_line(&program, &args)
        );
    }
    log::debug!(
        target: "sniplette::process",
        "Spawning {}: args={:?}, dir={:?}",
        program.display(),
        args,
        dir
    );

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &dir {
        cmd.current_dir(dir);
    }
    cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW

    let mut child = cmd.spawn().map_err(|source| AppError::Spawn {
        program: name.clone(),
        source,
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::from("failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::from("failed to capture stderr"))?;

    let stdout_reader = read_stream(
        stdout,
        ReadStreamConfig {
            capture: capture_stdout,
            limit: None,
            echo: verbose.then_some(Echo::Stdout),
            callback: on_stdout,
        },
    );
    let stderr_reader = read_stream(
        stderr,
        ReadStreamConfig {
            capture: true,
            limit: Some(MAX_STDERR_BYTES),
            echo: verbose.then_some(Echo::Stderr),
            callback: on_stderr,
        },
    );

    let finished = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        done = async {
            let (out, err) = tokio::join!(stdout_reader, stderr_reader);
            (child.wait().await, out, err)
        } => Some(done),
    };

    let Some((status, stdout_bytes, stderr_bytes)) = finished else {
        log::info!(
            target: "sniplette::process",
            "Cancelling {} (pid {:?})",
            name,
            child.id()
        );
        kill_tree(&mut child).await;
        return Err(AppError::aborted());
    };

    let status = status?;
    let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    if status.success() {
        log::debug!(target: "sniplette::process", "{} completed successfully", name);
        return Ok(CommandOutput {
            stdout,
            stderr,
            code: 0,
        });
    }

    let code = status.code().unwrap_or(-1);
    let err_preview = stderr
        .lines()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .join("; ");
    log::error!(
        target: "sniplette::process",
        "{} failed (code={}): {}",
        name,
        code,
        err_preview
    );
    Err(AppError::ProcessFailed {
        program: name,
        code,
        stdout,
        stderr,
    })
}

/// Kills the child and, on unix, every process in its group (merger
/// subprocesses started by the downloader live there too).
async fn kill_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .args(["-KILL", "--", &format!("-{pid}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
    let _ = child.kill().await;
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Shell-like rendering for verbose output and logs.
pub fn format_command_line(program: &Path, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(quote_arg(&program.to_string_lossy()));
    parts.extend(args.iter().map(|a| quote_arg(a)));
    parts.join(" ")
}

fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,%@".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
