use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use sniplette_core::config::{CaptionMode, Quality, RunOptions, effective_jobs};
use sniplette_core::dashboard::{Dashboard, PlainReporter, failure_summary, run_exit_category};
use sniplette_core::discovery::{Toolchain, find_downloader, find_encoder};
use sniplette_core::downloader::{PlatformPolicy, detect_platform};
use sniplette_core::pipeline::{JobReport, JobService};
use sniplette_core::pool::{JobOutcome, WorkerPool};
use sniplette_core::progress::Reporter;
use sniplette_core::{AppError, ExitCategory, logging};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Download social video clips and re-encode them to fit a size or quality target.",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and encode (the default).
    Run(RunArgs),
    /// Probe and plan only; nothing is downloaded or encoded.
    Plan(PlanArgs),
    /// Show which downloader and encoder would be used.
    Doctor(ToolArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct ToolArgs {
    /// Downloader binary (yt-dlp or youtube-dl)
    #[arg(long, value_name = "PATH")]
    dl_binary: Option<String>,

    /// Encoder binary
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Instagram, YouTube or Threads URLs
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,

    #[arg(short, long, env = "SNIPLETTE_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Quality::Medium)]
    quality: Quality,

    /// Long side in pixels; never upscales
    #[arg(long)]
    resolution: Option<u32>,

    /// Size target in MB; 0 switches to constant quality
    #[arg(long)]
    max_size_mb: Option<u32>,

    #[arg(long)]
    crf: Option<u32>,

    #[arg(long)]
    audio_only: bool,

    #[arg(long, value_enum, default_value_t = CaptionMode::Txt)]
    caption: CaptionMode,

    #[arg(long)]
    keep_temp: bool,

    /// Parallel jobs for the live dashboard
    #[arg(short, long, env = "SNIPLETTE_JOBS")]
    jobs: Option<usize>,

    #[arg(
        short,
        long,
        env = "SNIPLETTE_VERBOSE",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    verbose: bool,

    #[arg(long)]
    dry_run: bool,

    /// Line output instead of the live dashboard; jobs run one at a time
    #[arg(long)]
    no_ui: bool,

    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(Args, Debug, Clone)]
struct PlanArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Print the plans as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            out_dir: self.out_dir.clone(),
            quality: self.quality,
            resolution: self.resolution,
            max_size_mb: self.max_size_mb,
            crf: self.crf,
            audio_only: self.audio_only,
            caption: self.caption,
            keep_temp: self.keep_temp,
            verbose: self.verbose,
            dry_run: self.dry_run,
            temp_root: None,
            platforms: PlatformPolicy::default(),
        }
    }
}

fn exit(category: ExitCategory) -> ExitCode {
    ExitCode::from(category.code())
}

fn fail(err: &AppError) -> ExitCode {
    eprintln!("error: {err}");
    exit(err.exit_category())
}

fn resolve_tools(tools: &ToolArgs, need_encoder: bool) -> Result<Toolchain, AppError> {
    let downloader = find_downloader(tools.dl_binary.as_deref())?;
    let encoder = match find_encoder(tools.ffmpeg.as_deref()) {
        Ok(path) => Some(path),
        Err(e) if need_encoder => return Err(e),
        Err(_) => None,
    };
    Ok(Toolchain {
        downloader,
        encoder,
    })
}

fn doctor(tools: &ToolArgs) -> ExitCode {
    logging::init(logging::default_level(false, false));
    let mut missing = false;
    match find_downloader(tools.dl_binary.as_deref()) {
        Ok(path) => println!("downloader: {}", path.display()),
        Err(e) => {
            missing = true;
            println!("downloader: missing\n{e}");
        }
    }
    match find_encoder(tools.ffmpeg.as_deref()) {
        Ok(path) => println!("ffmpeg: {}", path.display()),
        Err(e) => {
            missing = true;
            println!("ffmpeg: missing\n{e}");
        }
    }
    if missing {
        exit(ExitCategory::MissingDependency)
    } else {
        exit(ExitCategory::Ok)
    }
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!(target: "sniplette::cli", "Interrupted, stopping jobs");
            cancel.cancel();
        }
    });
}

async fn run(args: RunArgs, json: bool) -> ExitCode {
    for url in &args.urls {
        if let Err(e) = detect_platform(url) {
            return fail(&e);
        }
    }

    let plain = args.no_ui || json || !std::io::stdout().is_terminal();
    logging::init(logging::default_level(args.verbose, !plain));

    let tools = match resolve_tools(&args.tools, !args.dry_run) {
        Ok(tools) => tools,
        Err(e) => return fail(&e),
    };
    log::debug!(
        target: "sniplette::cli",
        "Using downloader {} and encoder {}",
        tools.downloader.display(),
        tools
            .encoder
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );

    let service = match JobService::new(tools, args.options()) {
        Ok(service) => service,
        Err(e) => return fail(&e),
    };

    let workers = if plain { 1 } else { effective_jobs(args.jobs) };
    let pool = WorkerPool::new(args.urls.clone(), workers);
    let jobs = pool.jobs().to_vec();
    let observer: Box<dyn Reporter> = if json {
        Box::new(PlainReporter::new(&jobs, std::io::stderr(), args.verbose))
    } else if plain {
        Box::new(PlainReporter::stdout(&jobs, args.verbose))
    } else {
        Box::new(Dashboard::new(&jobs, args.verbose))
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let outcomes = pool.run(Arc::new(service), &*observer, &cancel).await;
    drop(observer);

    if json {
        print_json(&outcomes);
    }
    finish(&outcomes)
}

fn print_json(outcomes: &[JobOutcome<JobReport>]) {
    let reports: Vec<&JobReport> = outcomes.iter().filter_map(|o| o.result.as_ref().ok()).collect();
    match serde_json::to_string_pretty(&reports) {
        Ok(text) => println!("{text}"),
        Err(e) => log::error!(target: "sniplette::cli", "Failed to serialize plans: {}", e),
    }
}

fn finish(outcomes: &[JobOutcome<JobReport>]) -> ExitCode {
    let failures: Vec<(&str, &AppError)> = outcomes
        .iter()
        .filter_map(|o| match &o.result {
            Err(e) => Some((o.job.url.as_str(), e.as_ref())),
            Ok(_) => None,
        })
        .collect();
    for outcome in outcomes {
        if let Ok(report) = &outcome.result {
            if report.overshot {
                eprintln!(
                    "warning: {} is {:.0}% of the size target",
                    outcome.job.url,
                    report.overshoot_ratio * 100.0
                );
            }
            if let Some(dir) = &report.temp_dir {
                eprintln!("kept work dir for {}: {}", outcome.job.url, dir.display());
            }
        }
    }
    if let Some(summary) = failure_summary(failures.iter().copied()) {
        eprintln!("{summary}");
    }
    exit(run_exit_category(failures.iter().map(|(_, e)| *e)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                exit(ExitCategory::Cli)
            } else {
                exit(ExitCategory::Ok)
            };
        }
    };

    match cli.command {
        Some(Command::Doctor(tools)) => doctor(&tools),
        Some(Command::Plan(plan)) => {
            let mut args = plan.run;
            args.dry_run = true;
            run(args, plan.json).await
        }
        Some(Command::Run(args)) => run(args, false).await,
        None => run(cli.run, false).await,
    }
}
