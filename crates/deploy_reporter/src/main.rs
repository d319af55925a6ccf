use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::{Args, CommandFactory, Parser, Subcommand};
use deploy_reporter_core::config::{
    ConnectionSettings, DEFAULT_CONFIG_FILENAME, ReporterConfig, load_config, normalize_path,
};
use deploy_reporter_core::notify::{SlackDirectory, SlackNotifier};
use deploy_reporter_core::orchestrator::{
    NotificationStatus, Orchestrator, RunOptions, RunOutcome, RunReport,
};
use deploy_reporter_core::publish::ConfluenceClient;
use deploy_reporter_core::runlog::{LogFollower, LogMaintenance, RunLog};
use deploy_reporter_core::tracker::JiraClient;
use deploy_reporter_core::window::{RunMode, resolve};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(
    name = "deploy-reporter",
    version,
    about = "Publish the weekly deployment schedule page and notify on changes"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved configuration (secrets redacted)")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fetch, diff, publish and notify for one week")]
    Run(RunArgs),
    #[command(about = "Print the week window a mode resolves to")]
    Window(WindowArgs),
    #[command(about = "Inspect or prune the daily execution logs")]
    Logs(LogsArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(default_value = "update", help = "current | create | next | last | update")]
    mode: String,
    #[arg(long, help = "Page through search results (default)")]
    pagination: bool,
    #[arg(long, conflicts_with = "pagination", help = "Fetch a single large result page")]
    no_pagination: bool,
    #[arg(long, help = "Publish even when nothing changed")]
    force_update: bool,
    #[arg(long, help = "Skip chat notifications")]
    mute: bool,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct WindowArgs {
    #[arg(default_value = "current")]
    mode: String,
    #[arg(long, value_name = "YYYY-MM-DD")]
    today: Option<NaiveDate>,
}

#[derive(Debug, Args)]
struct LogsArgs {
    #[command(subcommand)]
    command: LogsSubcommand,
}

#[derive(Debug, Subcommand)]
enum LogsSubcommand {
    Summary {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    Today,
    #[command(about = "Follow a daily log as it grows (Ctrl+C to stop)")]
    Tail {
        #[arg(long, default_value_t = 0, help = "Days before today")]
        days: u32,
    },
    Cleanup {
        #[arg(long, default_value_t = 30)]
        keep_days: u32,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Run(args)) => run_report(&runtime, args),
        Some(Commands::Window(args)) => run_window(&runtime, args),
        Some(Commands::Logs(LogsArgs { command })) => match command {
            LogsSubcommand::Summary { days } => run_logs_summary(&runtime, days),
            LogsSubcommand::Today => run_logs_today(&runtime),
            LogsSubcommand::Tail { days } => run_logs_tail(&runtime, days),
            LogsSubcommand::Cleanup { keep_days } => run_logs_cleanup(&runtime, keep_days),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(runtime: &RuntimeOptions) -> Result<ReporterConfig> {
    let path = runtime
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let file = load_config(&path)?;
    Ok(ReporterConfig::resolve(&file))
}

fn parse_mode(value: &str) -> RunMode {
    let mode = RunMode::parse_or_default(value);
    if !mode.as_str().eq_ignore_ascii_case(value.trim()) {
        warn!(requested = value, "unknown mode; using current");
    }
    mode
}

fn run_report(runtime: &RuntimeOptions, args: RunArgs) -> Result<()> {
    let config = resolve_config(runtime)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}\n", config.diagnostics());
    }

    let connection = config.require_connection()?;

    let today = Local::now().date_naive();
    let mut log = RunLog::open(&config.log_dir, today)?;
    log.begin(&env::args().collect::<Vec<_>>().join(" "))?;

    let result = execute_run(&config, &connection, &args, today, &mut log);
    if let Err(error) = &result {
        log.note(&format!("error: {error:#}"));
    }
    let exit_code = if result.is_ok() { 0 } else { 1 };
    if let Err(error) = log.finish(exit_code) {
        warn!(error = %format!("{error:#}"), "failed to close execution log");
    }
    result
}

fn execute_run(
    config: &ReporterConfig,
    connection: &ConnectionSettings,
    args: &RunArgs,
    today: NaiveDate,
    log: &mut RunLog,
) -> Result<()> {
    let fetcher = JiraClient::new(connection, &config.http)?;
    let publisher = ConfluenceClient::new(connection, &config.http)?;
    let notifier = SlackNotifier::new(
        config.slack_webhook_url.clone(),
        config.notify_hours,
        &config.http,
    )?;
    let directory = SlackDirectory::new(config.slack_bot_token.clone(), &config.http)?;
    let mut orchestrator = Orchestrator::new(config.clone(), fetcher, publisher, notifier, directory)?;

    let options = RunOptions {
        mode: parse_mode(&args.mode),
        today,
        paginate: args.pagination || !args.no_pagination,
        force_update: args.force_update,
        mute: args.mute,
    };
    let report = orchestrator.run(options)?;

    let summary = format!(
        "{} {}: tickets {}, changes {}, {}, notification {}",
        report.mode,
        report.window.label,
        report.ticket_count,
        report.diff.summary_line(),
        outcome_label(&report.outcome),
        report.notification.as_str()
    );
    log.note(&summary);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, orchestrator.request_count());
    }
    Ok(())
}

fn print_report(report: &RunReport, request_count: usize) {
    println!("run: {}", report.mode);
    println!("window.label: {}", report.window.label);
    println!("window.start: {}", report.window.start_str());
    println!("window.end: {}", report.window.end_str());
    println!("tickets: {}", report.ticket_count);
    println!("changes: {}", report.diff.summary_line());
    println!(
        "fingerprint: {}",
        report.fingerprint.as_deref().unwrap_or("<none>")
    );
    println!("publish.outcome: {}", outcome_label(&report.outcome));
    println!(
        "page_url: {}",
        report.page_url.as_deref().unwrap_or("<none>")
    );
    match &report.notification {
        NotificationStatus::Failed(error) => println!("notification: failed ({error})"),
        status => println!("notification: {}", status.as_str()),
    }
    println!("deploy_alerts_sent: {}", report.deploy_alerts_sent);
    println!("snapshot_written: {}", format_flag(report.snapshot_written));
    println!("requests: {request_count}");
}

fn outcome_label(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Skipped => "skipped",
        RunOutcome::Published(publish) => publish.as_str(),
    }
}

fn run_window(runtime: &RuntimeOptions, args: WindowArgs) -> Result<()> {
    let mode = parse_mode(&args.mode);
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let window = resolve(mode, today);
    println!("mode: {mode}");
    println!("today: {}", today.format("%Y-%m-%d"));
    println!("window.start: {}", window.start_str());
    println!("window.end: {}", window.end_str());
    println!("window.label: {}", window.label);
    println!("storage_slot: {}", mode.storage_slot());
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolve_config(runtime)?.diagnostics());
    }
    Ok(())
}

fn run_logs_summary(runtime: &RuntimeOptions, days: u32) -> Result<()> {
    let config = resolve_config(runtime)?;
    let today = Local::now().date_naive();
    let summaries = LogMaintenance::new(&config.log_dir).summaries(days, today);
    println!("log_dir: {}", normalize_path(&config.log_dir));
    println!("days: {days}");
    println!("files: {}", summaries.len());
    let mut total_bytes = 0u64;
    for summary in &summaries {
        total_bytes += summary.size_bytes;
        println!(
            "  - {} {} bytes, {} runs ({})",
            summary.date.format("%Y-%m-%d"),
            summary.size_bytes,
            summary.executions,
            normalize_path(&summary.path)
        );
    }
    println!("total_bytes: {total_bytes}");
    Ok(())
}

fn run_logs_today(runtime: &RuntimeOptions) -> Result<()> {
    let config = resolve_config(runtime)?;
    let today = Local::now().date_naive();
    match LogMaintenance::new(&config.log_dir).read_today(today)? {
        Some(content) => print!("{content}"),
        None => println!("no log for {}", today.format("%Y-%m-%d")),
    }
    Ok(())
}

fn run_logs_tail(runtime: &RuntimeOptions, days: u32) -> Result<()> {
    let config = resolve_config(runtime)?;
    let today = Local::now().date_naive();
    let path = LogMaintenance::new(&config.log_dir).path_for(days, today);
    if !path.exists() {
        println!("no log file: {}", normalize_path(&path));
        return Ok(());
    }
    println!("following: {}", normalize_path(&path));
    println!("{}", "=".repeat(80));
    let mut follower = LogFollower::new(path);
    loop {
        let chunk = follower.read_new()?;
        if !chunk.is_empty() {
            print!("{chunk}");
            io::stdout().flush()?;
        }
        thread::sleep(TAIL_POLL_INTERVAL);
    }
}

fn run_logs_cleanup(runtime: &RuntimeOptions, keep_days: u32) -> Result<()> {
    let config = resolve_config(runtime)?;
    let today = Local::now().date_naive();
    let removed = LogMaintenance::new(&config.log_dir).cleanup(keep_days, today)?;
    println!("log_dir: {}", normalize_path(&config.log_dir));
    println!("keep_days: {keep_days}");
    println!("removed: {}", removed.len());
    for path in &removed {
        println!("  - {}", normalize_path(path));
    }
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
