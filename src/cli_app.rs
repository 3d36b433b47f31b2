//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use qa_tracker::catalog::intake::{TaskParser, parse_task_export};
use qa_tracker::catalog::{Category, Priority, TestCase, TestCode};
use qa_tracker::core::config::Config;
use qa_tracker::core::errors::QatError;
use qa_tracker::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};
use qa_tracker::store::Store;
use qa_tracker::store::bugs::{BugReport, BugSeverity, BugStatus, BugUpdate, KnownBugRegistry};
use qa_tracker::store::catalog::TestCatalog;
use qa_tracker::store::sessions::{SessionLedger, TestStatus};
use qa_tracker::store::stats::StatsEngine;
use qa_tracker::tracker::classify::{RawOutcome, classify};
use qa_tracker::tracker::queue::load_queue;
use qa_tracker::tracker::recorder::{RecordRequest, ResultRecorder};
use qa_tracker::tracker::schedule::plan_batch;
use qa_tracker::tracker::state::{SessionTracker, TrackerStatus};
use qa_tracker::tracker::stop::StopSignal;

/// QA tracker: schedules manual test sweeps and records their results.
#[derive(Debug, Parser)]
#[command(
    name = "qat",
    author,
    version,
    about = "QA tracker - test sessions, results and known bugs",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Create the database and seed default settings.
    Init(InitArgs),
    /// Manage test case definitions.
    Catalog(CatalogArgs),
    /// Open, close and inspect test sessions.
    Session(SessionArgs),
    /// Record one test result into a running session.
    Record(RecordArgs),
    /// Classify raw outcome text without recording it.
    Classify(ClassifyArgs),
    /// Inspect and drive the sweep tracker.
    Tracker(TrackerArgs),
    /// Plan the next batch of tests to execute.
    NextBatch(NextBatchArgs),
    /// Inspect and manage known bugs.
    Bugs(BugsArgs),
    /// Show aggregated statistics.
    Stats(StatsArgs),
    /// Read and update application settings.
    Settings(SettingsArgs),
    /// Request a running sweep to stop between tests.
    Stop(StopArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct InitArgs {
    /// Also write a default config file when none exists.
    #[arg(long)]
    write_config: bool,
}

// ──────────────────── catalog ────────────────────

#[derive(Debug, Clone, Args)]
struct CatalogArgs {
    #[command(subcommand)]
    command: CatalogCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum CatalogCommand {
    /// Add a test case.
    Add(CatalogAddArgs),
    /// Show one test case.
    Get(CodeArg),
    /// List test cases, optionally for one category.
    List(CatalogListArgs),
    /// Import tasks from a JSON export (`[{name, notes, gid}]`).
    Import(ImportArgs),
}

#[derive(Debug, Clone, Args)]
struct CatalogAddArgs {
    /// Test code, e.g. TC-LOGIN-001.
    #[arg(value_parser = parse_code)]
    code: TestCode,
    /// Human-readable name.
    name: String,
    /// Priority P0..P3.
    #[arg(long, value_parser = parse_priority, default_value = "P2")]
    priority: Priority,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "")]
    preconditions: String,
    /// One step; repeat for several.
    #[arg(long = "step", value_name = "TEXT")]
    steps: Vec<String>,
    #[arg(long, default_value = "")]
    expected: String,
    /// Reference to the task in the external tracker.
    #[arg(long, value_name = "REF")]
    external_ref: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct CodeArg {
    /// Test code, e.g. TC-LOGIN-001.
    code: String,
}

#[derive(Debug, Clone, Args)]
struct CatalogListArgs {
    /// Category name, label or code segment.
    #[arg(long, value_parser = parse_category)]
    category: Option<Category>,
}

#[derive(Debug, Clone, Args)]
struct ImportArgs {
    /// JSON file with the exported tasks.
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

// ──────────────────── sessions ────────────────────

#[derive(Debug, Clone, Args)]
struct SessionArgs {
    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum SessionCommand {
    /// Open a new running session.
    Start(SessionStartArgs),
    /// Complete a running session.
    End(SessionEndArgs),
    /// Show a session with its results.
    Show(SessionIdArg),
    /// List recent sessions.
    List(SessionListArgs),
}

#[derive(Debug, Clone, Args)]
struct SessionStartArgs {
    /// Free-form mode label (e.g. smoke, full).
    #[arg(long)]
    mode: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct SessionEndArgs {
    session_id: String,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct SessionIdArg {
    session_id: String,
}

#[derive(Debug, Clone, Args)]
struct SessionListArgs {
    #[arg(long, default_value_t = 20, value_name = "N")]
    limit: u32,
}

// ──────────────────── record / classify ────────────────────

#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("outcome_source")
        .required(true)
        .args(["status", "outcome"])
))]
struct RecordArgs {
    /// Session to record into.
    #[arg(long)]
    session: String,
    /// Test code.
    #[arg(long)]
    code: String,
    /// Explicit status (passed, failed, blocked, skipped).
    #[arg(long, value_parser = parse_status)]
    status: Option<TestStatus>,
    /// Raw outcome text to classify instead of an explicit status.
    #[arg(long)]
    outcome: Option<String>,
    /// RFC3339 start time (defaults to now).
    #[arg(long, value_parser = parse_timestamp)]
    started_at: Option<DateTime<Utc>>,
    /// RFC3339 finish time (defaults to now).
    #[arg(long, value_parser = parse_timestamp)]
    finished_at: Option<DateTime<Utc>>,
    #[arg(long)]
    error: Option<String>,
    #[arg(long, value_name = "PATH")]
    screenshot: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    /// Console error captured during the run; repeatable.
    #[arg(long = "console-error", value_name = "TEXT")]
    console_errors: Vec<String>,
    /// Mark this tracker identifier completed once the result is stored.
    #[arg(long, value_name = "IDENTIFIER")]
    mark: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ClassifyArgs {
    /// Raw outcome text.
    text: Option<String>,
    #[arg(long, value_name = "PATH")]
    screenshot: Option<String>,
    #[arg(long = "console-error", value_name = "TEXT")]
    console_errors: Vec<String>,
}

// ──────────────────── tracker ────────────────────

#[derive(Debug, Clone, Args)]
struct TrackerArgs {
    #[command(subcommand)]
    command: Option<TrackerCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum TrackerCommand {
    /// Show tracker status.
    Status,
    /// Start a sweep from a queue file.
    Start(TrackerStartArgs),
    /// Mark an identifier completed.
    Complete(IdentifierArg),
    /// Show queue entries not yet completed.
    Remaining(RemainingArgs),
    /// Finish the running sweep.
    Finish,
    /// Return to idle, discarding the queue.
    Reset,
}

#[derive(Debug, Clone, Args)]
struct TrackerStartArgs {
    /// Queue file (`{"tests": [...]}`).
    #[arg(long, value_name = "PATH")]
    queue: PathBuf,
    /// Category label for this sweep.
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct IdentifierArg {
    identifier: String,
}

#[derive(Debug, Clone, Args)]
struct RemainingArgs {
    /// Maximum entries to print (defaults to scheduling.remaining_preview).
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct NextBatchArgs {
    /// Override scheduling.batch_size.
    #[arg(long, value_name = "N")]
    size: Option<usize>,
    /// Date to plan for (YYYY-MM-DD, defaults to today in UTC).
    #[arg(long, value_parser = parse_date)]
    today: Option<NaiveDate>,
}

// ──────────────────── bugs ────────────────────

#[derive(Debug, Clone, Args)]
struct BugsArgs {
    #[command(subcommand)]
    command: Option<BugsCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum BugsCommand {
    /// List known bugs.
    List(BugsListArgs),
    /// Show the bug for one test code.
    Show(CodeArg),
    /// Codes with an open bug seen within the recency window.
    Recent(BugsRecentArgs),
    /// Codes with an open bug in one category.
    Category(BugsCategoryArgs),
    /// Record a bug occurrence by hand.
    Add(BugsAddArgs),
    /// Close the open bug of a test code.
    Close(CodeArg),
}

#[derive(Debug, Clone, Args)]
struct BugsListArgs {
    /// Only open or only closed bugs.
    #[arg(long, value_parser = parse_bug_status)]
    status: Option<BugStatus>,
}

#[derive(Debug, Clone, Args)]
struct BugsRecentArgs {
    /// Override scheduling.recent_window_days.
    #[arg(long, value_name = "DAYS")]
    days: Option<u32>,
    #[arg(long, value_parser = parse_date)]
    today: Option<NaiveDate>,
}

#[derive(Debug, Clone, Args)]
struct BugsCategoryArgs {
    #[arg(value_parser = parse_category)]
    category: Category,
}

#[derive(Debug, Clone, Args)]
struct BugsAddArgs {
    #[arg(value_parser = parse_code)]
    code: TestCode,
    description: String,
    #[arg(long, value_parser = parse_severity)]
    severity: Option<BugSeverity>,
    #[arg(long, value_name = "REF")]
    external_ref: Option<String>,
    #[arg(long, value_parser = parse_date)]
    today: Option<NaiveDate>,
}

// ──────────────────── stats / settings / misc ────────────────────

#[derive(Debug, Clone, Args)]
struct StatsArgs {
    /// Summary of one session instead of global totals.
    #[arg(long, value_name = "SESSION_ID", conflicts_with_all = ["by_category", "export"])]
    session: Option<String>,
    /// Per-category breakdown.
    #[arg(long)]
    by_category: bool,
    /// Full JSON export (global totals plus per-category breakdown).
    #[arg(long)]
    export: bool,
}

#[derive(Debug, Clone, Args)]
struct SettingsArgs {
    #[command(subcommand)]
    command: Option<SettingsCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum SettingsCommand {
    /// List every setting.
    List,
    /// Print one setting.
    Get(SettingKeyArg),
    /// Update one setting.
    Set(SettingSetArgs),
}

#[derive(Debug, Clone, Args)]
struct SettingKeyArg {
    key: String,
}

#[derive(Debug, Clone, Args)]
struct SettingSetArgs {
    key: String,
    value: String,
}

#[derive(Debug, Clone, Args)]
struct StopArgs {
    /// Remove the stop file instead of creating it.
    #[arg(long)]
    clear: bool,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<QatError> for CliError {
    fn from(error: QatError) -> Self {
        match error {
            QatError::Persistence { .. } | QatError::Io { .. } | QatError::Runtime { .. } => {
                Self::Runtime(error.to_string())
            }
            QatError::Serialization { .. } => Self::Internal(error.to_string()),
            _ => Self::User(error.to_string()),
        }
    }
}

/// Everything a store-backed command needs.
struct Context {
    config: Config,
    store: Store,
    log: ActivityLog,
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Init(args) => run_init(cli, args),
        Command::Catalog(args) => run_catalog(cli, args),
        Command::Session(args) => run_session(cli, args),
        Command::Record(args) => run_record(cli, args),
        Command::Classify(args) => run_classify(cli, args),
        Command::Tracker(args) => run_tracker(cli, args),
        Command::NextBatch(args) => run_next_batch(cli, args),
        Command::Bugs(args) => run_bugs(cli, args),
        Command::Stats(args) => run_stats(cli, args),
        Command::Settings(args) => run_settings(cli, args),
        Command::Stop(args) => run_stop(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let config = Config::load(cli.config.as_deref())?;
    if cli.verbose {
        eprintln!("[QAT-CONFIG] using {}", config.paths.config_file.display());
    }
    Ok(config)
}

fn open_context(cli: &Cli) -> Result<Context, CliError> {
    let config = load_config(cli)?;
    let store = Store::open(&config.paths.database)?;
    if cli.verbose {
        eprintln!("[QAT-SQLITE] database {}", config.paths.database.display());
    }
    let log = ActivityLog::open(&config.paths.activity_log, &config.logging);
    Ok(Context { config, store, log })
}

fn run_init(cli: &Cli, args: &InitArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = Store::open(&config.paths.database)?;
    let settings = store.settings()?;
    let wal = store.is_wal_mode();
    store.close()?;

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config_written = false;
    if args.write_config && !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CliError::Runtime(format!("create config dir: {e}")))?;
        }
        let toml_str = toml::to_string_pretty(&Config::default())
            .map_err(|e| CliError::Runtime(format!("serialize default config: {e}")))?;
        fs::write(&config_path, toml_str)
            .map_err(|e| CliError::Runtime(format!("write config: {e}")))?;
        config_written = true;
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!("Database ready: {}", config.paths.database.display());
                println!("  Journal mode: {}", if wal { "wal" } else { "other" });
                println!("  Settings: {}", settings.len());
                if config_written {
                    println!("  Wrote config: {}", config_path.display());
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "init",
                "database": config.paths.database.to_string_lossy(),
                "wal": wal,
                "settings": settings.len(),
                "config_written": config_written,
                "config_path": config_path.to_string_lossy(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_catalog(cli: &Cli, args: &CatalogArgs) -> Result<(), CliError> {
    let ctx = open_context(cli)?;
    let catalog = TestCatalog::new(&ctx.store);

    match &args.command {
        CatalogCommand::Add(add) => {
            let mut case = TestCase::new(add.code.clone(), add.name.clone());
            case.priority = add.priority;
            case.description.clone_from(&add.description);
            case.preconditions.clone_from(&add.preconditions);
            case.steps.clone_from(&add.steps);
            case.expected_result.clone_from(&add.expected);
            case.external_ref.clone_from(&add.external_ref);
            catalog.add(&case)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("Added {} ({}, {})", case.code, case.category.label(), case.priority);
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "catalog add",
                        "test_case": serde_json::to_value(&case)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        CatalogCommand::Get(arg) => {
            let case = catalog.require(&arg.code)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{} {}", case.code.as_str().bold(), case.name);
                    println!("  Category: {}", case.category.label());
                    println!("  Priority: {}", case.priority);
                    if !case.description.is_empty() {
                        println!("  Description: {}", case.description);
                    }
                    if !case.preconditions.is_empty() {
                        println!("  Preconditions: {}", case.preconditions);
                    }
                    if !case.steps.is_empty() {
                        println!("  Steps:");
                        for (index, step) in case.steps.iter().enumerate() {
                            println!("    {}. {step}", index + 1);
                        }
                    }
                    if !case.expected_result.is_empty() {
                        println!("  Expected: {}", case.expected_result);
                    }
                    if let Some(reference) = &case.external_ref {
                        println!("  External ref: {reference}");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "catalog get",
                        "test_case": serde_json::to_value(&case)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        CatalogCommand::List(list) => {
            let cases = match list.category {
                Some(category) => catalog.list_by_category(category)?,
                None => catalog.list_all()?,
            };
            match output_mode(cli) {
                OutputMode::Human => {
                    if cases.is_empty() {
                        println!("No test cases.");
                    } else {
                        println!("Test cases ({}):\n", cases.len());
                        for case in &cases {
                            println!(
                                "  {:<16} {} {:<14} {}",
                                case.code.as_str(),
                                case.priority,
                                case.category.label(),
                                case.name,
                            );
                        }
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "catalog list",
                        "category": list.category.map(Category::as_str),
                        "count": cases.len(),
                        "test_cases": serde_json::to_value(&cases)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        CatalogCommand::Import(import) => {
            let raw = fs::read_to_string(&import.path)
                .map_err(|e| CliError::User(format!("read {}: {e}", import.path.display())))?;
            let tasks = parse_task_export(&raw)?;
            let parser = TaskParser::new()?;
            let summary = catalog.import(&tasks, &parser)?;
            ctx.log.record(
                &LogEntry::new(EventType::CatalogImported, Severity::Info)
                    .count(summary.added.len() as u64)
                    .details(format!(
                        "skipped={} rejected={}",
                        summary.skipped.len(),
                        summary.rejected.len()
                    )),
            );

            match output_mode(cli) {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!(
                            "Imported {} task(s): {} added, {} skipped, {} rejected",
                            tasks.len(),
                            summary.added.len(),
                            summary.skipped.len(),
                            summary.rejected.len(),
                        );
                        for (title, reason) in &summary.rejected {
                            println!("  {} {title}: {reason}", "✗".red());
                        }
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "catalog import",
                        "tasks": tasks.len(),
                        "summary": serde_json::to_value(&summary)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            if !summary.rejected.is_empty() {
                return Err(CliError::Partial(format!(
                    "{} task(s) rejected during import",
                    summary.rejected.len()
                )));
            }
        }
    }
    Ok(())
}

fn run_session(cli: &Cli, args: &SessionArgs) -> Result<(), CliError> {
    let ctx = open_context(cli)?;
    let ledger = SessionLedger::new(&ctx.store);

    match &args.command {
        SessionCommand::Start(start) => {
            let session = ledger.start(Utc::now(), start.mode.as_deref())?;
            ctx.log.record(
                &LogEntry::new(EventType::SessionStarted, Severity::Info)
                    .session(&session.session_id),
            );
            match output_mode(cli) {
                OutputMode::Human => println!("{}", session.session_id),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "session start",
                        "session": serde_json::to_value(&session)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        SessionCommand::End(end) => {
            let session = ledger.complete(&end.session_id, Utc::now(), end.notes.as_deref())?;
            ctx.log.record(
                &LogEntry::new(EventType::SessionCompleted, Severity::Info)
                    .session(&session.session_id)
                    .count(session.counters.total),
            );
            match output_mode(cli) {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("Completed {}", session.session_id);
                        print_counters(&session.counters);
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "session end",
                        "session": serde_json::to_value(&session)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        SessionCommand::Show(show) => {
            let summary = StatsEngine::new(&ctx.store).session_summary(&show.session_id)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let session = &summary.session;
                    println!("{} ({})", session.session_id.bold(), session.status);
                    println!("  Started: {}", session.started_at);
                    if let Some(finished) = &session.finished_at {
                        println!("  Finished: {finished}");
                    }
                    print_counters(&session.counters);
                    println!("  Pass rate: {}", format_rate(summary.pass_rate));
                    if !summary.results.is_empty() {
                        println!("\nResults:");
                        for result in &summary.results {
                            let detail = result
                                .error_message
                                .as_deref()
                                .or(result.notes.as_deref())
                                .unwrap_or("");
                            println!(
                                "  {} {:<16} {:>7}ms  {}",
                                status_icon(result.status),
                                result.code,
                                result.duration_ms,
                                detail,
                            );
                        }
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "session show",
                        "summary": serde_json::to_value(&summary)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        SessionCommand::List(list) => {
            let sessions = ledger.list(list.limit)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    if sessions.is_empty() {
                        println!("No sessions.");
                    }
                    for session in &sessions {
                        println!(
                            "  {:<20} {:<9} total={} passed={} failed={} blocked={} skipped={}",
                            session.session_id,
                            session.status.as_str(),
                            session.counters.total,
                            session.counters.passed,
                            session.counters.failed,
                            session.counters.blocked,
                            session.counters.skipped,
                        );
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "session list",
                        "sessions": serde_json::to_value(&sessions)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
    }
    Ok(())
}

fn run_record(cli: &Cli, args: &RecordArgs) -> Result<(), CliError> {
    let ctx = open_context(cli)?;
    let now = Utc::now();
    let finished_at = args.finished_at.unwrap_or(now);
    let started_at = args.started_at.unwrap_or(finished_at);

    let (status, error_message, notes, needs_screenshot) = match (args.status, &args.outcome) {
        (Some(status), _) => (status, args.error.clone(), args.notes.clone(), false),
        (None, outcome) => {
            let classification = classify(&RawOutcome {
                text: outcome.as_deref(),
                screenshot_path: args.screenshot.as_deref(),
                console_errors: &args.console_errors,
            });
            let passed = classification.status == TestStatus::Passed;
            let error = args
                .error
                .clone()
                .or_else(|| (!passed).then(|| classification.reason.clone()));
            let notes = args
                .notes
                .clone()
                .or_else(|| passed.then(|| classification.reason.clone()));
            (classification.status, error, notes, classification.needs_screenshot)
        }
    };

    let recorder = ResultRecorder::new(&ctx.store, &ctx.config.recording).with_log(ctx.log.clone());
    let receipt = recorder.record(&RecordRequest {
        session_id: args.session.clone(),
        code: args.code.clone(),
        status,
        started_at,
        finished_at,
        error_message,
        screenshot_path: args.screenshot.clone(),
        notes,
    })?;

    let mut marked = None;
    if let Some(identifier) = &args.mark {
        let mut tracker = SessionTracker::open(&ctx.config.paths.state_file)?;
        let newly = tracker.mark_completed(identifier)?;
        ctx.log.record(
            &LogEntry::new(EventType::TrackerCompleted, Severity::Info).identifier(identifier),
        );
        marked = Some(newly);
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!(
                    "{} {} recorded in {} ({}ms)",
                    status_icon(receipt.status),
                    receipt.code,
                    receipt.session_id,
                    receipt.duration_ms,
                );
                if receipt.created_test_case {
                    println!("  Created placeholder test case {}", receipt.code);
                }
                match receipt.bug_update {
                    Some(BugUpdate::Opened) => println!("  {} opened known bug", "!".yellow()),
                    Some(BugUpdate::Seen) => println!("  {} known bug seen again", "!".yellow()),
                    Some(BugUpdate::AlreadySeenToday) => {
                        println!("  known bug already reported today");
                    }
                    Some(BugUpdate::Stale) => {
                        println!("  known bug already reported on a later day");
                    }
                    None => {}
                }
                if needs_screenshot {
                    println!("  {} no screenshot captured", "!".yellow());
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "record",
                "receipt": serde_json::to_value(&receipt)?,
                "needs_screenshot": needs_screenshot,
                "marked": marked,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_classify(cli: &Cli, args: &ClassifyArgs) -> Result<(), CliError> {
    let classification = classify(&RawOutcome {
        text: args.text.as_deref(),
        screenshot_path: args.screenshot.as_deref(),
        console_errors: &args.console_errors,
    });

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} {}: {}",
                status_icon(classification.status),
                classification.status,
                classification.reason,
            );
            if classification.needs_screenshot {
                println!("  screenshot needed");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "classify",
                "classification": serde_json::to_value(&classification)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_tracker(cli: &Cli, args: &TrackerArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let log = ActivityLog::open(&config.paths.activity_log, &config.logging);
    let mut tracker = SessionTracker::open(&config.paths.state_file)?;

    match &args.command {
        None | Some(TrackerCommand::Status) => {}
        Some(TrackerCommand::Start(start)) => {
            let queue = load_queue(&start.queue)?;
            let total = queue.len() as u64;
            tracker.start(queue, start.category.clone(), Utc::now())?;
            log.record(
                &LogEntry::new(EventType::TrackerStarted, Severity::Info)
                    .count(total)
                    .details(tracker.state().sweep_id.clone().unwrap_or_default()),
            );
        }
        Some(TrackerCommand::Complete(arg)) => {
            let newly = tracker.mark_completed(&arg.identifier)?;
            if newly {
                log.record(
                    &LogEntry::new(EventType::TrackerCompleted, Severity::Info)
                        .identifier(&arg.identifier),
                );
            }
        }
        Some(TrackerCommand::Remaining(remaining)) => {
            let limit = remaining.limit.unwrap_or(config.scheduling.remaining_preview);
            let entries = tracker.remaining();
            let total = entries.len();
            let shown: Vec<_> = entries.into_iter().take(limit).collect();
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Remaining: {total}");
                    for candidate in &shown {
                        println!(
                            "  {:<20} {:<16} {}",
                            candidate.identifier,
                            candidate.code,
                            candidate.name.as_deref().unwrap_or(""),
                        );
                    }
                    if total > shown.len() {
                        println!("  ... and {} more", total - shown.len());
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "tracker remaining",
                        "remaining_count": total,
                        "remaining": serde_json::to_value(&shown)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            return Ok(());
        }
        Some(TrackerCommand::Finish) => {
            tracker.finish()?;
            log.record(&LogEntry::new(EventType::TrackerFinished, Severity::Info));
        }
        Some(TrackerCommand::Reset) => {
            tracker.reset()?;
            log.record(&LogEntry::new(EventType::TrackerReset, Severity::Info));
        }
    }

    let report = tracker.status();
    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!("Tracker: {}", tracker_status_label(report.status));
                if let Some(sweep_id) = &report.sweep_id {
                    println!("  Sweep: {sweep_id}");
                }
                if let Some(category) = &report.category {
                    println!("  Category: {category}");
                }
                println!(
                    "  Progress: {}/{} ({} remaining)",
                    report.completed_count, report.total_tests, report.remaining_count,
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": tracker_command_label(args),
                "tracker": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn tracker_command_label(args: &TrackerArgs) -> &'static str {
    match args.command {
        None | Some(TrackerCommand::Status) => "tracker status",
        Some(TrackerCommand::Start(_)) => "tracker start",
        Some(TrackerCommand::Complete(_)) => "tracker complete",
        Some(TrackerCommand::Remaining(_)) => "tracker remaining",
        Some(TrackerCommand::Finish) => "tracker finish",
        Some(TrackerCommand::Reset) => "tracker reset",
    }
}

fn run_next_batch(cli: &Cli, args: &NextBatchArgs) -> Result<(), CliError> {
    let ctx = open_context(cli)?;
    let mut tracker = SessionTracker::open(&ctx.config.paths.state_file)?;
    if tracker.state().status != TrackerStatus::Running {
        return Err(CliError::User(format!(
            "tracker is {}; start a sweep first",
            tracker.state().status
        )));
    }

    if tracker.is_exhausted() {
        tracker.finish()?;
        ctx.log.record(&LogEntry::new(EventType::TrackerFinished, Severity::Info));
        match output_mode(cli) {
            OutputMode::Human => println!("Sweep finished: every queued test is completed."),
            OutputMode::Json => {
                let payload = json!({
                    "command": "next-batch",
                    "finished": true,
                    "batch": [],
                    "deferred": 0,
                });
                write_json_line(&payload)?;
            }
        }
        return Ok(());
    }

    let today = args.today.unwrap_or_else(|| Utc::now().date_naive());
    let batch_size = args.size.unwrap_or(ctx.config.scheduling.batch_size);
    let bugs = KnownBugRegistry::new(&ctx.store).snapshot()?;
    let plan = plan_batch(tracker.remaining(), &bugs, today, batch_size);
    ctx.log.record(
        &LogEntry::new(EventType::BatchPlanned, Severity::Info)
            .count(plan.batch.len() as u64)
            .details(format!(
                "deferred={} retest={} eligible={}",
                plan.deferred.len(),
                plan.retest_count(),
                plan.eligible_total
            )),
    );

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Next batch: {} of {} eligible ({} deferred, {} retest)",
                plan.batch.len(),
                plan.eligible_total,
                plan.deferred.len(),
                plan.retest_count(),
            );
            for test in &plan.batch {
                let marker = if test.retest { " (retest)".yellow() } else { "".normal() };
                println!(
                    "  {:<20} {}{marker}",
                    test.candidate.identifier, test.candidate.code
                );
            }
            if cli.verbose {
                for deferred in &plan.deferred {
                    println!(
                        "  deferred {:<20} {} (bug seen {})",
                        deferred.candidate.identifier, deferred.candidate.code, deferred.last_seen,
                    );
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "next-batch",
                "finished": false,
                "today": today.format("%Y-%m-%d").to_string(),
                "batch": plan.identifiers(),
                "deferred": plan.deferred.len(),
                "eligible_total": plan.eligible_total,
                "plan": serde_json::to_value(&plan)?,
                // Passed through untouched for the automation driver.
                "driver_settings": serde_json::to_value(ctx.store.app_settings()?)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_bugs(cli: &Cli, args: &BugsArgs) -> Result<(), CliError> {
    let ctx = open_context(cli)?;
    let registry = KnownBugRegistry::new(&ctx.store);

    match &args.command {
        None => print_bug_list(cli, &registry, None)?,
        Some(BugsCommand::List(list)) => print_bug_list(cli, &registry, list.status)?,
        Some(BugsCommand::Show(arg)) => {
            let bug = registry.lookup(&arg.code)?.ok_or_else(|| {
                CliError::from(QatError::UnknownBug {
                    code: arg.code.clone(),
                })
            })?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{} [{}] {}", bug.test_case_code.bold(), bug.status, bug.severity);
                    println!("  {}", bug.description);
                    println!(
                        "  Seen {} time(s), first {}, last {}",
                        bug.occurrences, bug.first_seen, bug.last_seen
                    );
                    if let Some(resolved) = &bug.resolved_at {
                        println!("  Resolved: {resolved}");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "bugs show",
                        "bug": serde_json::to_value(&bug)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        Some(BugsCommand::Recent(recent)) => {
            let today = recent.today.unwrap_or_else(|| Utc::now().date_naive());
            let days = recent.days.unwrap_or(ctx.config.scheduling.recent_window_days);
            let codes = registry.list_recent(today, days)?;
            print_code_set(cli, "bugs recent", &codes)?;
        }
        Some(BugsCommand::Category(arg)) => {
            let codes = registry.list_by_category(arg.category)?;
            print_code_set(cli, "bugs category", &codes)?;
        }
        Some(BugsCommand::Add(add)) => {
            let today = add.today.unwrap_or_else(|| Utc::now().date_naive());
            let report = BugReport {
                category: Some(add.code.category()),
                description: qa_tracker::tracker::recorder::truncate_chars(
                    &add.description,
                    ctx.config.recording.bug_description_limit,
                ),
                severity: add.severity.unwrap_or(ctx.config.recording.default_severity),
                external_ref: add.external_ref.clone(),
            };
            let update = registry.record_occurrence(&add.code, &report, today)?;
            if matches!(update, BugUpdate::Opened | BugUpdate::Seen) {
                let event = if update == BugUpdate::Opened {
                    EventType::BugOpened
                } else {
                    EventType::BugSeen
                };
                ctx.log
                    .record(&LogEntry::new(event, Severity::Warning).code(add.code.as_str()));
            }
            match output_mode(cli) {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("{}: {}", add.code, bug_update_label(update));
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "bugs add",
                        "code": add.code.as_str(),
                        "update": serde_json::to_value(update)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
        Some(BugsCommand::Close(arg)) => {
            let bug = registry.close(&arg.code, Utc::now())?;
            ctx.log.record(
                &LogEntry::new(EventType::BugClosed, Severity::Info).code(&bug.test_case_code),
            );
            match output_mode(cli) {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("Closed bug for {}", bug.test_case_code);
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "bugs close",
                        "bug": serde_json::to_value(&bug)?,
                    });
                    write_json_line(&payload)?;
                }
            }
        }
    }
    Ok(())
}

fn print_bug_list(
    cli: &Cli,
    registry: &KnownBugRegistry<'_>,
    status: Option<BugStatus>,
) -> Result<(), CliError> {
    let bugs = registry.list(status)?;
    match output_mode(cli) {
        OutputMode::Human => {
            if bugs.is_empty() {
                println!("No known bugs.");
            } else {
                println!("Known bugs ({}):\n", bugs.len());
                for bug in &bugs {
                    let status = match bug.status {
                        BugStatus::Open => "open".red(),
                        BugStatus::Closed => "closed".dimmed(),
                    };
                    println!(
                        "  {:<16} {:<6} {:<8} last {} x{}  {}",
                        bug.test_case_code,
                        status,
                        bug.severity.as_str(),
                        bug.last_seen,
                        bug.occurrences,
                        bug.description,
                    );
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "bugs list",
                "status": status.map(BugStatus::as_str),
                "bugs": serde_json::to_value(&bugs)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_code_set(
    cli: &Cli,
    command: &str,
    codes: &std::collections::BTreeSet<String>,
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if codes.is_empty() {
                println!("No matching bugs.");
            }
            for code in codes {
                println!("  {code}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "codes": codes,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_stats(cli: &Cli, args: &StatsArgs) -> Result<(), CliError> {
    let ctx = open_context(cli)?;
    let engine = StatsEngine::new(&ctx.store);

    if args.export {
        let export = engine.export_json()?;
        match output_mode(cli) {
            OutputMode::Human => println!("{}", serde_json::to_string_pretty(&export)?),
            OutputMode::Json => write_json_line(&json!({
                "command": "stats export",
                "export": export,
            }))?,
        }
        return Ok(());
    }

    if let Some(session_id) = &args.session {
        let summary = engine.session_summary(session_id)?;
        match output_mode(cli) {
            OutputMode::Human => {
                println!("{} ({})", summary.session.session_id.bold(), summary.session.status);
                print_counters(&summary.session.counters);
                println!("  Pass rate: {}", format_rate(summary.pass_rate));
            }
            OutputMode::Json => write_json_line(&json!({
                "command": "stats session",
                "summary": serde_json::to_value(&summary)?,
            }))?,
        }
        return Ok(());
    }

    if args.by_category {
        let breakdown = engine.category_breakdown()?;
        match output_mode(cli) {
            OutputMode::Human => {
                if breakdown.is_empty() {
                    println!("No results yet.");
                }
                for stat in &breakdown {
                    println!(
                        "  {:<14} total={:<4} passed={:<4} failed={:<4} blocked={:<4} pass rate {}",
                        stat.category.label(),
                        stat.counters.total,
                        stat.counters.passed,
                        stat.counters.failed,
                        stat.counters.blocked,
                        format_rate(stat.counters.pass_rate()),
                    );
                }
            }
            OutputMode::Json => write_json_line(&json!({
                "command": "stats categories",
                "categories": serde_json::to_value(&breakdown)?,
            }))?,
        }
        return Ok(());
    }

    let stats = engine.global_stats()?;
    match output_mode(cli) {
        OutputMode::Human => {
            println!("Test cases: {}", stats.test_case_count);
            println!("Sessions:   {}", stats.session_count);
            println!("Results:    {}", stats.total_results);
            for (status, count) in &stats.results_by_status {
                println!("  {} {:<8} {count}", status_icon(*status), status.as_str());
            }
            println!("Pass rate:  {}", format_rate(stats.pass_rate));
            println!("Open bugs:  {}", stats.open_bug_count);
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "stats",
            "stats": serde_json::to_value(&stats)?,
        }))?,
    }
    Ok(())
}

fn run_settings(cli: &Cli, args: &SettingsArgs) -> Result<(), CliError> {
    let ctx = open_context(cli)?;

    match &args.command {
        None | Some(SettingsCommand::List) => {
            let settings = ctx.store.settings()?;
            match output_mode(cli) {
                OutputMode::Human => {
                    for row in &settings {
                        println!(
                            "  {:<24} {:<32} {}",
                            row.key,
                            row.value,
                            row.description.as_deref().unwrap_or("").dimmed(),
                        );
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "settings list",
                    "settings": serde_json::to_value(&settings)?,
                }))?,
            }
        }
        Some(SettingsCommand::Get(arg)) => {
            let value = ctx
                .store
                .setting(&arg.key)?
                .ok_or_else(|| CliError::User(format!("unknown setting: {}", arg.key)))?;
            match output_mode(cli) {
                OutputMode::Human => println!("{value}"),
                OutputMode::Json => write_json_line(&json!({
                    "command": "settings get",
                    "key": arg.key,
                    "value": value,
                }))?,
            }
        }
        Some(SettingsCommand::Set(set)) => {
            ctx.store.set_setting(&set.key, &set.value)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("{} = {}", set.key, set.value);
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "settings set",
                    "key": set.key,
                    "value": set.value,
                }))?,
            }
        }
    }
    Ok(())
}

fn run_stop(cli: &Cli, args: &StopArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let stop = StopSignal::new(&config.paths.stop_signal);

    let changed = if args.clear {
        stop.clear()?
    } else {
        stop.create()?;
        ActivityLog::open(&config.paths.activity_log, &config.logging).record(
            &LogEntry::new(EventType::StopRequested, Severity::Info).details("stop file"),
        );
        true
    };

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                match (args.clear, changed) {
                    (false, _) => println!("Stop requested: {}", stop.path().display()),
                    (true, true) => println!("Stop file removed: {}", stop.path().display()),
                    (true, false) => println!("No stop file at {}", stop.path().display()),
                }
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "stop",
            "action": if args.clear { "clear" } else { "create" },
            "path": stop.path().to_string_lossy(),
            "changed": changed,
        }))?,
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;
            let hash = config.stable_hash()?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("# hash: {hash}");
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "hash": hash,
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

// ──────────────────── formatting ────────────────────

fn status_icon(status: TestStatus) -> ColoredString {
    match status {
        TestStatus::Passed => "✓".green(),
        TestStatus::Failed => "✗".red(),
        TestStatus::Blocked => "!".yellow(),
        TestStatus::Skipped => "-".dimmed(),
    }
}

fn tracker_status_label(status: TrackerStatus) -> ColoredString {
    match status {
        TrackerStatus::Idle => status.as_str().dimmed(),
        TrackerStatus::Running => status.as_str().green(),
        TrackerStatus::Finished => status.as_str().blue(),
    }
}

fn bug_update_label(update: BugUpdate) -> &'static str {
    match update {
        BugUpdate::Opened => "opened new known bug",
        BugUpdate::Seen => "known bug seen again",
        BugUpdate::AlreadySeenToday => "already reported today",
        BugUpdate::Stale => "already reported on a later day",
    }
}

fn print_counters(counters: &qa_tracker::store::sessions::SessionCounters) {
    println!(
        "  {} passed  {} failed  {} blocked  {} skipped  ({} total)",
        counters.passed.to_string().green(),
        counters.failed.to_string().red(),
        counters.blocked.to_string().yellow(),
        counters.skipped,
        counters.total,
    );
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| "n/a".to_string(), |r| format!("{:.1}%", r * 100.0))
}

// ──────────────────── value parsers ────────────────────

fn parse_code(raw: &str) -> Result<TestCode, String> {
    TestCode::parse(raw).map_err(|e| e.to_string())
}

fn parse_priority(raw: &str) -> Result<Priority, String> {
    Priority::parse(raw).ok_or_else(|| format!("invalid priority: {raw} (expected P0..P3)"))
}

fn parse_category(raw: &str) -> Result<Category, String> {
    Category::parse(raw).ok_or_else(|| format!("unknown category: {raw}"))
}

fn parse_status(raw: &str) -> Result<TestStatus, String> {
    TestStatus::parse(raw)
        .ok_or_else(|| format!("invalid status: {raw} (expected passed, failed, blocked or skipped)"))
}

fn parse_severity(raw: &str) -> Result<BugSeverity, String> {
    BugSeverity::parse(raw)
        .ok_or_else(|| format!("invalid severity: {raw} (expected low, medium, high or critical)"))
}

fn parse_bug_status(raw: &str) -> Result<BugStatus, String> {
    BugStatus::parse(raw).ok_or_else(|| format!("invalid bug status: {raw} (expected open or closed)"))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC3339 timestamp {raw:?}: {e}"))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date {raw:?} (expected YYYY-MM-DD): {e}"))
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("QAT_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "qat",
            "--config",
            "/tmp/qat.toml",
            "--json",
            "--no-color",
            "-v",
            "stats",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["qat", "stats", "--json", "--no-color", "-v"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["qat", "init", "--write-config"],
            vec!["qat", "catalog", "add", "TC-LOGIN-001", "Login", "--priority", "P1"],
            vec!["qat", "catalog", "add", "TC-UI-002", "Menu", "--step", "open", "--step", "click"],
            vec!["qat", "catalog", "get", "TC-LOGIN-001"],
            vec!["qat", "catalog", "list", "--category", "login"],
            vec!["qat", "catalog", "import", "tasks.json"],
            vec!["qat", "session", "start", "--mode", "smoke"],
            vec!["qat", "session", "end", "run-1", "--notes", "done"],
            vec!["qat", "session", "show", "run-1"],
            vec!["qat", "session", "list", "--limit", "5"],
            vec![
                "qat", "record", "--session", "run-1", "--code", "TC-LOGIN-001", "--status",
                "failed", "--error", "boom",
            ],
            vec![
                "qat", "record", "--session", "run-1", "--code", "TC-LOGIN-001", "--outcome",
                "PASS", "--mark", "gid-1",
            ],
            vec!["qat", "classify", "FAIL: x", "--console-error", "TypeError"],
            vec!["qat", "tracker"],
            vec!["qat", "tracker", "start", "--queue", "q.json", "--category", "Login"],
            vec!["qat", "tracker", "complete", "gid-1"],
            vec!["qat", "tracker", "remaining", "--limit", "3"],
            vec!["qat", "tracker", "finish"],
            vec!["qat", "tracker", "reset"],
            vec!["qat", "next-batch", "--size", "5", "--today", "2026-02-04"],
            vec!["qat", "bugs", "list", "--status", "open"],
            vec!["qat", "bugs", "show", "TC-LOGIN-001"],
            vec!["qat", "bugs", "recent", "--days", "7"],
            vec!["qat", "bugs", "category", "projects"],
            vec!["qat", "bugs", "add", "TC-PROJ-004", "broken", "--severity", "high"],
            vec!["qat", "bugs", "close", "TC-PROJ-004"],
            vec!["qat", "stats", "--by-category"],
            vec!["qat", "stats", "--session", "run-1"],
            vec!["qat", "stats", "--export"],
            vec!["qat", "settings", "set", "timeout_ms", "1000"],
            vec!["qat", "stop", "--clear"],
            vec!["qat", "config", "show"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn record_requires_status_or_outcome() {
        let base = ["qat", "record", "--session", "run-1", "--code", "TC-UI-001"];
        assert!(Cli::try_parse_from(base).is_err());
        let both = [
            "qat", "record", "--session", "run-1", "--code", "TC-UI-001", "--status", "passed",
            "--outcome", "PASS",
        ];
        assert!(Cli::try_parse_from(both).is_err());
    }

    #[test]
    fn value_parsers_reject_bad_input() {
        assert!(Cli::try_parse_from(["qat", "catalog", "add", "LOGIN-1", "x"]).is_err());
        assert!(Cli::try_parse_from(["qat", "catalog", "add", "TC-UI-001", "x", "--priority", "P7"]).is_err());
        assert!(Cli::try_parse_from(["qat", "next-batch", "--today", "04.02.2026"]).is_err());
        assert!(Cli::try_parse_from(["qat", "bugs", "category", "nonsense"]).is_err());
        assert!(
            Cli::try_parse_from([
                "qat", "record", "--session", "s", "--code", "c", "--status", "maybe"
            ])
            .is_err()
        );
    }

    #[test]
    fn stats_session_conflicts_with_breakdowns() {
        assert!(Cli::try_parse_from(["qat", "stats", "--session", "run-1", "--export"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["qat", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn domain_errors_map_to_exit_codes() {
        let user: CliError = QatError::UnknownSession {
            session_id: "run-1".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);

        let runtime: CliError = QatError::Runtime {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(runtime.exit_code(), 2);
    }

    #[test]
    fn timestamps_and_dates_parse() {
        let ts = parse_timestamp("2026-02-04T10:00:00+01:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-02-04T09:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
        assert_eq!(
            parse_date("2026-02-04").unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 4).unwrap()
        );
    }

    #[test]
    fn rate_formatting() {
        assert_eq!(format_rate(None), "n/a");
        assert_eq!(format_rate(Some(0.5)), "50.0%");
    }
}
