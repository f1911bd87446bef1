//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use campaign_sentry::core::config::Config;
use campaign_sentry::core::format::format_size;
use campaign_sentry::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
use campaign_sentry::logger::jsonl::JsonlConfig;
use campaign_sentry::session::binding::{BindingOutcome, BindingPolicy, SessionGuard, UaClassifier};
use campaign_sentry::session::fingerprint::{RequestFingerprint, SessionFingerprint};
use campaign_sentry::session::review::{SessionEntry, review_sessions};
use campaign_sentry::session::scoring::{RiskAssessment, RiskLevel, RiskScorer};
use campaign_sentry::session::store::{SessionStore, SqliteSessionStore};
use campaign_sentry::storage::blob::FsBlobStore;
use campaign_sentry::storage::reconciler::Reconciler;
use campaign_sentry::storage::records::SqliteRecordStore;
use campaign_sentry::storage::report::{CleanupOutcome, CleanupReport, DeletionStatus};

/// Campaign Sentry: poster storage reconciliation and session trust checks.
#[derive(Debug, Parser)]
#[command(
    name = "csen",
    author,
    version,
    about = "Campaign Sentry - poster storage reconciler and session trust scorer",
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
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Reconcile uploaded ad posters against campaign records.
    Posters(PostersArgs),
    /// Score, review and check session fingerprints.
    Session(SessionArgs),
    /// View effective configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Copy, Args, Default)]
#[command(group(
    ArgGroup::new("mode")
        .args(["dry_run", "confirm", "report", "integrity_check", "stats"])
        .multiple(false)
))]
struct PostersArgs {
    /// Show which orphaned posters would be deleted.
    #[arg(long)]
    dry_run: bool,
    /// Delete orphaned posters.
    #[arg(long)]
    confirm: bool,
    /// Full storage report with recommendations.
    #[arg(long)]
    report: bool,
    /// Check that every referenced poster exists.
    #[arg(long)]
    integrity_check: bool,
    /// Storage statistics only.
    #[arg(long)]
    stats: bool,
}

#[derive(Debug, Clone, Args)]
struct SessionArgs {
    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum SessionCommand {
    /// Score one stored fingerprint against a request.
    Score(ScoreArgs),
    /// List stored sessions scored against the current request.
    Review(ReviewArgs),
    /// Apply the binding policy to one stored session.
    Check(CheckArgs),
}

#[derive(Debug, Clone, Args)]
struct ScoreArgs {
    #[arg(long, default_value = "")]
    stored_ip: String,
    #[arg(long, default_value = "")]
    stored_ua: String,
    /// Session start, RFC 3339.
    #[arg(long, value_name = "TIMESTAMP")]
    stored_at: DateTime<Utc>,
    #[arg(long, default_value = "")]
    current_ip: String,
    #[arg(long, default_value = "")]
    current_ua: String,
    /// Evaluation time, RFC 3339 (defaults to now).
    #[arg(long, value_name = "TIMESTAMP")]
    now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Args)]
struct ReviewArgs {
    #[arg(long, default_value = "")]
    current_ip: String,
    #[arg(long, default_value = "")]
    current_ua: String,
    /// Evaluation time, RFC 3339 (defaults to now).
    #[arg(long, value_name = "TIMESTAMP")]
    now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Args)]
struct CheckArgs {
    /// Session identifier in the session database.
    session_id: String,
    #[arg(long, default_value = "")]
    ip: String,
    #[arg(long, default_value = "")]
    ua: String,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print effective merged configuration.
    Show,
    /// Print the stable hash of the effective configuration.
    Hash,
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

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Posters(args) => run_posters(cli, *args),
        Command::Session(args) => match &args.command {
            SessionCommand::Score(args) => run_session_score(cli, args),
            SessionCommand::Review(args) => run_session_review(cli, args),
            SessionCommand::Check(args) => run_session_check(cli, args),
        },
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
    Config::load(cli.config.as_deref()).map_err(|e| CliError::User(e.to_string()))
}

// ──────────────────── activity log ────────────────────

/// Logger thread for the lifetime of one command.
struct ActivityLog {
    handle: ActivityLoggerHandle,
    join: JoinHandle<()>,
}

impl ActivityLog {
    /// Logging never blocks a command: on spawn failure we run without it.
    fn start(config: &Config) -> Option<Self> {
        match spawn_logger(JsonlConfig::at(&config.paths.jsonl_log)) {
            Ok((handle, join)) => Some(Self { handle, join }),
            Err(e) => {
                eprintln!("[CSN-LOG] activity log disabled: {e}");
                None
            }
        }
    }

    fn handle(log: Option<&Self>) -> Option<ActivityLoggerHandle> {
        log.map(|l| l.handle.clone())
    }

    fn finish(self) {
        self.handle.shutdown();
        if self.join.join().is_err() {
            eprintln!("[CSN-LOG] logger thread panicked");
        }
    }
}

// ──────────────────── posters ────────────────────

const POSTER_MODES: [(&str, &str); 5] = [
    ("--dry-run", "Preview which orphaned files would be deleted"),
    ("--confirm", "Actually delete orphaned files (DESTRUCTIVE)"),
    ("--report", "Generate a comprehensive storage report"),
    ("--integrity-check", "Check that records point at existing files"),
    ("--stats", "Display storage statistics"),
];

fn run_posters(cli: &Cli, args: PostersArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    if mode == OutputMode::Human {
        println!(
            "{}",
            format!(
                "Campaign Sentry poster storage - {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S")
            )
            .bold()
            .green()
        );
        println!("{}", "=".repeat(70));
    }

    if !(args.dry_run || args.confirm || args.report || args.integrity_check || args.stats) {
        return print_posters_usage(mode);
    }

    let config = load_config(cli)?;
    let hash = config
        .stable_hash()
        .map_err(|e| CliError::Internal(e.to_string()))?;
    let records = SqliteRecordStore::from_config(&config.records)
        .map_err(|e| CliError::User(e.to_string()))?;
    let log = ActivityLog::start(&config);
    let reconciler = Reconciler::new(
        FsBlobStore::new(&config.storage.media_root),
        records,
        &config.storage,
        ActivityLog::handle(log.as_ref()),
    )
    .with_config_hash(hash);

    let result = if args.stats {
        posters_stats(mode, &reconciler)
    } else if args.integrity_check {
        posters_integrity(mode, &reconciler)
    } else if args.report {
        posters_report(mode, &reconciler.build_report())
    } else {
        posters_cleanup(mode, &reconciler, args.dry_run)
    };

    if let Some(log) = log {
        log.finish();
    }
    result
}

fn print_posters_usage(mode: OutputMode) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            println!(
                "\n{}\n",
                "No action specified. Choose one of the following options:".yellow()
            );
            for (flag, description) in POSTER_MODES {
                println!("   {} {description}", format!("{flag:<20}").green());
            }
            println!(
                "\n{}",
                "Tip: start with --dry-run to see what would be cleaned up".cyan()
            );
        }
        OutputMode::Json => {
            let options: Vec<Value> = POSTER_MODES
                .iter()
                .map(|(flag, description)| json!({"flag": flag, "description": description}))
                .collect();
            write_json_line(&json!({
                "command": "posters",
                "action": null,
                "options": options,
            }))?;
        }
    }
    Ok(())
}

type PosterReconciler = Reconciler<FsBlobStore, SqliteRecordStore>;

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("{} {warning}", "warning:".yellow());
    }
}

fn posters_stats(mode: OutputMode, reconciler: &PosterReconciler) -> Result<(), CliError> {
    let stats = reconciler.storage_stats();
    let warnings = reconciler.take_warnings();
    let large = stats.total_size_bytes > reconciler.config().large_usage_warning_bytes;

    match mode {
        OutputMode::Human => {
            println!("\n{}\n", "Storage statistics".cyan());
            println!("Total files:  {}", stats.total_files);
            println!("Total size:   {}", stats.total_size_formatted);
            if stats.total_files > 0 {
                println!("Average size: {}", format_size(stats.average_size_bytes));
                println!("Largest:      {}", format_size(stats.largest_file_bytes));
                println!("Smallest:     {}", format_size(stats.smallest_file_bytes));
            }
            if large {
                println!(
                    "{}",
                    "Large storage usage detected - consider cleanup".yellow()
                );
            } else {
                println!("{}", "Storage usage within reasonable limits".green());
            }
            print_warnings(&warnings);
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "posters stats",
                "stats": stats,
                "large_usage": large,
                "warnings": warnings,
            }))?;
        }
    }
    Ok(())
}

fn posters_integrity(mode: OutputMode, reconciler: &PosterReconciler) -> Result<(), CliError> {
    let check = reconciler.validate_integrity();
    let warnings = reconciler.take_warnings();

    match mode {
        OutputMode::Human => {
            println!("\n{}\n", "Checking record file integrity".cyan());
            if check.is_clean() {
                println!(
                    "{}",
                    "All record references point to existing files".green()
                );
            } else {
                println!(
                    "{}",
                    format!("Found {} missing files:", check.missing.len()).red()
                );
                for file in &check.missing {
                    println!("   • {file}");
                }
                println!(
                    "\n{}",
                    "Consider updating records with missing files or restoring the files"
                        .yellow()
                );
            }
            print_warnings(&warnings);
        }
        OutputMode::Json => {
            let errors: Vec<Value> = check
                .mismatches()
                .iter()
                .map(|e| json!({"code": e.code(), "message": e.to_string()}))
                .collect();
            write_json_line(&json!({
                "command": "posters integrity-check",
                "existing_count": check.existing.len(),
                "missing_count": check.missing.len(),
                "missing_files": check.missing,
                "errors": errors,
                "warnings": warnings,
            }))?;
        }
    }
    Ok(())
}

fn posters_report(mode: OutputMode, report: &CleanupReport) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            println!("\n{}", "Storage cleanup report".bold());
            println!("{}", "-".repeat(40));
            println!("Generated:      {}", report.generated_at);
            println!("Total files:    {}", report.storage_stats.total_files);
            println!(
                "Storage used:   {}",
                report.storage_stats.total_size_formatted
            );
            let orphaned = format!("Orphaned files: {}", report.orphaned_files.count);
            println!(
                "{}",
                if report.orphaned_files.count > 0 {
                    orphaned.yellow()
                } else {
                    orphaned.green()
                }
            );
            let missing = format!("Missing files:  {}", report.integrity_check.missing_count);
            println!(
                "{}",
                if report.integrity_check.missing_count > 0 {
                    missing.red()
                } else {
                    missing.green()
                }
            );
            println!("\n{}", "Recommendations:".cyan());
            for recommendation in &report.recommendations {
                println!("   • {recommendation}");
            }
            print_warnings(&report.warnings);
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "posters report",
                "report": report,
            }))?;
        }
    }
    Ok(())
}

fn posters_cleanup(
    mode: OutputMode,
    reconciler: &PosterReconciler,
    dry_run: bool,
) -> Result<(), CliError> {
    let outcome = reconciler.cleanup(dry_run);
    let warnings = reconciler.take_warnings();

    match mode {
        OutputMode::Human => {
            print_cleanup_human(&outcome);
            print_warnings(&warnings);
        }
        OutputMode::Json => {
            let command = if dry_run {
                "posters dry-run"
            } else {
                "posters confirm"
            };
            write_json_line(&json!({
                "command": command,
                "outcome": outcome,
                "deleted_count": outcome.deleted().len(),
                "failed_count": outcome.failed().len(),
                "skipped_count": outcome.skipped().len(),
                "warnings": warnings,
            }))?;
        }
    }

    if outcome.references_unavailable && !outcome.dry_run {
        return Err(CliError::Partial(format!(
            "record store unavailable; {} orphan candidates left in place",
            outcome.results.len()
        )));
    }
    let failed = outcome.failed().len();
    if failed > 0 {
        return Err(CliError::Partial(format!(
            "{failed} of {} orphaned files could not be deleted",
            outcome.results.len()
        )));
    }
    Ok(())
}

fn print_cleanup_human(outcome: &CleanupOutcome) {
    if outcome.dry_run {
        println!("\n{}\n", "DRY RUN - preview mode".cyan());
        if outcome.preview.is_empty() {
            println!("{}", "No orphaned files found. Storage is clean!".green());
            return;
        }
        println!(
            "Found {} orphaned files that would be deleted:",
            outcome.preview.len()
        );
        for file in &outcome.preview {
            println!("   • {file}");
        }
        println!(
            "\n{}",
            format!(
                "Run with --confirm to actually delete these {} files",
                outcome.preview.len()
            )
            .yellow()
        );
        return;
    }

    println!("\n{}\n", "CLEANUP MODE - files will be deleted!".yellow());
    if outcome.references_unavailable {
        println!(
            "{}",
            "Record store unavailable - no files were deleted".red().bold()
        );
    }
    if outcome.results.is_empty() {
        println!("{}", "No orphaned files found. Storage is clean!".green());
        return;
    }

    let deleted = outcome.deleted();
    if !deleted.is_empty() {
        println!(
            "{}",
            format!("Successfully deleted {} files", deleted.len()).green()
        );
    }
    for item in &outcome.results {
        match &item.status {
            DeletionStatus::Skipped { reason } => {
                println!("   {} {} ({reason})", "skipped".yellow(), item.file);
            }
            DeletionStatus::Failed { code, error } => {
                println!("   {} {} [{code}] {error}", "failed".red(), item.file);
            }
            DeletionStatus::Deleted | DeletionStatus::AlreadyGone => {}
        }
    }
    if outcome.failed().is_empty() && !deleted.is_empty() {
        println!("\n{}", "Cleanup completed successfully!".green());
    }
}

// ──────────────────── session ────────────────────

fn level_colored(level: RiskLevel) -> ColoredString {
    match level {
        RiskLevel::High => level.as_str().red().bold(),
        RiskLevel::Medium => level.as_str().yellow(),
        RiskLevel::Low | RiskLevel::VeryLow => level.as_str().normal(),
        RiskLevel::Minimal => level.as_str().green(),
    }
}

fn print_assessment(assessment: &RiskAssessment) {
    println!(
        "Risk score: {} ({})",
        assessment.score,
        level_colored(assessment.level)
    );
    println!(
        "  age +{}  ip +{}  user agent +{}",
        assessment.factors.age, assessment.factors.ip, assessment.factors.user_agent
    );
    println!("  advisory decision: {:?}", assessment.decision);
}

fn run_session_score(cli: &Cli, args: &ScoreArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let scorer = RiskScorer::from_config(&config.trust);
    let stored = SessionFingerprint::new(&args.stored_ip, &args.stored_ua, args.stored_at);
    let current = RequestFingerprint::new(&args.current_ip, &args.current_ua);
    let assessment = scorer.assess(&stored, &current, args.now.unwrap_or_else(Utc::now));

    match output_mode(cli) {
        OutputMode::Human => print_assessment(&assessment),
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "session score",
                "assessment": assessment,
            }))?;
        }
    }
    Ok(())
}

fn open_session_store(config: &Config) -> Result<SqliteSessionStore, CliError> {
    SqliteSessionStore::open(&config.paths.session_db).map_err(|e| CliError::Runtime(e.to_string()))
}

fn run_session_review(cli: &Cli, args: &ReviewArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = open_session_store(&config)?;
    let sessions = store
        .list()
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let current = RequestFingerprint::new(&args.current_ip, &args.current_ua);
    let scorer = RiskScorer::from_config(&config.trust);
    let classifier = UaClassifier::new().map_err(|e| CliError::Internal(e.to_string()))?;
    let entries = review_sessions(
        sessions,
        &current,
        &scorer,
        &classifier,
        args.now.unwrap_or_else(Utc::now),
    );

    if let Some(log) = ActivityLog::start(&config) {
        for entry in &entries {
            log.handle.send(ActivityEvent::SessionScored {
                session: entry.session_id.clone(),
                score: entry.risk_score,
                level: entry.risk_level.to_string(),
            });
        }
        log.finish();
    }

    match output_mode(cli) {
        OutputMode::Human => print_review_human(&entries),
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "session review",
                "count": entries.len(),
                "sessions": entries,
            }))?;
        }
    }
    Ok(())
}

fn print_review_human(entries: &[SessionEntry]) {
    if entries.is_empty() {
        println!("No active sessions.");
        return;
    }
    println!(
        "{:<20} {:<16} {:>5} {:<9} {:<30} {:<16} {}",
        "SESSION", "IP", "RISK", "LEVEL", "DEVICE", "LOCATION", "DURATION"
    );
    for entry in entries {
        let marker = if entry.is_current { " (current)" } else { "" };
        println!(
            "{:<20} {:<16} {:>5} {:<9} {:<30} {:<16} {}{}",
            entry.session_id,
            entry.ip,
            entry.risk_score,
            level_colored(entry.risk_level),
            entry.device.label(),
            entry.location.country,
            entry.duration,
            marker.cyan(),
        );
    }
}

fn run_session_check(cli: &Cli, args: &CheckArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = open_session_store(&config)?;
    let request = RequestFingerprint::new(&args.ip, &args.ua);
    let now = Utc::now();

    // Advisory only; the binding policy alone decides.
    let stored = store
        .get(&args.session_id)
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let assessment = stored
        .as_ref()
        .map(|fp| RiskScorer::from_config(&config.trust).assess(fp, &request, now));

    let policy =
        BindingPolicy::from_config(&config.binding).map_err(|e| CliError::Internal(e.to_string()))?;
    let log = ActivityLog::start(&config);
    let guard = SessionGuard::new(store, policy, ActivityLog::handle(log.as_ref()));
    let outcome = guard.check(&args.session_id, &request, now);
    if let Some(log) = log {
        log.finish();
    }
    let outcome = outcome.map_err(|e| CliError::Runtime(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => {
            match &outcome {
                BindingOutcome::Bound => println!("{} session bound to this client", "BOUND".green()),
                BindingOutcome::Continue => println!("{} session matches its binding", "OK".green()),
                BindingOutcome::Invalidated { violation } => {
                    println!("{} session flushed: {violation}", "INVALIDATED".red().bold());
                }
            }
            if let Some(assessment) = &assessment {
                print_assessment(assessment);
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "session check",
                "session_id": args.session_id,
                "outcome": outcome,
                "assessment": assessment,
            }))?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    match args.command {
        ConfigCommand::Show => match output_mode(cli) {
            OutputMode::Human => {
                let toml_str = toml::to_string_pretty(&config)
                    .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                println!("{toml_str}");
            }
            OutputMode::Json => {
                write_json_line(&json!({
                    "command": "config show",
                    "config": serde_json::to_value(&config)?,
                }))?;
            }
        },
        ConfigCommand::Hash => {
            let hash = config
                .stable_hash()
                .map_err(|e| CliError::Internal(e.to_string()))?;
            match output_mode(cli) {
                OutputMode::Human => println!("{hash}"),
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config hash",
                        "path": config.paths.config_file.to_string_lossy(),
                        "hash": hash,
                    }))?;
                }
            }
        }
    }
    Ok(())
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("CSN_OUTPUT_FORMAT").ok();
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
