//! Top-level CLI definition and dispatch.

use std::collections::BTreeSet;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crisis_harness::analysis::analyzer::{Analysis, ResultAnalyzer};
use crisis_harness::client::http::ClassifierClient;
use crisis_harness::compare::comparison::{
    CategoryVerdict, ComparisonResult, Verdict, compare_snapshots,
};
use crisis_harness::core::config::Config;
use crisis_harness::core::errors::HarnessError;
use crisis_harness::corpus::load_corpus;
use crisis_harness::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};
use crisis_harness::model::case::{RunRecord, RunState};
use crisis_harness::runner::executor::{ProgressObserver, TestRunner};
use crisis_harness::snapshot::store::{CaptureMeta, SnapshotStore};

/// Crisis harness — regression testing for a remote crisis-severity classifier.
#[derive(Debug, Parser)]
#[command(
    name = "crh",
    author,
    version,
    about = "Crisis Harness - classifier regression testing",
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
    /// Execute the corpus against the classifier and capture a snapshot.
    Run(RunArgs),
    /// List, validate, and delete stored snapshots.
    Snapshots(SnapshotsArgs),
    /// Compare two snapshots and emit a release verdict.
    Compare(CompareArgs),
    /// Probe the classifier's health endpoint.
    Health,
    /// View and validate configuration state.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Serialize)]
struct RunArgs {
    /// Corpus file (JSON array of test cases).
    #[arg(value_name = "CORPUS")]
    corpus: PathBuf,
    /// Restrict the run to these categories (repeatable).
    #[arg(long, value_name = "CATEGORY")]
    category: Vec<String>,
    /// Snapshot label for the captured results.
    #[arg(long, default_value = "run", value_name = "LABEL")]
    label: String,
    /// Execute without capturing a snapshot.
    #[arg(long)]
    no_capture: bool,
    /// Classifier version to record in the snapshot.
    #[arg(long, value_name = "VERSION")]
    classifier_version: Option<String>,
    /// Classifier source revision to record in the snapshot.
    #[arg(long, value_name = "COMMIT")]
    commit: Option<String>,
    /// Model configuration note to record in the snapshot.
    #[arg(long, value_name = "TEXT")]
    model_config: Option<String>,
    /// Free-form note to record in the snapshot.
    #[arg(long, value_name = "TEXT")]
    description: Option<String>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct SnapshotsArgs {
    /// Snapshot operation to run.
    #[command(subcommand)]
    command: Option<SnapshotsCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum SnapshotsCommand {
    /// List stored snapshots.
    List,
    /// Integrity-check one snapshot.
    Validate(SnapshotIdArgs),
    /// Delete one snapshot.
    Delete(SnapshotIdArgs),
}

#[derive(Debug, Clone, Args, Serialize)]
struct SnapshotIdArgs {
    /// Snapshot identifier, e.g. `baseline-20260115T093000.214Z`.
    #[arg(value_name = "ID")]
    id: String,
}

#[derive(Debug, Clone, Args, Serialize)]
struct CompareArgs {
    /// Baseline snapshot id.
    #[arg(value_name = "BASELINE")]
    baseline: String,
    /// Candidate snapshot id.
    #[arg(value_name = "CANDIDATE")]
    candidate: String,
    /// Override the default regression threshold (percentage points).
    #[arg(long, value_name = "PCT")]
    threshold: Option<f64>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
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
    /// A comparison produced a FAIL verdict.
    #[error("{0}")]
    Regression(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
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
            Self::User(_) | Self::Regression(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_corpus(cli, args),
        Command::Snapshots(args) => run_snapshots(cli, args),
        Command::Compare(args) => run_compare(cli, args),
        Command::Health => run_health(cli),
        Command::Config(args) => run_config(cli, args),
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::Runtime(e.to_string()))
}

#[allow(clippy::too_many_lines)]
fn run_corpus(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mode = output_mode(cli);
    let corpus = load_corpus(&args.corpus).map_err(|e| CliError::User(e.to_string()))?;
    let categories: Option<BTreeSet<String>> = if args.category.is_empty() {
        None
    } else {
        Some(args.category.iter().cloned().collect())
    };

    let client = ClassifierClient::new(config.client.clone())
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let runner = TestRunner::new(config.runner.clone(), client);

    let log = Arc::new(Mutex::new(JsonlWriter::open(config.paths.jsonl_log.clone())));
    let progress: Option<ProgressObserver> = if mode == OutputMode::Human {
        Some(Arc::new(move |completed, total, result| {
            let mark = if result.passed { "." } else { "F" };
            print!("{mark}");
            let _ = io::stdout().flush();
            if completed == total {
                println!();
            }
        }))
    } else {
        None
    };

    log_event(&log, {
        let mut entry = LogEntry::new(EventType::RunStart, Severity::Info);
        entry.cases = Some(corpus.len());
        entry.details = Some(format!("corpus {}", args.corpus.display()));
        entry
    });

    let record = runner
        .run(&corpus, categories.as_ref(), progress)
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    let analyzer = ResultAnalyzer::new(config.analyzer.clone());
    let analysis = analyzer.analyze(&record);

    let duration_ms = u64::try_from(
        (record.finished_at - record.started_at)
            .num_milliseconds()
            .max(0),
    )
    .unwrap_or(u64::MAX);
    log_event(&log, {
        let (event, severity) = match record.state {
            RunState::Completed => (EventType::RunComplete, Severity::Info),
            RunState::Aborted => (EventType::RunAborted, Severity::Warning),
        };
        let mut entry = LogEntry::new(event, severity);
        entry.run_id = Some(record.run_id.clone());
        entry.cases = Some(record.total_cases);
        entry.accuracy = Some(analysis.overall_accuracy);
        entry.duration_ms = Some(duration_ms);
        entry.details = record.abort_reason.clone();
        entry
    });

    let snapshot_id = if args.no_capture || record.state == RunState::Aborted {
        None
    } else {
        let store = SnapshotStore::new(config.paths.snapshot_dir.clone());
        let capture = CaptureMeta {
            classifier_version: args.classifier_version.clone(),
            commit: args.commit.clone(),
            model_config: args.model_config.clone(),
            description: args.description.clone(),
        };
        let meta = store
            .capture(&args.label, capture, &record, &analysis)
            .map_err(|e| CliError::Runtime(e.to_string()))?;
        log_event(&log, {
            let mut entry = LogEntry::new(EventType::SnapshotCapture, Severity::Info);
            entry.label = Some(meta.label.clone());
            entry.snapshot_id = Some(meta.id.clone());
            entry
        });
        Some(meta.id)
    };

    match mode {
        OutputMode::Human => print_run_human(&record, &analysis, snapshot_id.as_deref()),
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "run": record,
                "analysis": analysis,
                "snapshot_id": snapshot_id,
            });
            write_json_line(&payload)?;
        }
    }

    if record.state == RunState::Aborted {
        let error = HarnessError::RunAborted {
            reason: record
                .abort_reason
                .unwrap_or_else(|| "no reason recorded".to_string()),
        };
        return Err(CliError::Runtime(error.to_string()));
    }
    Ok(())
}

fn print_run_human(record: &RunRecord, analysis: &Analysis, snapshot_id: Option<&str>) {
    println!("Run {}", record.run_id);
    if let Some(reason) = &record.abort_reason {
        println!("  {} {reason}", "ABORTED".red().bold());
    }
    println!(
        "  Cases: {} total, {} testable, {} passed",
        analysis.total_cases, analysis.testable_cases, analysis.passed_cases
    );
    println!(
        "  Overall accuracy: {:.1}%",
        analysis.overall_accuracy * 100.0
    );
    if analysis.transport_errors > 0 {
        println!(
            "  Transport errors: {} ({:.1}%)",
            analysis.transport_errors,
            analysis.transport_error_rate * 100.0
        );
    }

    if !analysis.categories.is_empty() {
        println!("\n  {:<24} {:>8} {:>8} {:>8}", "Category", "Passed", "Total", "Rate");
        for (name, cat) in &analysis.categories {
            let rate = format!("{:.1}%", cat.rate * 100.0);
            let rate = if cat.met_target {
                rate.green()
            } else if cat.critical {
                rate.red().bold()
            } else {
                rate.yellow()
            };
            println!("  {name:<24} {:>8} {:>8} {rate:>8}", cat.passed, cat.total);
        }
    }

    if let Some(latency) = &analysis.latency {
        println!(
            "\n  Latency: median {}ms, p95 {}ms, p99 {}ms ({} samples)",
            latency.median_ms, latency.p95_ms, latency.p99_ms, latency.samples
        );
    }

    if !analysis.failed_critical_categories.is_empty() {
        println!(
            "\n  {} critical categories below target: {}",
            "WARNING:".red().bold(),
            analysis.failed_critical_categories.join(", ")
        );
    }

    if let Some(id) = snapshot_id {
        println!("\n  Snapshot: {id}");
    }
}

fn run_snapshots(cli: &Cli, args: &SnapshotsArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = SnapshotStore::new(config.paths.snapshot_dir.clone());
    let log = Arc::new(Mutex::new(JsonlWriter::open(config.paths.jsonl_log.clone())));

    match args.command.as_ref().unwrap_or(&SnapshotsCommand::List) {
        SnapshotsCommand::List => {
            let summaries = store.list().map_err(|e| CliError::Runtime(e.to_string()))?;
            match output_mode(cli) {
                OutputMode::Human => {
                    if summaries.is_empty() {
                        println!("No snapshots in {}", store.dir().display());
                        return Ok(());
                    }
                    println!("{:<44} {:>8} {:>10}  Captured", "Id", "Cases", "Accuracy");
                    for s in &summaries {
                        println!(
                            "{:<44} {:>8} {:>9.1}%  {}",
                            s.id,
                            s.total_cases,
                            s.overall_accuracy * 100.0,
                            s.captured_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                        );
                    }
                }
                OutputMode::Json => {
                    let payload = json!({ "command": "snapshots list", "snapshots": summaries });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        SnapshotsCommand::Validate(id_args) => {
            store
                .validate(&id_args.id)
                .map_err(|e| CliError::User(e.to_string()))?;
            match output_mode(cli) {
                OutputMode::Human => println!("{} {}", "OK".green().bold(), id_args.id),
                OutputMode::Json => {
                    let payload =
                        json!({ "command": "snapshots validate", "id": id_args.id, "valid": true });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        SnapshotsCommand::Delete(id_args) => {
            store
                .delete(&id_args.id)
                .map_err(|e| CliError::User(e.to_string()))?;
            log_event(&log, {
                let mut entry = LogEntry::new(EventType::SnapshotDelete, Severity::Info);
                entry.snapshot_id = Some(id_args.id.clone());
                entry
            });
            match output_mode(cli) {
                OutputMode::Human => println!("Deleted {}", id_args.id),
                OutputMode::Json => {
                    let payload =
                        json!({ "command": "snapshots delete", "id": id_args.id, "deleted": true });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

fn run_compare(cli: &Cli, args: &CompareArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = SnapshotStore::new(config.paths.snapshot_dir.clone());
    let log = Arc::new(Mutex::new(JsonlWriter::open(config.paths.jsonl_log.clone())));

    let baseline = store
        .load(&args.baseline)
        .map_err(|e| CliError::User(e.to_string()))?;
    let candidate = store
        .load(&args.candidate)
        .map_err(|e| CliError::User(e.to_string()))?;

    let mut compare_config = config.compare.clone();
    if let Some(threshold) = args.threshold {
        if threshold < 0.0 {
            return Err(CliError::User(format!(
                "--threshold must be >= 0, got {threshold}"
            )));
        }
        compare_config.default_regression_threshold_pct = threshold;
    }

    let result = compare_snapshots(&baseline, &candidate, &compare_config);

    log_event(&log, {
        let mut entry = LogEntry::new(
            EventType::CompareComplete,
            match result.overall_verdict {
                Verdict::Pass => Severity::Info,
                Verdict::Warn => Severity::Warning,
                Verdict::Fail => Severity::Critical,
            },
        );
        entry.verdict = Some(result.overall_verdict.to_string());
        entry.details = Some(format!("{} vs {}", args.baseline, args.candidate));
        entry
    });

    match output_mode(cli) {
        OutputMode::Human => print_compare_human(&result),
        OutputMode::Json => {
            let payload = json!({ "command": "compare", "comparison": result });
            write_json_line(&payload)?;
        }
    }

    if result.overall_verdict == Verdict::Fail {
        return Err(CliError::Regression(format!(
            "verdict FAIL: {} -> {}",
            args.baseline, args.candidate
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn print_compare_human(result: &ComparisonResult) {
    println!("Baseline:  {}", result.baseline_id);
    println!("Candidate: {}", result.candidate_id);
    println!(
        "Overall:   {:.1}% -> {:.1}% ({:+.1} points)",
        result.baseline_accuracy * 100.0,
        result.candidate_accuracy * 100.0,
        result.overall_delta_pct_points
    );

    if !result.categories.is_empty() {
        println!(
            "\n{:<24} {:>10} {:>10} {:>8}  Verdict",
            "Category", "Baseline", "Candidate", "Delta"
        );
        for (name, delta) in &result.categories {
            let fmt_rate =
                |rate: Option<f64>| rate.map_or_else(|| "-".to_string(), |r| format!("{:.1}%", r * 100.0));
            let verdict = match delta.verdict {
                CategoryVerdict::Improved => "improved".green(),
                CategoryVerdict::Held => "held".normal(),
                CategoryVerdict::Declined => "declined".yellow(),
                CategoryVerdict::Regressed => {
                    if delta.critical {
                        "REGRESSED (critical)".red().bold()
                    } else {
                        "REGRESSED".red()
                    }
                }
                CategoryVerdict::MissingBaseline => "new".cyan(),
                CategoryVerdict::MissingCandidate => "removed".cyan(),
            };
            println!(
                "{name:<24} {:>10} {:>10} {:>+7.1}  {verdict}",
                fmt_rate(delta.baseline_rate),
                fmt_rate(delta.candidate_rate),
                delta.delta_pct_points
            );
        }
    }

    if !result.phrase_changes.is_empty() {
        println!("\nPhrase changes ({} unchanged):", result.unchanged_phrases);
        for change in &result.phrase_changes {
            use crisis_harness::compare::comparison::Transition;
            let arrow = match change.transition {
                Transition::PassToFail => "pass -> fail".red(),
                Transition::FailToPass => "fail -> pass".green(),
            };
            println!(
                "  [{arrow}] {} ({})",
                change.identity.message, change.identity.category
            );
        }
    }
    if result.baseline_only_phrases + result.candidate_only_phrases > 0 {
        println!(
            "  Unmatched: {} baseline-only, {} candidate-only",
            result.baseline_only_phrases, result.candidate_only_phrases
        );
    }

    if let Some(latency) = &result.latency {
        println!(
            "\nLatency: median {:+}ms, p95 {:+}ms, p99 {:+}ms",
            latency.median_delta_ms, latency.p95_delta_ms, latency.p99_delta_ms
        );
    }

    let verdict = match result.overall_verdict {
        Verdict::Pass => "PASS".green().bold(),
        Verdict::Warn => "WARN".yellow().bold(),
        Verdict::Fail => "FAIL".red().bold(),
    };
    println!("\nVerdict: {verdict}");
}

fn run_health(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let client =
        ClassifierClient::new(config.client.clone()).map_err(|e| CliError::Runtime(e.to_string()))?;
    let healthy = client.health();

    match output_mode(cli) {
        OutputMode::Human => {
            if healthy {
                println!("{} {}", "healthy".green().bold(), config.client.base_url);
            } else {
                println!("{} {}", "unreachable".red().bold(), config.client.base_url);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "health",
                "base_url": config.client.base_url,
                "healthy": healthy,
            });
            write_json_line(&payload)?;
        }
    }

    if healthy {
        Ok(())
    } else {
        Err(CliError::Runtime(format!(
            "classifier at {} failed its health check",
            config.client.base_url
        )))
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let command = args.command.as_ref().unwrap_or(&ConfigCommand::Show);
    match command {
        ConfigCommand::Path => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(Config::default_path);
            match output_mode(cli) {
                OutputMode::Human => println!("{}", path.display()),
                OutputMode::Json => {
                    let payload = json!({ "command": "config path", "path": path });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        ConfigCommand::Show => {
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(e.to_string()))?;
                    print!("{rendered}");
                }
                OutputMode::Json => {
                    let payload = json!({ "command": "config show", "config": config });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        ConfigCommand::Validate => {
            let config = load_config(cli)?;
            config
                .validate()
                .map_err(|e| CliError::User(e.to_string()))?;
            match output_mode(cli) {
                OutputMode::Human => println!("{}", "configuration valid".green()),
                OutputMode::Json => {
                    let payload = json!({ "command": "config validate", "valid": true });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

fn log_event(log: &Arc<Mutex<JsonlWriter>>, entry: LogEntry) {
    log.lock().write_entry(&entry);
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("CRH_OUTPUT_FORMAT").ok();
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
        Some("auto") | None => fallback,
        Some(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        // --json wins over everything.
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        // Env var wins over tty detection.
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        // Fallback follows the terminal.
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
        // Unknown env values fall back.
        assert_eq!(
            resolve_output_mode(false, Some("fancy"), true),
            OutputMode::Human
        );
    }

    #[test]
    fn exit_codes_follow_the_contract() {
        assert_eq!(CliError::User("x".to_string()).exit_code(), 1);
        assert_eq!(CliError::Regression("x".to_string()).exit_code(), 1);
        assert_eq!(CliError::Runtime("x".to_string()).exit_code(), 2);
    }

    #[test]
    fn run_command_parses_categories_and_capture_meta() {
        let cli = Cli::parse_from([
            "crh",
            "run",
            "corpus.json",
            "--category",
            "definite_high",
            "--category",
            "ambiguous",
            "--label",
            "nightly",
            "--classifier-version",
            "2.3.1",
        ]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.corpus, PathBuf::from("corpus.json"));
                assert_eq!(args.category, vec!["definite_high", "ambiguous"]);
                assert_eq!(args.label, "nightly");
                assert_eq!(args.classifier_version.as_deref(), Some("2.3.1"));
                assert!(!args.no_capture);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn compare_command_parses_ids() {
        let cli = Cli::parse_from(["crh", "compare", "base-1", "cand-2", "--threshold", "3.5"]);
        match cli.command {
            Command::Compare(args) => {
                assert_eq!(args.baseline, "base-1");
                assert_eq!(args.candidate, "cand-2");
                assert_eq!(args.threshold, Some(3.5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
