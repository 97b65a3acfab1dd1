//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use low_disk_monitor::core::config::{Config, FileConfigProvider};
use low_disk_monitor::core::errors::LdsmError;
use low_disk_monitor::daemon::loop_main::{DaemonOptions, MonitorDaemon};
use low_disk_monitor::daemon::notifications::{NotificationDispatcher, format_bytes};
use low_disk_monitor::monitor::check::{DiskSpaceMonitor, Evaluation};
use low_disk_monitor::platform::pal::detect_platform;
use low_disk_monitor::platform::probe::TimedStatsProbe;

/// Low disk space monitor: warns before mounted filesystems fill up.
#[derive(Debug, Parser)]
#[command(
    name = "ldsm",
    author,
    version,
    about = "Low Disk Space Monitor",
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
    /// Run the monitoring daemon in the foreground.
    Daemon(DaemonArgs),
    /// Classify every mount once without notifying.
    Check(CheckArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Show version information.
    Version,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DaemonArgs {
    /// Do not write the JSONL activity log.
    #[arg(long)]
    no_activity_log: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct CheckArgs {
    /// Exit with status 2 when any mount is low on space.
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
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
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
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
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<LdsmError> for CliError {
    fn from(error: LdsmError) -> Self {
        match error {
            LdsmError::InvalidConfig { .. }
            | LdsmError::MissingConfig { .. }
            | LdsmError::ConfigParse { .. } => Self::User(error.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Check(args) => run_check(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version => emit_version(cli),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let provider = Arc::new(FileConfigProvider::new(cli.config.as_deref()));
    let options = DaemonOptions {
        activity_log: !args.no_activity_log,
        ..DaemonOptions::default()
    };

    let mut daemon = MonitorDaemon::init(config, provider, options)?;
    daemon.run()?;
    Ok(())
}

fn run_check(cli: &Cli, args: &CheckArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let (thresholds, clamps) = config.thresholds();
    for clamp in &clamps {
        eprintln!("[LDSM-CONFIG] {clamp}");
    }

    let platform = detect_platform(&config.paths)?;
    let probe = TimedStatsProbe::new(
        Arc::clone(&platform).into_stats_probe(),
        config.scheduler.probe_timeout(),
    );
    let monitor = DiskSpaceMonitor::new(
        platform.into_mount_source(),
        Arc::new(probe),
        thresholds,
        NotificationDispatcher::from_config(&config.notifier),
    );
    let evaluation = monitor.evaluate();

    match output_mode(cli) {
        OutputMode::Human => print_evaluation_human(&evaluation),
        OutputMode::Json => {
            let payload = json!({
                "command": "check",
                "mounts": serde_json::to_value(&evaluation.statuses)?,
                "skipped": serde_json::to_value(&evaluation.enumeration.skipped)?,
                "source_error": evaluation.enumeration.source_error,
                "low": evaluation.low_count(),
            });
            write_json_line(&payload)?;
        }
    }

    let low = evaluation.low_count();
    if args.strict && low > 0 {
        return Err(CliError::Runtime(format!("{low} mount(s) low on space")));
    }
    Ok(())
}

fn print_evaluation_human(evaluation: &Evaluation) {
    if let Some(error) = &evaluation.enumeration.source_error {
        eprintln!("{} {error}", "warning:".yellow().bold());
    }
    if evaluation.statuses.is_empty() {
        println!("No eligible mounts.");
    }

    for status in &evaluation.statuses {
        let label = if status.low {
            "LOW".red().bold()
        } else {
            "ok".green()
        };
        println!(
            "{label:>4}  {:<30} {:>10} free of {:>10} ({:>5.1}%)  {}",
            status.path.display(),
            format_bytes(status.free_bytes),
            format_bytes(status.total_bytes),
            status.free_ratio * 100.0,
            status.fs_type.dimmed(),
        );
    }

    if !evaluation.enumeration.skipped.is_empty() {
        println!();
        println!("{}", "Skipped:".bold());
        for skipped in &evaluation.enumeration.skipped {
            println!(
                "      {:<30} {}",
                skipped.path.display(),
                skipped.reason.to_string().dimmed()
            );
        }
    }
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
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                let (_, clamps) = config.thresholds();
                let warnings: Vec<String> = clamps.iter().map(ToString::to_string).collect();

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                        for warning in &warnings {
                            println!("  {} {warning}", "warning:".yellow());
                        }
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                            "warnings": warnings,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn emit_version(cli: &Cli) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    match output_mode(cli) {
        OutputMode::Human => println!("ldsm {version}"),
        OutputMode::Json => {
            let payload = json!({
                "binary": "ldsm",
                "version": version,
                "package": env!("CARGO_PKG_NAME"),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("LDSM_OUTPUT_FORMAT").ok();
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
