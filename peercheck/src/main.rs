//! peercheck - identity-persistence checks for a peer-to-peer tunnel binary.
//!
//! Runs the scenario catalog against the subject binary and exits with
//! 0 (all passed), 1 (a scenario failed), 2 (environment error) or
//! 130 (interrupted).

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use peercheck_common::config::ConfigSource;
use peercheck_common::preflight::{self, BuildCommand};
use peercheck_common::{
    HarnessError, HarnessSettings, LogConfig, Reporter, RunOutcome, ScenarioId, Supervisor,
    WorkspaceManager, init_logging,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};

const EXIT_FAILED: u8 = 1;
const EXIT_ENVIRONMENT: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "peercheck")]
#[command(author, version, about = "Black-box identity-persistence checks for a p2p tunnel")]
struct Cli {
    /// Path to the subject binary
    #[arg(long)]
    subject: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory under which instance workspaces are created
    #[arg(long)]
    work_root: Option<PathBuf>,

    /// Build the subject in --project-dir before testing
    #[arg(long)]
    build: bool,

    /// Command line for --build (default: `cargo build`)
    #[arg(long, value_name = "CMD")]
    build_command: Option<String>,

    /// Project directory for --build
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Run only these scenarios (slug, tag like s3, or number); repeatable
    #[arg(short, long = "scenario", value_name = "ID")]
    scenarios: Vec<ScenarioId>,

    /// Print the scenario catalog and exit
    #[arg(long)]
    list: bool,

    /// Write a JSON report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Also write JSON logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Exit 0 after a completed run even if scenarios failed
    #[arg(long)]
    no_fail_exit: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list {
        print_catalog();
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(HarnessError::BuildFailed { stderr, .. }) =
                err.downcast_ref::<HarnessError>()
            {
                eprintln!("{stderr}");
            }
            ExitCode::from(EXIT_ENVIRONMENT)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings =
        HarnessSettings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(subject) = cli.subject {
        settings.subject = subject;
        settings.mark("subject", ConfigSource::CommandLine);
    }
    if let Some(work_root) = cli.work_root {
        settings.work_root = work_root;
        settings.mark("work_root", ConfigSource::CommandLine);
    }
    if let Some(command_line) = &cli.build_command {
        settings
            .set_build_command(command_line)
            .context("Invalid --build-command")?;
        settings.mark("build_command", ConfigSource::CommandLine);
    }
    if cli.verbose {
        settings.log_level = "debug".to_string();
        settings.mark("log_level", ConfigSource::CommandLine);
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    settings.resolve_paths(&cwd);

    let mut log_config = LogConfig::new(settings.log_level.clone());
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_file(path);
    }
    if !std::io::stderr().is_terminal() {
        log_config = log_config.without_ansi();
    }
    let _logging_guards = init_logging(&log_config)?;

    for (key, value, source) in settings.describe() {
        debug!(%source, "config {key} = {value}");
    }

    let scenarios = selected_scenarios(&cli.scenarios);

    if cli.build {
        build_command(&settings, &cli.project_dir)?.run().await?;
    }
    preflight::check_subject(&settings.subject)?;

    std::fs::create_dir_all(&settings.work_root).with_context(|| {
        format!(
            "Failed to create work root {}",
            settings.work_root.display()
        )
    })?;
    let workspaces = WorkspaceManager::new(&settings.work_root);
    workspaces.sweep_stale(settings.stale_workspace_age);

    info!(
        subject = %settings.subject.display(),
        scenarios = scenarios.len(),
        "Starting run"
    );
    let supervisor = Supervisor::new(&settings.subject, settings.supervisor_config());
    let mut reporter =
        Reporter::new(supervisor, workspaces, settings.pacing(), settings.ports());
    let outcome = reporter.run(&scenarios, interrupt_signal()).await?;

    let summary = outcome.summary();
    print!("{}", summary.render());
    if let Some(path) = &cli.report {
        summary.write_json(path)?;
    }

    let code = match outcome {
        RunOutcome::Interrupted(_) => {
            println!("Interrupted; processes stopped and workspaces removed");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        RunOutcome::Completed(ref summary) if !summary.all_passed() && !cli.no_fail_exit => {
            ExitCode::from(EXIT_FAILED)
        }
        RunOutcome::Completed(_) => ExitCode::SUCCESS,
    };
    Ok(code)
}

fn build_command(settings: &HarnessSettings, project_dir: &Path) -> Result<BuildCommand> {
    let (program, args) = settings
        .build_command
        .split_first()
        .context("build_command is empty")?;
    Ok(BuildCommand::new(program, project_dir)
        .args(args)
        .timeout(settings.build_timeout))
}

/// Requested scenarios in catalog order, or the whole catalog.
fn selected_scenarios(requested: &[ScenarioId]) -> Vec<ScenarioId> {
    if requested.is_empty() {
        return ScenarioId::ALL.to_vec();
    }
    let mut selected = requested.to_vec();
    selected.sort();
    selected.dedup();
    selected
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupt_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}

fn print_catalog() {
    for id in ScenarioId::ALL {
        println!("{:<3} {:<28} {}", id.tag(), id.slug(), id.description());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_repeated_scenarios() {
        let cli = Cli::parse_from([
            "peercheck",
            "--scenario",
            "s5",
            "-s",
            "stable-server-id",
            "--no-fail-exit",
        ]);
        assert_eq!(
            cli.scenarios,
            vec![ScenarioId::MultipleClients, ScenarioId::StableServerId]
        );
        assert!(cli.no_fail_exit);
        assert_eq!(cli.project_dir, PathBuf::from("."));
    }

    #[test]
    fn cli_rejects_unknown_scenario() {
        assert!(Cli::try_parse_from(["peercheck", "--scenario", "bogus"]).is_err());
    }

    #[test]
    fn build_command_flag_overrides_settings() {
        let cli = Cli::parse_from([
            "peercheck",
            "--build",
            "--build-command",
            "make tunnel",
            "--project-dir",
            "/srv/tunnel",
        ]);
        let mut settings = HarnessSettings::default();
        settings
            .set_build_command(cli.build_command.as_deref().unwrap())
            .unwrap();
        let command = build_command(&settings, &cli.project_dir).unwrap();
        assert_eq!(command.display(), "make tunnel");
        assert_eq!(
            build_command(&HarnessSettings::default(), &cli.project_dir)
                .unwrap()
                .display(),
            "cargo build"
        );
    }

    #[test]
    fn selection_uses_catalog_order() {
        assert_eq!(selected_scenarios(&[]), ScenarioId::ALL.to_vec());
        assert_eq!(
            selected_scenarios(&[
                ScenarioId::MultipleClients,
                ScenarioId::StableServerId,
                ScenarioId::MultipleClients,
            ]),
            vec![ScenarioId::StableServerId, ScenarioId::MultipleClients]
        );
    }
}
