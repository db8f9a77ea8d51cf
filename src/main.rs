mod config;
mod error;
mod event;
mod install;
mod probe;
mod report;
mod runner;
mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use report::{OverallStatus, VerificationReport};

#[derive(Parser)]
#[command(
    name = "verihook",
    version,
    about = "Post-edit verification hook",
    long_about = "Detects which toolchains a changed file belongs to, runs their configured checks (test, lint, typecheck, security, audit), and emits one machine-readable verdict for the calling agent."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the project a changed file belongs to (post-edit mode)
    Check {
        /// Changed file or project directory; omitted = hook event on stdin
        path: Option<PathBuf>,

        /// Suppress the human summary, emit report JSON only
        #[arg(long)]
        json_only: bool,

        /// Run toolchains one after another instead of in parallel
        #[arg(long)]
        sequential: bool,
    },

    /// Install the hook subtree into a host settings file
    Install {
        /// Target settings file (e.g. ~/.claude/settings.json)
        #[arg(long)]
        settings: PathBuf,

        /// Directory holding a hooks.json template (default: built-in)
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Remove the installed hooks key instead
        #[arg(long)]
        uninstall: bool,

        /// Report whether the hooks key is installed, change nothing
        #[arg(long)]
        status: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            path,
            json_only,
            sequential,
        } => {
            let report = run_check(path, sequential, cli.verbose)?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !json_only {
                print_summary(&report);
            }

            // Hosts may gate on the exit code alone.
            if report.overall_status == OverallStatus::Fail {
                std::process::exit(2);
            }
        }

        Commands::Install {
            settings,
            templates,
            uninstall,
            status,
        } => {
            install::run(
                &settings,
                templates.as_deref(),
                uninstall,
                status,
                cli.verbose,
            )?;
        }
    }

    Ok(())
}

fn run_check(path: Option<PathBuf>, sequential: bool, verbose: u8) -> Result<VerificationReport> {
    // A host kill must reach in-flight checks, not just this process.
    #[cfg(unix)]
    runner::install_cancel_handler()?;

    let target = event::resolve_target(path)?;
    let table = config::CheckTable::load(verbose)?;
    let toolchains = probe::detect(&target, &table, verbose)?;

    if verbose > 0 {
        for tc in &toolchains {
            let tags: Vec<&str> = tc.available.iter().map(|t| t.as_str()).collect();
            eprintln!(
                "probe: {} at {} (tools: {})",
                tc.kind.as_str(),
                tc.root.display(),
                if tags.is_empty() {
                    "none".to_string()
                } else {
                    tags.join(", ")
                }
            );
        }
    }

    let results = runner::run_all(&toolchains, &table, sequential, verbose);
    Ok(report::aggregate(results))
}

// One line per check on stderr; stdout stays pure JSON for the host.
fn print_summary(report: &VerificationReport) {
    for tc in &report.toolchains {
        for check in &tc.checks {
            let status = match check.status {
                s if s.is_failure() => check.status.as_str().red(),
                report::CheckStatus::Passed => check.status.as_str().green(),
                _ => check.status.as_str().yellow(),
            };
            eprintln!(
                "{} {} {} ({}ms)",
                tc.kind.as_str().bold(),
                check.tag.as_str(),
                status,
                check.duration_ms
            );
        }
    }
    let overall = match report.overall_status {
        OverallStatus::Pass => "pass".green().bold(),
        OverallStatus::Fail => "fail".red().bold(),
        OverallStatus::SkippedAll => "skipped-all".yellow().bold(),
    };
    eprintln!("overall: {}", overall);
}
