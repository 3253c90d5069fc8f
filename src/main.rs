mod archive;
mod cli;
mod control;
mod ledger;
mod orchestrator;
mod registry;
mod report;
mod snapshot;
mod util;
mod verify;

use cli::{Cli, FirstSighting};
use control::Mode;
use orchestrator::{RunOptions, RunStatus, RunSummary};
use snapshot::BorgCli;
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Event, Level, Subscriber, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use verify::FirstSightingPolicy;

struct LedgerExitCode;

impl LedgerExitCode {
    /// Exit code used when violations were found.
    fn violations() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used when a repository could not be checked or updated.
    fn operational_error() -> ExitCode {
        ExitCode::from(2)
    }

    /// Exit code used for other errors (invalid arguments, unusable root).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::parse_args() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version are reported as errors by clap but go to stdout.
            let _ = err.print();
            return if err.use_stderr() {
                LedgerExitCode::any_error()
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose, cli.log_level);

    let result = handle_run(cli);

    match result {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err}");
            LedgerExitCode::any_error()
        }
    }
}

fn handle_run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mode = if cli.force {
        Mode::Force {
            dry_run: cli.dry_run,
        }
    } else {
        Mode::Verify
    };

    let options = RunOptions {
        mode,
        first_sighting: match cli.first_sighting {
            FirstSighting::Fail => FirstSightingPolicy::Fail,
            FirstSighting::Allow => FirstSightingPolicy::Allow,
        },
        jobs: usize::from(cli.jobs),
        expected_fingerprint: cli.fingerprint,
    };

    let source = BorgCli::new(cli.borg_binary, Duration::from_secs(cli.timeout));
    let summary = orchestrator::run(&cli.root, &source, &options)?;

    report::print_summary(&summary, cli.all);

    if mode == Mode::Verify && summary.has_changes() {
        println!();
        println!("Fingerprint: {}", summary.fingerprint);
    }

    log_outcome(&summary);

    Ok(match summary.status() {
        RunStatus::Clean => ExitCode::SUCCESS,
        RunStatus::ViolationsFound => LedgerExitCode::violations(),
        RunStatus::OperationalError => LedgerExitCode::operational_error(),
    })
}

fn log_outcome(summary: &RunSummary) {
    use control::RepositoryStatus;

    let checked = summary.reports.len();
    let violations = summary.count(RepositoryStatus::Violations) + summary.vanished.len();
    let errors = summary.count(RepositoryStatus::Error);

    match summary.mode {
        Mode::Verify => {
            if violations == 0 && errors == 0 {
                info!("Verification successful: {checked} repositories checked, no violations");
            } else {
                if violations > 0 {
                    error!("Verification failed: {violations} repositories with violations");
                }
                if summary.has_changes() {
                    info!(
                        "After reviewing, run 'borg-ledger --force --fingerprint {}' \
                         to accept the current state.",
                        summary.fingerprint
                    );
                }
            }
        }
        Mode::Force { dry_run } => {
            let updated = summary
                .reports
                .iter()
                .filter(|r| matches!(r.update, control::UpdateOutcome::Saved(_)))
                .count();
            if dry_run {
                info!("DRY RUN - no ledgers were modified");
            } else {
                info!("Updated {updated} of {checked} ledgers");
            }
            if violations > 0 {
                warn!("{violations} repositories had violations that were accepted");
            }
        }
    }

    if errors > 0 {
        error!("{errors} repositories could not be checked or updated");
    }
}

fn init_tracing(verbose: u8, log_level: Option<cli::LogLevel>) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = LevelFormatter { stderr_is_terminal };

    let explicit = match (log_level, verbose) {
        (Some(level), _) => Some(level.as_filter()),
        (None, 0) => None,
        (None, 1) => Some("info"),
        (None, _) => Some("debug"),
    };

    // Explicit flags win over RUST_LOG, which wins over the default.
    let filter = match explicit {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct LevelFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for LevelFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::TRACE => writer.write_str("TRACE: ")?,
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
