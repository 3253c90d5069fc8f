mod help_text;

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

/// Verify archive ids of append-only borg repositories against a trusted ledger
#[derive(Parser, Debug)]
#[command(
    name = "borg-ledger",
    version,
    about,
    long_about = help_text::ROOT_LONG_ABOUT
)]
pub struct Cli {
    /// Directory containing the borg repositories to check
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Replace each readable repository's ledger with its current archives,
    /// even when verification fails
    #[arg(short, long)]
    pub force: bool,

    /// With --force, report what would be updated without writing anything
    #[arg(short = 'n', long, requires = "force")]
    pub dry_run: bool,

    /// Only update ledgers if the differences match this fingerprint
    #[arg(
        long,
        value_name = "FINGERPRINT",
        requires = "force",
        long_help = help_text::FINGERPRINT_LONG_HELP
    )]
    pub fingerprint: Option<String>,

    /// Treatment of repositories without a ledger that were never baselined
    #[arg(
        long,
        value_enum,
        value_name = "POLICY",
        default_value_t = FirstSighting::Fail,
        long_help = help_text::FIRST_SIGHTING_LONG_HELP
    )]
    pub first_sighting: FirstSighting,

    /// Show matching archives too, not only differences
    #[arg(short, long)]
    pub all: bool,

    /// Number of repositories to check in parallel
    #[arg(
        short,
        long,
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub jobs: u16,

    /// borg executable to run
    #[arg(long, value_name = "PATH", default_value = "borg")]
    pub borg_binary: PathBuf,

    /// Seconds to wait for `borg list` on one repository before reporting it unreadable
    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 600,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Increase logging verbosity (-v info, -vv debug). Takes precedence over RUST_LOG.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Set the log level explicitly. Takes precedence over RUST_LOG.
    #[arg(
        long,
        value_enum,
        value_name = "LEVEL",
        conflicts_with = "verbose",
        global = true
    )]
    pub log_level: Option<LogLevel>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstSighting {
    Fail,
    Allow,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Cli {
    /// Parse arguments without exiting, so that the caller controls the exit
    /// code of usage errors.
    pub fn parse_args() -> Result<Self, clap::Error> {
        <Self as Parser>::try_parse()
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
    fn defaults_select_verify_mode() {
        let cli = Cli::try_parse_from(["borg-ledger", "/srv/borg"]).unwrap();
        assert!(!cli.force);
        assert!(!cli.dry_run);
        assert_eq!(cli.first_sighting, FirstSighting::Fail);
        assert_eq!(cli.jobs, 1);
        assert_eq!(cli.timeout, 600);
        assert_eq!(cli.borg_binary, PathBuf::from("borg"));
    }

    #[test]
    fn dry_run_requires_force() {
        assert!(Cli::try_parse_from(["borg-ledger", "-n", "/srv/borg"]).is_err());
        let cli = Cli::try_parse_from(["borg-ledger", "-f", "-n", "/srv/borg"]).unwrap();
        assert!(cli.force && cli.dry_run);
    }

    #[test]
    fn fingerprint_requires_force() {
        assert!(Cli::try_parse_from(["borg-ledger", "--fingerprint", "abc", "/srv/borg"]).is_err());
    }

    #[test]
    fn zero_jobs_rejected() {
        assert!(Cli::try_parse_from(["borg-ledger", "-j", "0", "/srv/borg"]).is_err());
    }

    #[test]
    fn root_is_required() {
        assert!(Cli::try_parse_from(["borg-ledger"]).is_err());
    }
}
