//! CLI argument definitions.
//!
//! All Clap derive structs for `lootrun` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::error::ExitCode;
use crate::observability::LogFormat;
use crate::transport::tcp::DEFAULT_BIND_ADDR;

// ============================================================================
// Root CLI
// ============================================================================

/// Round-based contest server: outlast the adversary.
#[derive(Parser, Debug)]
#[command(name = "lootrun", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "LOOTRUN_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true)]
    pub log_format: LogFormat,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Host a contest.
    Serve(ServeArgs),

    /// Validate configuration files without starting a server.
    Validate(ValidateArgs),
}

// ============================================================================
// Subcommand Arguments
// ============================================================================

/// Arguments for `serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to YAML configuration file. Built-in defaults when omitted.
    #[arg(short, long, env = "LOOTRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address (`host:port`).
    #[arg(long, default_value = DEFAULT_BIND_ADDR, env = "LOOTRUN_BIND")]
    pub bind: String,

    /// Expose Prometheus metrics on this port.
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Write the contest event stream to this file instead of stderr.
    #[arg(long)]
    pub events_file: Option<PathBuf>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Exit code for a failed parse.
///
/// `--help` and `--version` also surface as parse errors and exit cleanly;
/// anything else is a usage error rather than clap's default of 2, which
/// would read as a configuration failure.
#[must_use]
pub fn parse_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        ExitCode::USAGE_ERROR
    } else {
        ExitCode::SUCCESS
    }
}
