//! Clap derive structures for the `coordly` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// coordly -- watch JSON endpoints through a polling update coordinator
#[derive(Debug, Parser)]
#[command(
    name = "coordly",
    version,
    about = "Poll JSON endpoints and print each update",
    long_about = "Poll JSON endpoints through an update coordinator.\n\n\
        Refreshes are single-flight, failures keep the last good snapshot,\n\
        and rejected credentials stop polling instead of hammering the source.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Named source from the config file
    #[arg(long, short = 's', env = "COORDLY_SOURCE", global = true)]
    pub source: Option<String>,

    /// Config file path (overrides the platform default)
    #[arg(long, env = "COORDLY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll a source and print every update
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Endpoint URL (overrides the configured source)
    pub url: Option<String>,

    /// JSON pointer of a numeric reading to print (repeatable, e.g. /power)
    #[arg(long, short = 'f')]
    pub field: Vec<String>,

    /// Exit after the first refresh
    #[arg(long)]
    pub once: bool,

    /// Poll interval, e.g. "30s" or "5m"
    #[arg(long, short = 'i', value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Per-request timeout, e.g. "10s"
    #[arg(long, short = 't', value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Bearer token
    #[arg(long, env = "COORDLY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Only print when the payload changed
    #[arg(long)]
    pub skip_unchanged: bool,

    /// Print compact single-line JSON
    #[arg(long)]
    pub compact: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display current resolved configuration
    Show,

    /// Create or extend the config file with a source
    Init {
        /// Endpoint URL of the source
        #[arg(long)]
        url: String,

        /// Source name
        #[arg(long, default_value = "default")]
        name: String,

        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,

        /// Environment variable holding the bearer token
        #[arg(long)]
        token_env: Option<String>,

        /// Replace an existing source of the same name
        #[arg(long)]
        force: bool,
    },

    /// List configured sources
    Sources,

    /// Set the default source
    Use {
        /// Source name to set as default
        name: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
