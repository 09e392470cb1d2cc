//! Command-line interface definitions for kiln.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Incremental build driver for C and assembly targets.
#[derive(Parser)]
#[command(name = "kiln", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Build profile to use.
    #[arg(long, short = 'P', global = true)]
    pub profile: Option<String>,

    /// Force rebuild, bypassing all staleness checks.
    #[arg(long, short = 'f', global = true)]
    pub force: bool,

    /// Suppress per-artifact output; show only errors and the final summary.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output with stale reasons and timings.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Maximum number of parallel compile workers (0 or omitted = one per CPU).
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Compile, archive, link and copy whatever is out of date.
    Build,
    /// Report out-of-date artifacts without building them.
    Status,
    /// Print the dependencies recorded in a dependency listing.
    Deps(DepsArgs),
    /// Resolve kiln.toml and print the result.
    Config,
    /// Remove build artifacts.
    Clean,
}

/// Arguments for the `deps` subcommand.
#[derive(Parser)]
pub struct DepsArgs {
    /// Path to a `.d` listing.
    pub listing: PathBuf,
}
