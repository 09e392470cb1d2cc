//! Kiln build driver.
//!
//! Builds a C/assembly target described by `kiln.toml`, regenerating only
//! what the staleness tracker reports as out of date.
//!
//! Pipeline: load kiln.toml → resolve profile → compile units in parallel →
//!           archive → link → copy files.

mod cli;
mod command;
mod config;
mod depgen;
mod scheduler;
mod verbose;

use anyhow::{Context, Result};
use clap::Parser;
use kiln_stale::DepTracker;

use command::Toolchain;
use scheduler::PipelineOptions;
use verbose::{dprintln, vprintln};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    verbose::init(verbose::Verbosity::from_flags(cli.quiet, cli.verbose));

    match cli.command {
        cli::Command::Build => cmd_build(&cli),
        cli::Command::Status => cmd_status(&cli),
        cli::Command::Deps(ref args) => cmd_deps(args),
        cli::Command::Config => cmd_config(&cli),
        cli::Command::Clean => cmd_clean(),
    }
}

/// Locate the project, make it the working directory and resolve its config.
///
/// Sources, listings and objects are all relative to the project root, and
/// the compiler writes dependency paths relative to where it runs.
fn resolve_config(cli: &cli::Cli) -> Result<config::ResolvedConfig> {
    let root = config::find_project_root()?;
    std::env::set_current_dir(&root)
        .with_context(|| format!("failed to enter {}", root.display()))?;
    config::load_config(&root, cli.profile.as_deref())
}

fn pipeline_options(cli: &cli::Cli, dry_run: bool) -> PipelineOptions {
    PipelineOptions {
        force: cli.force,
        dry_run,
        jobs: cli.jobs.unwrap_or(0),
    }
}

/// Build the target.
fn cmd_build(cli: &cli::Cli) -> Result<()> {
    let resolved = resolve_config(cli)?;
    let tracker = DepTracker::new(Toolchain::from_config(&resolved));

    dprintln!(
        "Building {} [{}]...",
        resolved.project.name, resolved.profile.name
    );
    let report = scheduler::execute_pipeline(&resolved, &tracker, &pipeline_options(cli, false))?;

    for entry in &report.recompiled {
        vprintln!("  rebuilt  {}  ({})", entry.artifact.display(), entry.reason);
    }
    println!(
        "\nBuild complete. ({} of {} objects recompiled in {:.1?})",
        report.recompiled.len(),
        report.total_objects,
        report.elapsed
    );
    Ok(())
}

/// Report stale artifacts without building.
fn cmd_status(cli: &cli::Cli) -> Result<()> {
    let resolved = resolve_config(cli)?;
    let tracker = DepTracker::new(Toolchain::from_config(&resolved));

    let report = scheduler::execute_pipeline(&resolved, &tracker, &pipeline_options(cli, true))?;

    if report.stale.is_empty() {
        println!("Everything up to date.");
        return Ok(());
    }
    for entry in &report.stale {
        println!("  stale  {}  ({})", entry.artifact.display(), entry.reason);
    }
    println!("\n{} artifact(s) out of date.", report.stale.len());
    Ok(())
}

/// Print the parsed contents of one dependency listing.
fn cmd_deps(args: &cli::DepsArgs) -> Result<()> {
    let deps = kiln_stale::read_dep_listing(&args.listing)?;
    for dep in deps {
        println!("{}", dep.display());
    }
    Ok(())
}

/// Resolve configuration and print it.
fn cmd_config(cli: &cli::Cli) -> Result<()> {
    let resolved = resolve_config(cli)?;
    config::print_resolved(&resolved);
    Ok(())
}

/// Remove build artifacts.
fn cmd_clean() -> Result<()> {
    let root = config::find_project_root()?;
    let build_dir = root.join("build");
    if build_dir.exists() {
        std::fs::remove_dir_all(&build_dir)
            .with_context(|| format!("failed to remove {}", build_dir.display()))?;
        println!("Removed {}", build_dir.display());
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}
