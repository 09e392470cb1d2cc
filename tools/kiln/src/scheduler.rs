//! Build pipeline.
//!
//! Compiles every source in a worker pool, then (once all workers have
//! joined) decides and runs the archive, link and copy steps in order. The
//! join is what makes the archive and link decisions sound: they trust the
//! tracker's watermark, which every worker feeds as its object is confirmed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, mpsc};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use kiln_stale::{DepGenerator, DepTracker, Freshness, StaleReason, write_fingerprint};

use crate::command::{Toolchain, stage_for};
use crate::config::ResolvedConfig;
use crate::depgen::CcDepGenerator;
use crate::verbose::{StageTimer, dprintln, vprintln};

/// How the pipeline runs.
pub struct PipelineOptions {
    /// Rebuild everything without consulting the tracker.
    pub force: bool,
    /// Only report what is stale; never run compiler, archiver or linker.
    pub dry_run: bool,
    /// Maximum number of parallel compile workers (0 = one per CPU).
    pub jobs: usize,
}

/// An artifact found stale, with the reason it was (or would be) rebuilt.
pub struct StaleEntry {
    pub artifact: PathBuf,
    pub reason: String,
}

/// What a pipeline run did.
pub struct BuildReport {
    pub total_objects: usize,
    /// Objects compiled this run.
    pub recompiled: Vec<StaleEntry>,
    /// Stale artifacts, populated in dry-run mode only.
    pub stale: Vec<StaleEntry>,
    pub elapsed: Duration,
}

/// Outcome of one compilation unit.
enum Unit {
    /// Object is up to date.
    Fresh,
    /// Object was compiled. `None` when forced.
    Rebuilt(Option<StaleReason>),
    /// Object would be compiled (dry run). `None` when forced.
    Pending(Option<StaleReason>),
}

/// Execute the pipeline for one resolved target.
pub fn execute_pipeline(
    config: &ResolvedConfig,
    tracker: &DepTracker<Toolchain>,
    opts: &PipelineOptions,
) -> Result<BuildReport> {
    let start = Instant::now();
    let sources = &config.target.sources;
    let generator = CcDepGenerator::new(tracker.commands());

    let outcomes = {
        let _t = StageTimer::start("compile");
        compile_all(sources, tracker, &generator, opts)?
    };

    let mut report = BuildReport {
        total_objects: sources.len(),
        recompiled: Vec::new(),
        stale: Vec::new(),
        elapsed: Duration::ZERO,
    };

    let mut failures = 0;
    for (source, outcome) in sources.iter().zip(outcomes) {
        match outcome {
            Ok(Unit::Fresh) => {}
            Ok(Unit::Rebuilt(reason)) => report.recompiled.push(StaleEntry {
                artifact: tracker.object_path(source),
                reason: describe(reason.as_ref()),
            }),
            Ok(Unit::Pending(reason)) => report.stale.push(StaleEntry {
                artifact: tracker.object_path(source),
                reason: describe(reason.as_ref()),
            }),
            Err(e) => {
                eprintln!("error: {}: {e:#}", source.display());
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} compilation unit(s) failed");
    }

    // Every compile worker has joined and fed its object: the watermark is final.
    let mut upstream_pending = !report.stale.is_empty();
    let objects: Vec<PathBuf> = sources.iter().map(|s| tracker.object_path(s)).collect();
    let out_dir = config.out_dir();
    let toolchain = tracker.commands();
    let target = &config.target;

    let mut link_inputs = objects.clone();
    if let Some(ref archive) = target.archive {
        let _t = StageTimer::start("archive");
        let dest = out_dir.join(archive);
        let verdict = decide(opts, upstream_pending, || {
            tracker.archive_required(&dest, &objects)
        })?;
        if let Some(reason) = verdict {
            vprintln!("{} - archive required; {reason}", dest.display());
            if opts.dry_run {
                report.stale.push(StaleEntry {
                    artifact: dest.clone(),
                    reason,
                });
                upstream_pending = true;
            } else {
                dprintln!("  Archiving {}", dest.display());
                remove_if_exists(&dest)?;
                create_parent(&dest)?;
                let cmd = toolchain.archive(&dest, &objects);
                cmd.run_checked("archive", &dest)?;
                write_fingerprint(&dest, &cmd.render())?;
            }
        } else {
            vprintln!("  Fresh {}", dest.display());
        }
        link_inputs = vec![dest];
    }

    if let Some(ref binary) = target.binary {
        let _t = StageTimer::start("link");
        let dest = out_dir.join(binary);
        let elf_lib = target.elf_lib.as_deref();
        let verdict = decide(opts, upstream_pending, || {
            tracker.link_required(
                &dest,
                &target.link_options,
                &link_inputs,
                &target.keep_symbols,
                elf_lib,
            )
        })?;
        if let Some(reason) = verdict {
            vprintln!("{} - link required; {reason}", dest.display());
            if opts.dry_run {
                report.stale.push(StaleEntry {
                    artifact: dest.clone(),
                    reason,
                });
            } else {
                dprintln!("  Linking {}", dest.display());
                create_parent(&dest)?;
                let cmd = toolchain.link(
                    &dest,
                    &target.link_options,
                    &link_inputs,
                    &target.keep_symbols,
                    elf_lib,
                );
                cmd.run_checked("link", &dest)?;
                write_fingerprint(&dest, &cmd.render())?;
            }
        } else {
            vprintln!("  Fresh {}", dest.display());
        }
    }

    for src in &target.copy {
        let dest = kiln_stale::copy_destination(&out_dir, src);
        let verdict = decide(opts, false, || tracker.copy_required(src))?;
        let Some(reason) = verdict else {
            vprintln!("  Fresh {}", dest.display());
            continue;
        };
        vprintln!("{} - copy required; {reason}", dest.display());
        if opts.dry_run {
            report.stale.push(StaleEntry {
                artifact: dest,
                reason,
            });
        } else {
            dprintln!("  Copying {}", src.display());
            create_parent(&dest)?;
            fs::copy(src, &dest).with_context(|| {
                format!("failed to copy {} to {}", src.display(), dest.display())
            })?;
        }
    }

    report.elapsed = start.elapsed();
    Ok(report)
}

/// Run every compilation unit on a pool of worker threads.
///
/// Returns one result per source, in source order. Returns only after every
/// worker has exited.
fn compile_all(
    sources: &[PathBuf],
    tracker: &DepTracker<Toolchain>,
    generator: &CcDepGenerator<'_>,
    opts: &PipelineOptions,
) -> Result<Vec<Result<Unit>>> {
    let num_workers = match opts.jobs {
        0 => std::thread::available_parallelism().map_or(4, |n| n.get()),
        n => n,
    }
    .min(sources.len().max(1));
    vprintln!("  {} compilation units, {num_workers} workers", sources.len());

    let (job_tx, job_rx) = mpsc::channel::<usize>();
    let (result_tx, result_rx) = mpsc::channel::<(usize, Result<Unit>)>();
    for idx in 0..sources.len() {
        job_tx.send(idx).context("compile job queue closed")?;
    }
    drop(job_tx);
    let job_rx = Mutex::new(job_rx);

    let mut results: Vec<(usize, Result<Unit>)> = std::thread::scope(|s| {
        for _ in 0..num_workers {
            let tx = result_tx.clone();
            let job_rx = &job_rx;
            s.spawn(move || {
                loop {
                    let next = job_rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
                    let Ok(idx) = next else {
                        break;
                    };
                    let outcome = compile_unit(&sources[idx], tracker, generator, opts);
                    if tx.send((idx, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        result_rx.iter().collect()
    });

    if results.len() != sources.len() {
        bail!(
            "compile workers exited early ({} of {} units finished)",
            results.len(),
            sources.len()
        );
    }
    results.sort_by_key(|(idx, _)| *idx);
    Ok(results.into_iter().map(|(_, r)| r).collect())
}

/// Decide, and if needed compile, a single source file.
fn compile_unit(
    source: &Path,
    tracker: &DepTracker<Toolchain>,
    generator: &CcDepGenerator<'_>,
    opts: &PipelineOptions,
) -> Result<Unit> {
    let stage = stage_for(source);
    let object = tracker.object_path(source);

    let reason = if opts.force {
        if opts.dry_run {
            return Ok(Unit::Pending(None));
        }
        generator
            .generate(source, stage)
            .map_err(|e| anyhow!(e))?;
        None
    } else {
        match tracker.compile_required(source, stage, generator)? {
            Freshness::Fresh => {
                vprintln!("  Fresh {}", source.display());
                tracker.feed_timestamp(&object)?;
                return Ok(Unit::Fresh);
            }
            Freshness::Stale(reason) => {
                vprintln!("{} - rebuild required; {reason}", source.display());
                Some(reason)
            }
        }
    };

    if opts.dry_run {
        return Ok(Unit::Pending(reason));
    }

    dprintln!("  Compiling {}", source.display());
    create_parent(&object)?;
    let cmd = tracker.commands().compile(source, stage);
    cmd.run_checked("compile", source)?;
    write_fingerprint(&object, &cmd.render())?;
    tracker.feed_timestamp(&object)?;
    Ok(Unit::Rebuilt(reason))
}

/// Reason string if the step must run, `None` if it is up to date.
///
/// In a dry run, a step downstream of something that would be rebuilt is
/// reported stale without asking the tracker: the watermark cannot know
/// about objects that have not been produced yet.
fn decide(
    opts: &PipelineOptions,
    upstream_pending: bool,
    query: impl FnOnce() -> kiln_stale::Result<Freshness>,
) -> Result<Option<String>> {
    if opts.force {
        return Ok(Some(describe(None)));
    }
    if opts.dry_run && upstream_pending {
        return Ok(Some("inputs will be rebuilt".into()));
    }
    Ok(query()?.reason().map(ToString::to_string))
}

fn describe(reason: Option<&StaleReason>) -> String {
    reason.map_or_else(|| "forced".into(), ToString::to_string)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            Err(e).with_context(|| format!("failed to remove {}", path.display()))
        }
        _ => Ok(()),
    }
}
