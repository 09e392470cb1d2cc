//! The staleness oracle.
//!
//! One [`DepTracker`] exists per build target for the length of a build
//! session. Compile decisions may run concurrently from many workers; the
//! only shared mutable state is the watermark, the newest object timestamp
//! fed in so far.
//!
//! Archive and link decisions trust the watermark instead of re-statting
//! every object. They must only be asked after every compile worker whose
//! object feeds them has finished and called [`DepTracker::feed_timestamp`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use crate::depfile::read_dep_listing;
use crate::error::{Result, StaleError};
use crate::fingerprint::command_has_changed;
use crate::freshness::{Freshness, StaleReason};
use crate::mtime::{Presence, input_mtime, probe};
use crate::toolchain::{
    BuildCommands, DepGenerator, LinkOptions, Stage, copy_destination, dep_listing_path,
    object_path,
};

/// What [`DepTracker::refresh_dep_listing`] did to a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingAction {
    /// The listing was left as it was.
    Kept,
    /// The listing did not exist and was generated.
    Generated,
    /// The listing existed but was out of date and was regenerated.
    Refreshed,
}

/// Staleness oracle for one build target.
pub struct DepTracker<B> {
    /// Most recent object modification time fed this session.
    watermark: Mutex<SystemTime>,
    commands: B,
}

impl<B: BuildCommands> DepTracker<B> {
    /// Create a tracker with the watermark at the Unix epoch.
    pub fn new(commands: B) -> Self {
        Self {
            watermark: Mutex::new(SystemTime::UNIX_EPOCH),
            commands,
        }
    }

    /// The build-command collaborator.
    pub fn commands(&self) -> &B {
        &self.commands
    }

    /// Current watermark.
    pub fn watermark(&self) -> SystemTime {
        *self.watermark.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the watermark to `path`'s modification time if it is newer.
    ///
    /// Called by the driver once per compiled object. `path` must exist.
    pub fn feed_timestamp(&self, path: &Path) -> Result<()> {
        let mtime = input_mtime(path)?;
        let mut watermark = self.watermark.lock().unwrap_or_else(PoisonError::into_inner);
        if mtime > *watermark {
            *watermark = mtime;
        }
        Ok(())
    }

    /// Object path for `source` under the configured output directory.
    pub fn object_path(&self, source: &Path) -> PathBuf {
        object_path(self.commands.out_dir(), source)
    }

    /// Dependency-listing path for `source` under the output directory.
    pub fn dep_listing_path(&self, source: &Path) -> PathBuf {
        dep_listing_path(self.commands.out_dir(), source)
    }

    // -----------------------------------------------------------------------
    // Compile
    // -----------------------------------------------------------------------

    /// Determine whether `source` must be recompiled.
    ///
    /// A compile is required if any of the following is true:
    /// - the object was built with a different command, or never built;
    /// - the source is newer than the object;
    /// - a dependency in the listing is newer than the object, or was removed.
    ///
    /// Repairs the dependency listing first (see
    /// [`refresh_dep_listing`](Self::refresh_dep_listing)) and deletes it if a
    /// listed dependency has vanished.
    pub fn compile_required(
        &self,
        source: &Path,
        stage: Stage,
        generator: &dyn DepGenerator,
    ) -> Result<Freshness> {
        self.refresh_dep_listing(source, stage, generator)?;
        let verdict = self.compile_freshness(source, stage)?;
        if let Freshness::Stale(StaleReason::DependencyVanished(_)) = verdict {
            // Regenerating here could fail: the source may still include the
            // vanished header. The compile will report that instead.
            self.invalidate_dep_listing(source)?;
        }
        Ok(verdict)
    }

    /// Bring `source`'s dependency listing up to date.
    ///
    /// The listing is regenerated when the compile command changed (the
    /// upcoming compile may pull in different headers), generated when it
    /// does not exist, and regenerated when the source is newer than it. The
    /// last check is skipped when the source is newer than the object, since
    /// the compile is required regardless.
    pub fn refresh_dep_listing(
        &self,
        source: &Path,
        stage: Stage,
        generator: &dyn DepGenerator,
    ) -> Result<ListingAction> {
        let obj = self.object_path(source);
        let listing = self.dep_listing_path(source);

        let cmd = self.compile_command(source, stage)?;
        if command_has_changed(&obj, &cmd) {
            generate(generator, source, stage)?;
            return Ok(ListingAction::Refreshed);
        }

        let mut action = ListingAction::Kept;
        if !probe(&listing)?.exists() {
            generate(generator, source, stage)?;
            action = ListingAction::Generated;
        }

        let src_mtime = input_mtime(source)?;
        match probe(&obj)? {
            Presence::Present(obj_mtime) if src_mtime <= obj_mtime => {}
            _ => return Ok(action),
        }

        if let Presence::Present(listing_mtime) = probe(&listing)? {
            if src_mtime > listing_mtime {
                generate(generator, source, stage)?;
                action = ListingAction::Refreshed;
            }
        }

        Ok(action)
    }

    /// Decide whether `source` must be recompiled, without touching any file.
    ///
    /// Assumes the listing has been repaired. A listing that is missing or
    /// older than the source is not trusted and yields a stale verdict.
    pub fn compile_freshness(&self, source: &Path, stage: Stage) -> Result<Freshness> {
        let obj = self.object_path(source);
        let listing = self.dep_listing_path(source);

        let cmd = self.compile_command(source, stage)?;
        if command_has_changed(&obj, &cmd) {
            return Ok(stale(StaleReason::CommandChanged));
        }

        let src_mtime = input_mtime(source)?;
        let Presence::Present(obj_mtime) = probe(&obj)? else {
            return Ok(stale(StaleReason::DestinationMissing(obj)));
        };

        // No need to check dependencies.
        if src_mtime > obj_mtime {
            return Ok(stale(StaleReason::SourceNewer(source.to_path_buf())));
        }

        match probe(&listing)? {
            Presence::Present(listing_mtime) if listing_mtime >= src_mtime => {}
            _ => return Ok(stale(StaleReason::ListingInvalid(listing))),
        }

        for dep in read_dep_listing(&listing)? {
            match probe(&dep)? {
                Presence::Missing => return Ok(stale(StaleReason::DependencyVanished(dep))),
                Presence::Present(dep_mtime) if dep_mtime > obj_mtime => {
                    return Ok(stale(StaleReason::DependencyNewer(dep)));
                }
                Presence::Present(_) => {}
            }
        }

        Ok(Freshness::Fresh)
    }

    /// Delete `source`'s dependency listing. A listing that is already gone
    /// is not an error.
    pub fn invalidate_dep_listing(&self, source: &Path) -> Result<()> {
        let listing = self.dep_listing_path(source);
        match fs::remove_file(&listing) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StaleError::io(listing, e)),
        }
    }

    // -----------------------------------------------------------------------
    // Archive, link and derived images
    // -----------------------------------------------------------------------

    /// Determine whether the static library `dest` must be rearchived.
    ///
    /// Members are not statted individually: any object fed this session
    /// that is newer than the archive makes it stale.
    pub fn archive_required(&self, dest: &Path, members: &[PathBuf]) -> Result<Freshness> {
        let cmd = self.commands.archive_command(dest, members);
        if command_has_changed(dest, &cmd) {
            return Ok(stale(StaleReason::CommandChanged));
        }

        let Presence::Present(dest_mtime) = probe(dest)? else {
            return Ok(stale(StaleReason::DestinationMissing(dest.to_path_buf())));
        };

        if self.watermark() > dest_mtime {
            return Ok(stale(StaleReason::WatermarkNewer));
        }

        Ok(Freshness::Fresh)
    }

    /// Determine whether the trimmed archive `dest`, derived from `source`
    /// against an optional reference elf, must be regenerated.
    pub fn trimmed_archive_required(
        &self,
        dest: &Path,
        source: &Path,
        elf_lib: Option<&Path>,
    ) -> Result<Freshness> {
        let Presence::Present(dest_mtime) = probe(dest)? else {
            return Ok(stale(StaleReason::DestinationMissing(dest.to_path_buf())));
        };

        if let Some(elf) = elf_lib {
            if input_mtime(elf)? > dest_mtime {
                return Ok(stale(StaleReason::ElfNewer(elf.to_path_buf())));
            }
        }

        if input_mtime(source)? > dest_mtime {
            return Ok(stale(StaleReason::InputNewer(source.to_path_buf())));
        }

        Ok(Freshness::Fresh)
    }

    /// Determine whether the binary `dest` must be relinked.
    ///
    /// Linking is required if the link command changed, the binary does not
    /// exist, or it is older than the input elf library, any object fed this
    /// session, any member, or any configured linker script.
    pub fn link_required(
        &self,
        dest: &Path,
        options: &LinkOptions,
        members: &[PathBuf],
        keep_symbols: &[String],
        elf_lib: Option<&Path>,
    ) -> Result<Freshness> {
        let cmd = self
            .commands
            .link_command(dest, options, members, keep_symbols, elf_lib);
        if command_has_changed(dest, &cmd) {
            return Ok(stale(StaleReason::CommandChanged));
        }

        let Presence::Present(dest_mtime) = probe(dest)? else {
            return Ok(stale(StaleReason::DestinationMissing(dest.to_path_buf())));
        };

        if let Some(elf) = elf_lib {
            if input_mtime(elf)? > dest_mtime {
                return Ok(stale(StaleReason::ElfNewer(elf.to_path_buf())));
            }
        }

        if self.watermark() > dest_mtime {
            return Ok(stale(StaleReason::WatermarkNewer));
        }

        let inputs = members.iter().chain(self.commands.linker_scripts());
        newest_input_over(inputs, dest_mtime)
    }

    /// Determine whether the ROM elf `dest` must be rebuilt from `elf` and
    /// `archives`.
    pub fn rom_elf_required(
        &self,
        dest: &Path,
        elf: &Path,
        archives: &[PathBuf],
    ) -> Result<Freshness> {
        let Presence::Present(dest_mtime) = probe(dest)? else {
            return Ok(stale(StaleReason::DestinationMissing(dest.to_path_buf())));
        };

        if input_mtime(elf)? > dest_mtime {
            return Ok(stale(StaleReason::ElfNewer(elf.to_path_buf())));
        }

        newest_input_over(archives, dest_mtime)
    }

    /// Determine whether `source` must be copied into the output directory.
    pub fn copy_required(&self, source: &Path) -> Result<Freshness> {
        let dest = copy_destination(self.commands.out_dir(), source);

        let src_mtime = input_mtime(source)?;
        let Presence::Present(dest_mtime) = probe(&dest)? else {
            return Ok(stale(StaleReason::DestinationMissing(dest)));
        };

        if src_mtime > dest_mtime {
            return Ok(stale(StaleReason::SourceNewer(source.to_path_buf())));
        }

        Ok(Freshness::Fresh)
    }

    fn compile_command(&self, source: &Path, stage: Stage) -> Result<String> {
        self.commands
            .compile_command(source, stage)
            .map_err(|source| StaleError::Command { source })
    }
}

fn stale(reason: StaleReason) -> Freshness {
    Freshness::Stale(reason)
}

fn generate(generator: &dyn DepGenerator, source: &Path, stage: Stage) -> Result<()> {
    generator
        .generate(source, stage)
        .map_err(|e| StaleError::DepGeneration {
            path: source.to_path_buf(),
            source: e,
        })
}

/// Stale on the first input newer than `dest_mtime`. Every input must exist.
fn newest_input_over<'a>(
    inputs: impl IntoIterator<Item = &'a PathBuf>,
    dest_mtime: SystemTime,
) -> Result<Freshness> {
    for input in inputs {
        if input_mtime(input)? > dest_mtime {
            return Ok(stale(StaleReason::InputNewer(input.clone())));
        }
    }
    Ok(Freshness::Fresh)
}
