//! Dependency-listing generation through the C compiler (`-MM`).

use std::path::Path;

use anyhow::Context;
use kiln_stale::{BoxError, BuildCommands, DepGenerator, Stage};

use crate::command::Toolchain;
use crate::verbose::vprintln;

/// Writes `<out>/<stem>.d` by asking the compiler for header dependencies.
pub struct CcDepGenerator<'a> {
    toolchain: &'a Toolchain,
}

impl<'a> CcDepGenerator<'a> {
    pub fn new(toolchain: &'a Toolchain) -> Self {
        Self { toolchain }
    }
}

impl DepGenerator for CcDepGenerator<'_> {
    fn generate(&self, source: &Path, stage: Stage) -> Result<(), BoxError> {
        let listing = kiln_stale::dep_listing_path(self.toolchain.out_dir(), source);
        if let Some(parent) = listing.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        vprintln!("  Generating dependencies for {}", source.display());
        self.toolchain
            .dep_listing(source, stage)
            .run_checked("generate dependencies for", source)?;
        Ok(())
    }
}
