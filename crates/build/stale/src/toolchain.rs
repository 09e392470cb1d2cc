//! Interfaces to the build-command and dependency-generation collaborators,
//! plus the on-disk layout of objects and listings under the output directory.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::error::BoxError;

/// Which tool compiles a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// C compiler.
    Compiler,
    /// Assembler.
    Assembler,
}

/// Link options, keyed by name. Only enabled options affect the command.
pub type LinkOptions = BTreeMap<String, bool>;

/// Renders canonical command strings for a build target.
///
/// The strings returned here are what fingerprints are compared against, so
/// they must be deterministic for a given configuration.
pub trait BuildCommands: Send + Sync {
    /// Command that compiles `source` with the given stage's tool.
    fn compile_command(&self, source: &Path, stage: Stage) -> Result<String, BoxError>;

    /// Command that archives `members` into `dest`.
    fn archive_command(&self, dest: &Path, members: &[PathBuf]) -> String;

    /// Command that links `members` into `dest`.
    fn link_command(
        &self,
        dest: &Path,
        options: &LinkOptions,
        members: &[PathBuf],
        keep_symbols: &[String],
        elf_lib: Option<&Path>,
    ) -> String;

    /// Directory holding objects, listings and copied files.
    fn out_dir(&self) -> &Path;

    /// Linker scripts every link depends on.
    fn linker_scripts(&self) -> &[PathBuf];
}

/// Produces a dependency listing for a source file.
pub trait DepGenerator: Send + Sync {
    /// (Re)write the listing for `source`.
    fn generate(&self, source: &Path, stage: Stage) -> Result<(), BoxError>;
}

/// Object file for `source`: same stem, `.o`, under `out_dir`.
pub fn object_path(out_dir: &Path, source: &Path) -> PathBuf {
    out_dir.join(relative(source).with_extension("o"))
}

/// Dependency listing for `source`: same stem, `.d`, under `out_dir`.
pub fn dep_listing_path(out_dir: &Path, source: &Path) -> PathBuf {
    out_dir.join(relative(source).with_extension("d"))
}

/// Destination of a copied file: its base name under `out_dir`.
pub fn copy_destination(out_dir: &Path, source: &Path) -> PathBuf {
    match source.file_name() {
        Some(name) => out_dir.join(name),
        None => out_dir.to_path_buf(),
    }
}

/// Rebase `source` so it joins strictly below the output directory.
///
/// Root and prefix components are dropped and each `..` becomes `__`, so
/// `../lib/x.c` and `lib/x.c` get distinct objects inside `out_dir`.
fn relative(source: &Path) -> PathBuf {
    source
        .components()
        .filter_map(|c| match c {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => None,
            Component::ParentDir => Some(OsStr::new(PARENT_SEGMENT)),
            Component::Normal(name) => Some(name),
        })
        .collect()
}

/// Stand-in for a `..` component under the output directory.
const PARENT_SEGMENT: &str = "__";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keeps_source_directories() {
        let out = Path::new("build/debug");
        assert_eq!(
            object_path(out, Path::new("src/hal/uart.c")),
            PathBuf::from("build/debug/src/hal/uart.o")
        );
        assert_eq!(
            dep_listing_path(out, Path::new("src/start.S")),
            PathBuf::from("build/debug/src/start.d")
        );
    }

    #[test]
    fn absolute_source_stays_under_out_dir() {
        let out = Path::new("/proj/build");
        assert_eq!(
            object_path(out, Path::new("/abs/main.c")),
            PathBuf::from("/proj/build/abs/main.o")
        );
    }

    #[test]
    fn parent_dirs_never_leave_out_dir() {
        let out = Path::new("build/default");
        for source in ["../../shared/x.c", "../c/y.c", "src/../../z.S"] {
            for path in [
                object_path(out, Path::new(source)),
                dep_listing_path(out, Path::new(source)),
            ] {
                assert!(path.starts_with(out), "{} escapes", path.display());
                assert!(
                    !path.components().any(|c| c == Component::ParentDir),
                    "{} keeps a `..`",
                    path.display()
                );
            }
        }
        assert_eq!(
            object_path(out, Path::new("../../shared/x.c")),
            PathBuf::from("build/default/__/__/shared/x.o")
        );
    }

    #[test]
    fn parent_dir_source_is_distinct_per_profile() {
        let debug = object_path(Path::new("build/debug"), Path::new("../c/y.c"));
        let release = object_path(Path::new("build/release"), Path::new("../c/y.c"));
        assert_eq!(debug, PathBuf::from("build/debug/__/c/y.o"));
        assert_eq!(release, PathBuf::from("build/release/__/c/y.o"));
    }

    #[test]
    fn parent_dir_does_not_collide_with_sibling() {
        let out = Path::new("out");
        assert_ne!(
            object_path(out, Path::new("../lib/x.c")),
            object_path(out, Path::new("lib/x.c"))
        );
    }

    #[test]
    fn copy_uses_base_name() {
        assert_eq!(
            copy_destination(Path::new("out"), Path::new("vendor/blob/fw.bin")),
            PathBuf::from("out/fw.bin")
        );
    }
}
