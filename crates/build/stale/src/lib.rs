//! Staleness detection for incremental native builds.
//!
//! Answers point queries of the form "does this output need regenerating?"
//! for compiled objects, static archives, trimmed archives, linked binaries,
//! ROM elf images and copied files. Decisions combine file-system timestamps,
//! compiler-generated dependency listings (`.d`) and per-artifact command
//! fingerprints (`.cmd`).
//!
//! The [`DepTracker`] is the entry point. Command rendering and dependency
//! generation are supplied by the caller through [`BuildCommands`] and
//! [`DepGenerator`].

pub mod depfile;
pub mod error;
pub mod fingerprint;
pub mod freshness;
pub mod mtime;
pub mod toolchain;
pub mod tracker;

pub use depfile::{parse_dep_listing, read_dep_listing};
pub use error::{BoxError, Result, StaleError};
pub use fingerprint::{command_has_changed, fingerprint_path, write_fingerprint};
pub use freshness::{Freshness, StaleReason};
pub use mtime::Presence;
pub use toolchain::{
    BuildCommands, DepGenerator, LinkOptions, Stage, copy_destination, dep_listing_path,
    object_path,
};
pub use tracker::{DepTracker, ListingAction};
