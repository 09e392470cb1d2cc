//! Modification-time lookups.
//!
//! A failed `stat` means two different things depending on who asks: for a
//! destination artifact it means "not built yet", for an input it is a hard
//! error. [`Presence`] keeps the two apart so each call site picks its policy
//! explicitly.

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use crate::error::{Result, StaleError};

/// Outcome of a modification-time lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The path exists and was last modified at the given time.
    Present(SystemTime),
    /// The path does not exist.
    Missing,
}

impl Presence {
    /// Returns the modification time, if present.
    pub fn mtime(self) -> Option<SystemTime> {
        match self {
            Self::Present(t) => Some(t),
            Self::Missing => None,
        }
    }

    /// Returns `true` if the path exists.
    pub fn exists(self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Look up `path`'s modification time, mapping nonexistence to
/// [`Presence::Missing`]. Any other failure is an error.
pub fn probe(path: &Path) -> Result<Presence> {
    match fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta.modified().map_err(|e| StaleError::io(path, e))?;
            Ok(Presence::Present(mtime))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Presence::Missing),
        Err(e) => Err(StaleError::io(path, e)),
    }
}

/// Modification time of a path that must exist.
pub fn input_mtime(path: &Path) -> Result<SystemTime> {
    match probe(path)? {
        Presence::Present(t) => Ok(t),
        Presence::Missing => Err(StaleError::MissingInput {
            path: path.to_path_buf(),
        }),
    }
}
