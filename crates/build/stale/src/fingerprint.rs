//! Command fingerprints stored next to output artifacts.
//!
//! For an artifact at `P`, the exact command text that produced it lives at
//! `P.cmd`. A changed or missing fingerprint forces a rebuild no matter what
//! the timestamps say, which is how flag changes are detected.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StaleError};

/// Suffix appended to an artifact path to locate its fingerprint.
pub const FINGERPRINT_SUFFIX: &str = ".cmd";

/// Path of the fingerprint for `artifact`.
pub fn fingerprint_path(artifact: &Path) -> PathBuf {
    let mut s = OsString::from(artifact.as_os_str());
    s.push(FINGERPRINT_SUFFIX);
    PathBuf::from(s)
}

/// Returns `true` if `artifact` was last produced by a command other than
/// `command`, or if no readable fingerprint exists.
pub fn command_has_changed(artifact: &Path, command: &str) -> bool {
    match fs::read(fingerprint_path(artifact)) {
        Ok(prev) => prev != command.as_bytes(),
        Err(_) => true,
    }
}

/// Record `command` as the fingerprint of `artifact`.
///
/// Written to a temporary file first and renamed into place, so a reader
/// never observes a partial fingerprint.
pub fn write_fingerprint(artifact: &Path, command: &str) -> Result<()> {
    let path = fingerprint_path(artifact);
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, command).map_err(|e| StaleError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| StaleError::io(&path, e))?;
    Ok(())
}
