//! Verdicts returned by the staleness decisions.

use std::fmt;
use std::path::PathBuf;

/// Result of a staleness check on a single artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The artifact does not need regenerating.
    Fresh,
    /// The artifact must be regenerated, with the reason.
    Stale(StaleReason),
}

impl Freshness {
    /// Returns `true` if the result is `Fresh`.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    /// Returns `true` if the artifact must be regenerated.
    pub fn is_required(&self) -> bool {
        !self.is_fresh()
    }

    /// The reason for a stale verdict.
    pub fn reason(&self) -> Option<&StaleReason> {
        match self {
            Self::Fresh => None,
            Self::Stale(r) => Some(r),
        }
    }
}

/// Why an artifact is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The command fingerprint is missing or differs.
    CommandChanged,
    /// The destination has never been built.
    DestinationMissing(PathBuf),
    /// The source file is newer than the object.
    SourceNewer(PathBuf),
    /// A listed dependency is newer than the object.
    DependencyNewer(PathBuf),
    /// A listed dependency no longer exists.
    DependencyVanished(PathBuf),
    /// The dependency listing is missing or older than its source, so it
    /// cannot be trusted.
    ListingInvalid(PathBuf),
    /// The reference/input elf library is newer than the destination.
    ElfNewer(PathBuf),
    /// An object fed to the tracker this session is newer than the destination.
    WatermarkNewer,
    /// An input file (object, archive, linker script) is newer than the destination.
    InputNewer(PathBuf),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandChanged => write!(f, "different command"),
            Self::DestinationMissing(p) => write!(f, "{} does not exist", p.display()),
            Self::SourceNewer(p) => write!(f, "source newer than obj ({})", p.display()),
            Self::DependencyNewer(p) => {
                write!(f, "obj older than dependency ({})", p.display())
            }
            Self::DependencyVanished(p) => write!(f, "dependency removed ({})", p.display()),
            Self::ListingInvalid(p) => {
                write!(f, "no up-to-date dependency listing ({})", p.display())
            }
            Self::ElfNewer(p) => write!(f, "old elf file ({})", p.display()),
            Self::WatermarkNewer => write!(f, "object built this session is newer"),
            Self::InputNewer(p) => write!(f, "older than input ({})", p.display()),
        }
    }
}
