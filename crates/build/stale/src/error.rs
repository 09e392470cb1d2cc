//! Error types for staleness queries.

use std::io;
use std::path::PathBuf;

/// Boxed error returned by external collaborators (command rendering,
/// dependency generation).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that abort a staleness query.
///
/// A missing destination artifact is never an error: it is reported as a
/// stale verdict instead. Only inputs expected to exist end up here.
#[derive(Debug, thiserror::Error)]
pub enum StaleError {
    /// A dependency-listing line does not start with a `target:` token.
    #[error("invalid dependency listing {}: line {line} missing ':'", path.display())]
    MalformedListing {
        /// Listing file, or empty when parsed from memory.
        path: PathBuf,
        /// 1-based logical line number (after continuation folding).
        line: usize,
    },

    /// A required input could not be found.
    #[error("required input does not exist: {}", path.display())]
    MissingInput {
        /// The missing path.
        path: PathBuf,
    },

    /// Any other file-system failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The command renderer could not produce a command string.
    #[error("failed to render command: {source}")]
    Command {
        /// Error reported by the renderer.
        #[source]
        source: BoxError,
    },

    /// The dependency generator failed for a source file.
    #[error("failed to generate dependencies for {}: {source}", path.display())]
    DepGeneration {
        /// Source file whose listing was being generated.
        path: PathBuf,
        /// Error reported by the generator.
        #[source]
        source: BoxError,
    },
}

impl StaleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = StaleError> = std::result::Result<T, E>;
