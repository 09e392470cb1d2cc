//! Console output levels for the driver.
//!
//! - **Quiet** (`-q`): errors and the final summary only
//! - **Normal**: one line per artifact actually rebuilt, plus errors and summary
//! - **Verbose** (`-v`): also stale reasons, up-to-date skips and stage timings

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// How much the driver prints. Levels are ordered: a message tagged with a
/// level is shown whenever the active level is at least as high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Level selected by the `-q`/`-v` flags. Quiet wins if both are set.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, true) => Self::Verbose,
            (false, false) => Self::Normal,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Quiet,
            2 => Self::Verbose,
            _ => Self::Normal,
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(Verbosity::Normal as u8);

/// Set the process-wide level. Called once from `main`.
pub fn init(level: Verbosity) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Whether messages tagged `level` are currently printed.
pub fn enabled(level: Verbosity) -> bool {
    Verbosity::from_u8(LEVEL.load(Ordering::Relaxed)) >= level
}

/// `println!` for stale reasons and skip lines; shown with `-v` only.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::enabled($crate::verbose::Verbosity::Verbose) {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// `println!` for per-artifact progress; silenced by `-q`.
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::enabled($crate::verbose::Verbosity::Normal) {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Reports the duration of one pipeline stage when dropped, in verbose mode.
///
/// ```ignore
/// let _t = StageTimer::start("compile");
/// // prints "  compile stage: 1.2s"
/// ```
pub struct StageTimer {
    stage: &'static str,
    start: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        vprintln!("  {} stage: {:.1?}", self.stage, self.start.elapsed());
    }
}
