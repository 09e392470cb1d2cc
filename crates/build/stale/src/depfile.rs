//! Parser for compiler-generated Makefile-style dependency listings (`.d`).
//!
//! The format is `target: dep1 dep2 dep3 ...` with backslash-newline
//! continuations, e.g.
//!
//! ```text
//! obj/main.o: src/main.c include/a.h \
//!  include/b.h
//! ```
//!
//! Only the first non-empty target in a listing counts. Dependencies listed
//! under any later, different target are dropped: some compilers append phony
//! targets for each header, and those must not leak into the result.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StaleError};

/// Read and parse the listing at `path`.
pub fn read_dep_listing(path: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(path).map_err(|e| StaleError::io(path, e))?;
    parse_listing(&content).map_err(|line| StaleError::MalformedListing {
        path: path.to_path_buf(),
        line,
    })
}

/// Parse listing text held in memory.
pub fn parse_dep_listing(content: &str) -> Result<Vec<PathBuf>> {
    parse_listing(content).map_err(|line| StaleError::MalformedListing {
        path: PathBuf::new(),
        line,
    })
}

/// Returns the dependency list, or the 1-based number of the first
/// malformed logical line.
fn parse_listing(content: &str) -> std::result::Result<Vec<PathBuf>, usize> {
    // Join backslash-continuation lines.
    let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");

    // An empty target (a bare `:`) does not pin the canonical target.
    let mut canonical = "";
    let mut deps = Vec::new();

    for (idx, line) in joined.lines().enumerate() {
        let Some((target, line_deps)) = split_line(line).map_err(|()| idx + 1)? else {
            continue;
        };

        if canonical.is_empty() {
            canonical = target;
        }
        if target == canonical {
            deps.extend(line_deps.map(PathBuf::from));
        }
    }

    Ok(deps)
}

/// Split one logical line into its target and dependency tokens.
///
/// Blank lines yield `None`.
fn split_line(line: &str) -> std::result::Result<Option<(&str, std::str::SplitWhitespace<'_>)>, ()> {
    let mut tokens = line.split_whitespace();
    let Some(first) = tokens.next() else {
        return Ok(None);
    };
    let target = first.strip_suffix(':').ok_or(())?;
    Ok(Some((target, tokens)))
}
