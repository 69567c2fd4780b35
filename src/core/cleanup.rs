//! Output directory cleanup.
//!
//! Patterns are matched with `glob-match` against slash-separated paths
//! relative to the output directory. A matching directory is removed whole
//! and not descended into.

use std::fs;
use std::path::{Path, PathBuf};

use glob_match::glob_match;

use crate::error::{Error, Result};
use crate::paths;

/// True if `rel` matches any pattern. A leading `**/` also matches at the top
/// level, so `**/*.ipynb` covers `index.ipynb` as well as `a/b/index.ipynb`.
pub fn matches_any(rel: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        glob_match(pattern, rel)
            || pattern
                .strip_prefix("**/")
                .is_some_and(|rest| glob_match(rest, rel))
    })
}

/// Entries under `dir` matching `patterns`, outermost first.
fn matching_entries(dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect(dir, dir, patterns, &mut found)?;
    Ok(found)
}

fn collect(base: &Path, dir: &Path, patterns: &[String], found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", dir.display())))
    })?;

    let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
    paths.sort();

    for path in paths {
        let rel = paths::relative_slash(base, &path);
        if matches_any(&rel, patterns) {
            found.push(path);
        } else if path.is_dir() && !path.is_symlink() {
            collect(base, &path, patterns, found)?;
        }
    }
    Ok(())
}

/// Remove every entry matching `patterns`. Returns the removed paths relative
/// to `dir`. A missing directory is an error: pruning only runs after a build.
pub fn prune(dir: &Path, patterns: &[String]) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for path in matching_entries(dir, patterns)? {
        let result = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("remove {}", path.display())))
        })?;
        removed.push(paths::relative_slash(dir, &path));
    }

    if !removed.is_empty() {
        tracing::debug!(dir = %dir.display(), count = removed.len(), "pruned entries");
    }
    Ok(removed)
}

/// Entries that would violate the publishable-output invariant. Empty means clean.
pub fn verify_publishable(dir: &Path, patterns: &[String]) -> Result<Vec<String>> {
    Ok(matching_entries(dir, patterns)?
        .iter()
        .map(|path| paths::relative_slash(dir, path))
        .collect())
}

/// Prune, then fail with `build.output_unclean` if anything is left behind.
pub fn prune_and_verify(dir: &Path, patterns: &[String]) -> Result<Vec<String>> {
    let removed = prune(dir, patterns)?;
    let offending = verify_publishable(dir, patterns)?;
    if !offending.is_empty() {
        return Err(Error::build_output_unclean(
            dir.to_string_lossy().to_string(),
            offending,
        ));
    }
    Ok(removed)
}
