use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Default config file name, looked up at the project root.
pub const CONFIG_FILE: &str = "docship.toml";

/// Resolve a configured path against the project root.
/// `~` is expanded; absolute paths are returned unchanged.
pub fn resolve(root: &Path, configured: &str) -> PathBuf {
    let expanded = shellexpand::tilde(configured);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Resolve a path that must stay inside the project root (output and source
/// directories get deleted, so they may not point elsewhere).
pub fn resolve_within(root: &Path, configured: &str, key: &str) -> Result<PathBuf> {
    let relative = Path::new(configured);
    if configured.trim().is_empty() {
        return Err(Error::config_invalid_value(key, None, "path is empty"));
    }
    if relative.is_absolute() || configured.starts_with('~') {
        return Err(Error::config_invalid_value(
            key,
            Some(configured.to_string()),
            "must be relative to the project root",
        ));
    }

    let mut depth: i32 = 0;
    for component in relative.components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return Err(Error::config_invalid_value(
                key,
                Some(configured.to_string()),
                "escapes the project root",
            ));
        }
    }
    if depth == 0 {
        return Err(Error::config_invalid_value(
            key,
            Some(configured.to_string()),
            "must not be the project root itself",
        ));
    }

    Ok(root.join(relative))
}

/// Path relative to `base` with forward slashes, for matching and display.
pub fn relative_slash(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_joins_relative_paths() {
        let root = Path::new("/work/adapt");
        assert_eq!(
            resolve(root, "requirements.txt"),
            PathBuf::from("/work/adapt/requirements.txt")
        );
        assert_eq!(resolve(root, "/opt/req.txt"), PathBuf::from("/opt/req.txt"));
    }

    #[test]
    fn resolve_within_rejects_escapes_and_root() {
        let root = Path::new("/work/adapt");
        assert!(resolve_within(root, "docs/html", "build.output_dir").is_ok());
        assert!(resolve_within(root, "../elsewhere", "build.output_dir").is_err());
        assert!(resolve_within(root, "docs/../..", "build.output_dir").is_err());
        assert!(resolve_within(root, ".", "build.output_dir").is_err());
        assert!(resolve_within(root, "docs/..", "build.output_dir").is_err());
        assert!(resolve_within(root, "/tmp/html", "build.output_dir").is_err());
        assert!(resolve_within(root, "", "build.output_dir").is_err());
    }

    #[test]
    fn relative_slash_uses_forward_slashes() {
        let base = Path::new("/out");
        assert_eq!(
            relative_slash(base, Path::new("/out/examples/demo.ipynb")),
            "examples/demo.ipynb"
        );
    }
}
