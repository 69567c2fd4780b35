use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::error::{CommandFailedDetails, Error, Result};
use crate::paths;
use crate::utils::command;

const OUTPUT_TAIL_LINES: usize = 15;

/// Build directories resolved against the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    pub working_dir: PathBuf,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl BuildPaths {
    pub fn resolve(root: &Path, cfg: &BuildConfig) -> Result<Self> {
        let working_dir = paths::resolve(root, &cfg.working_dir);
        let source_dir = paths::resolve_within(root, &cfg.source_dir, "build.source_dir")?;
        let output_dir = paths::resolve_within(root, &cfg.output_dir, "build.output_dir")?;

        // Moving a directory into (or out of) itself cannot work.
        if source_dir != output_dir
            && (source_dir.starts_with(&output_dir) || output_dir.starts_with(&source_dir))
        {
            return Err(Error::config_invalid_value(
                "build.output_dir",
                Some(cfg.output_dir.clone()),
                format!("must not be nested with build.source_dir ({})", cfg.source_dir),
            ));
        }

        Ok(Self {
            working_dir,
            source_dir,
            output_dir,
        })
    }

    pub fn moves_output(&self) -> bool {
        self.source_dir != self.output_dir
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutput {
    pub command: String,
    pub working_dir: String,
    pub exit_code: i32,
    pub source_dir: String,
}

/// Delete previous output so the build starts from nothing.
/// Returns the directories that existed and were removed.
pub fn reset_output(root: &Path, cfg: &BuildConfig) -> Result<Vec<String>> {
    let build_paths = BuildPaths::resolve(root, cfg)?;
    let mut targets = vec![build_paths.output_dir.clone()];
    if build_paths.moves_output() {
        targets.push(build_paths.source_dir.clone());
    }

    let mut removed = Vec::new();
    for dir in targets {
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("remove {}", dir.display())))
            })?;
            removed.push(paths::relative_slash(root, &dir));
        }
    }
    Ok(removed)
}

/// Run the build command through the shell in `working_dir`.
///
/// Shell execution is needed: build commands are things like `make html` or
/// `sphinx-build -b html . _build/html && touch _build/html/.nojekyll`.
pub fn run_build(root: &Path, cfg: &BuildConfig) -> Result<BuildOutput> {
    let build_paths = BuildPaths::resolve(root, cfg)?;
    let working_dir = build_paths.working_dir.to_string_lossy().to_string();

    if !build_paths.working_dir.is_dir() {
        return Err(Error::config_invalid_value(
            "build.working_dir",
            Some(cfg.working_dir.clone()),
            "directory does not exist",
        ));
    }

    crate::log_status!("build", "Running '{}' in {}", cfg.command, working_dir);
    let output = command::execute_shell(&cfg.command, Some(&build_paths.working_dir), &[]);

    if !output.success {
        let tail = output.tail(OUTPUT_TAIL_LINES);
        let err = Error::build_command_failed(
            format_build_error(&cfg.command, &working_dir, output.exit_code, &tail),
            CommandFailedDetails {
                command: cfg.command.clone(),
                exit_code: output.exit_code,
                working_dir: Some(working_dir),
                output_tail: tail,
            },
        );
        return Err(match exit_code_hint(output.exit_code) {
            Some(hint) => err.with_hint(hint),
            None => err,
        });
    }

    if !build_paths.source_dir.is_dir() {
        return Err(Error::build_output_missing(
            build_paths.source_dir.to_string_lossy().to_string(),
        ));
    }

    Ok(BuildOutput {
        command: cfg.command.clone(),
        working_dir,
        exit_code: output.exit_code,
        source_dir: build_paths.source_dir.to_string_lossy().to_string(),
    })
}

/// Move the generated tree to the publish location. Returns the final path.
pub fn finalize_output(root: &Path, cfg: &BuildConfig) -> Result<PathBuf> {
    let build_paths = BuildPaths::resolve(root, cfg)?;
    if !build_paths.source_dir.is_dir() {
        return Err(Error::build_output_missing(
            build_paths.source_dir.to_string_lossy().to_string(),
        ));
    }
    if !build_paths.moves_output() {
        return Ok(build_paths.output_dir);
    }

    let target = &build_paths.output_dir;
    if target.exists() {
        fs::remove_dir_all(target).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("remove {}", target.display())))
        })?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }

    rename_dir(&build_paths.source_dir, target)?;
    crate::log_status!(
        "build",
        "Moved {} -> {}",
        paths::relative_slash(root, &build_paths.source_dir),
        paths::relative_slash(root, target)
    );
    Ok(build_paths.output_dir)
}

/// Move a directory, falling back to recursive copy + delete if rename fails
/// (e.g., across filesystem boundaries).
fn rename_dir(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    copy_dir_recursive(from, to)?;
    fs::remove_dir_all(from)
        .map_err(|e| Error::internal_io(e.to_string(), Some("remove source after copy".into())))
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .map_err(|e| Error::internal_io(e.to_string(), Some("create target dir".into())))?;

    for entry in fs::read_dir(src)
        .map_err(|e| Error::internal_io(e.to_string(), Some("read source dir".into())))?
    {
        let entry =
            entry.map_err(|e| Error::internal_io(e.to_string(), Some("read dir entry".into())))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_symlink() {
            copy_symlink(&src_path, &dst_path)?;
        } else if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .map_err(|e| Error::internal_io(e.to_string(), Some("copy file".into())))?;
        }
    }
    Ok(())
}

/// Recreate a link as a link, the way a rename would have moved it.
#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let target = fs::read_link(src)
        .map_err(|e| Error::internal_io(e.to_string(), Some("read symlink".into())))?;
    std::os::unix::fs::symlink(&target, dst)
        .map_err(|e| Error::internal_io(e.to_string(), Some("create symlink".into())))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> Result<()> {
    tracing::warn!(path = %src.display(), "skipping symlink in build output");
    Ok(())
}

/// Universal POSIX exit codes only; the build tool itself is opaque.
fn exit_code_hint(exit_code: i32) -> Option<&'static str> {
    match exit_code {
        127 => Some("Command not found. Check that the build command and its dependencies are installed and in PATH."),
        126 => Some("Permission denied. Check file permissions on the build script."),
        _ => None,
    }
}

/// Format a build failure with the tail of its output.
pub fn format_build_error(command: &str, working_dir: &str, exit_code: i32, tail: &str) -> String {
    let mut msg = format!(
        "Documentation build failed (exit code {}).\n  Command: {}\n  Working directory: {}",
        exit_code, command, working_dir
    );

    if !tail.is_empty() {
        msg.push_str(&format!(
            "\n\n--- Build output (last {} lines) ---\n",
            OUTPUT_TAIL_LINES
        ));
        msg.push_str(tail);
        msg.push_str("\n--- End of output ---");
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(command: &str) -> BuildConfig {
        BuildConfig {
            command: command.to_string(),
            working_dir: "docs".to_string(),
            source_dir: "docs/_build/html".to_string(),
            output_dir: "docs/html".to_string(),
            prune: Vec::new(),
        }
    }

    #[test]
    fn resolve_rejects_nested_dirs() {
        let root = Path::new("/work/adapt");
        let mut cfg = config("make html");
        cfg.output_dir = "docs/_build/html/site".to_string();
        assert!(BuildPaths::resolve(root, &cfg).is_err());

        cfg.output_dir = "docs/_build/html".to_string();
        let same = BuildPaths::resolve(root, &cfg).unwrap();
        assert!(!same.moves_output());
    }

    #[test]
    fn reset_output_removes_previous_trees() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs/html/old")).unwrap();
        fs::create_dir_all(root.join("docs/_build/html")).unwrap();

        let removed = reset_output(root, &config("true")).unwrap();
        assert_eq!(removed, vec!["docs/html", "docs/_build/html"]);
        assert!(!root.join("docs/html").exists());
        assert!(root.join("docs").exists());

        assert!(reset_output(root, &config("true")).unwrap().is_empty());
    }

    #[test]
    fn format_build_error_includes_tail() {
        let msg = format_build_error("make html", "/p/docs", 2, "line a\nline b");
        assert!(msg.contains("exit code 2"));
        assert!(msg.contains("line b"));
        assert!(msg.contains("--- End of output ---"));

        let bare = format_build_error("make html", "/p/docs", 2, "");
        assert!(!bare.contains("Build output"));
    }

    #[cfg(unix)]
    #[test]
    fn run_build_then_finalize_moves_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        let cfg = config("mkdir -p _build/html && echo '<html/>' > _build/html/index.html");

        let out = run_build(root, &cfg).unwrap();
        assert_eq!(out.exit_code, 0);

        let final_dir = finalize_output(root, &cfg).unwrap();
        assert_eq!(final_dir, root.join("docs/html"));
        assert!(root.join("docs/html/index.html").exists());
        assert!(!root.join("docs/_build/html").exists());
    }

    #[cfg(unix)]
    #[test]
    fn copy_keeps_links_as_links() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("_static")).unwrap();
        fs::write(src.join("index.html"), "<html/>").unwrap();
        std::os::unix::fs::symlink(".", src.join("loop")).unwrap();

        let dst = dir.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();
        assert!(dst.join("index.html").is_file());
        assert!(dst.join("loop").is_symlink());
        assert_eq!(fs::read_link(dst.join("loop")).unwrap(), Path::new("."));
    }

    #[cfg(unix)]
    #[test]
    fn run_build_failure_carries_tail_and_hint() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();

        let err = run_build(root, &config("echo 'Sphinx error: bad conf' >&2; exit 2")).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::BuildCommandFailed);
        assert_eq!(err.details["exitCode"], 2);
        assert!(err.message.contains("Sphinx error: bad conf"));
        assert!(err.hints.is_empty());

        let missing = run_build(root, &config("docship-no-such-builder html")).unwrap_err();
        assert_eq!(missing.details["exitCode"], 127);
        assert_eq!(missing.hints.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn run_build_without_output_is_output_missing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();

        let err = run_build(root, &config("true")).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::BuildOutputMissing);
    }
}
