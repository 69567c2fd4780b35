//! Command execution primitives with consistent error handling.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

use serde::Serialize;

use crate::error::{Error, Result};

/// Result of running an external process to completion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    fn from_output(out: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        }
    }

    fn spawn_failed(err: std::io::Error) -> Self {
        // 127 mirrors what a shell reports for an unknown program.
        let exit_code = if err.kind() == std::io::ErrorKind::NotFound {
            127
        } else {
            -1
        };
        Self {
            stdout: String::new(),
            stderr: format!("Command error: {}", err),
            success: false,
            exit_code,
        }
    }

    /// Last `lines` lines of the most useful stream (stderr, falling back to stdout).
    pub fn tail(&self, lines: usize) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let tail: Vec<&str> = text.lines().rev().take(lines).collect();
        tail.into_iter().rev().collect::<Vec<_>>().join("\n")
    }
}

/// Run a program with arguments, capturing output. Never fails: spawn errors
/// are reported through `CommandOutput` so callers decide how to classify them.
pub fn execute(
    program: &str,
    args: &[String],
    current_dir: Option<&Path>,
    env: &[(String, String)],
) -> CommandOutput {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let started = Instant::now();
    let output = match cmd.output() {
        Ok(out) => CommandOutput::from_output(out),
        Err(e) => CommandOutput::spawn_failed(e),
    };
    tracing::debug!(
        program,
        ?args,
        dir = ?current_dir,
        exit_code = output.exit_code,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "command finished"
    );
    output
}

/// Run a command line through the platform shell (`sh -c` / `cmd /C`).
///
/// Build commands routinely rely on shell features (`&&`, redirects,
/// environment expansion), so they go through here rather than `execute`.
pub fn execute_shell(
    command: &str,
    current_dir: Option<&Path>,
    env: &[(String, String)],
) -> CommandOutput {
    #[cfg(windows)]
    let (program, args) = ("cmd", vec!["/C".to_string(), command.to_string()]);

    #[cfg(not(windows))]
    let (program, args) = ("sh", vec!["-c".to_string(), command.to_string()]);

    execute(program, &args, current_dir, env)
}

/// Run a command in a specific directory.
///
/// Returns trimmed stdout if the command succeeds.
/// Returns an error with stderr (or stdout fallback) if it fails.
pub fn run_in(dir: &Path, program: &str, args: &[&str], context: &str) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", context, e),
                Some(context.to_string()),
            )
        })?;

    if !output.status.success() {
        return Err(Error::internal_io(
            format!("{} failed: {}", context, error_text(&output)),
            Some(context.to_string()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command in a directory, returning None on failure instead of error.
///
/// Useful when command failure is expected/acceptable (e.g., probing for an optional ref).
pub fn run_in_optional(dir: &Path, program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}

/// Extract error text from command output.
///
/// Prefers stderr, falls back to stdout if stderr is empty.
pub fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

/// Locate an executable on `PATH`. Paths containing a separator are checked as-is.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let full = dir.join(program);
        if full.is_file() {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{}.exe", program));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
