//! Environment Preparer: runtime check and dependency installation.
//!
//! Every installation goes through `<interpreter> -m pip install`, so a
//! virtualenv interpreter path in `environment.interpreter` is enough to
//! isolate a run. Nothing is retried.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};
use serde::Serialize;

use crate::config::EnvironmentConfig;
use crate::error::{CommandFailedDetails, Error, Result};
use crate::manifest;
use crate::paths;
use crate::utils::command::{self, CommandOutput};
use crate::utils::shell;

/// Manifest used when `environment.manifest` is not set.
pub const DEFAULT_MANIFEST: &str = "requirements.txt";

const OUTPUT_TAIL_LINES: usize = 15;

static VERSION_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").unwrap());

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInfo {
    pub interpreter: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed { command: String, packages: usize },
    Skipped { reason: String },
}

/// Turn a configured pin into a requirement. A bare version (`3.9`) means
/// that release line (`=3.9`, any patch); operators are passed through.
pub fn parse_version_requirement(pin: &str) -> Result<VersionReq> {
    let trimmed = pin.trim();
    let starts_with_digit = trimmed.chars().next().is_some_and(|c| c.is_ascii_digit());
    let candidate = if starts_with_digit {
        format!("={}", trimmed)
    } else {
        trimmed.to_string()
    };
    VersionReq::parse(&candidate).map_err(|e| {
        Error::config_invalid_value(
            "environment.version",
            Some(pin.to_string()),
            format!("not a version requirement: {}", e),
        )
    })
}

/// Pull `major.minor[.patch]` out of `--version` output such as `Python 3.9.18`.
pub fn extract_version(text: &str) -> Option<Version> {
    let caps = VERSION_NUMBER.captures(text)?;
    let part = |i: usize| -> Option<u64> { caps.get(i).and_then(|m| m.as_str().parse().ok()) };
    Some(Version::new(part(1)?, part(2)?, part(3).unwrap_or(0)))
}

/// Verify the interpreter exists and matches the pinned version.
pub fn check_runtime(root: &Path, env: &EnvironmentConfig) -> Result<RuntimeInfo> {
    let output = command::execute(&env.interpreter, &["--version".to_string()], Some(root), &[]);
    if !output.success {
        return Err(
            Error::environment_runtime_mismatch(&env.interpreter, env.version.clone(), None)
                .with_hint(format!(
                    "Install {} or point environment.interpreter at it",
                    env.interpreter
                )),
        );
    }

    // Older interpreters print the version on stderr.
    let reported = format!("{} {}", output.stdout, output.stderr);
    let found = extract_version(&reported).ok_or_else(|| {
        Error::environment_runtime_mismatch(
            &env.interpreter,
            env.version.clone(),
            Some(reported.trim().to_string()),
        )
    })?;

    if let Some(pin) = &env.version {
        let requirement = parse_version_requirement(pin)?;
        if !requirement.matches(&found) {
            return Err(Error::environment_runtime_mismatch(
                &env.interpreter,
                Some(pin.clone()),
                Some(found.to_string()),
            ));
        }
    }

    tracing::debug!(interpreter = %env.interpreter, version = %found, "runtime ok");
    Ok(RuntimeInfo {
        interpreter: env.interpreter.clone(),
        version: found.to_string(),
        required: env.version.clone(),
    })
}

/// Install the documentation toolchain packages.
pub fn install_toolchain(root: &Path, env: &EnvironmentConfig) -> Result<InstallOutcome> {
    if env.toolchain.is_empty() {
        return Ok(InstallOutcome::Skipped {
            reason: "no toolchain packages configured".to_string(),
        });
    }
    let command = pip_install(root, env, &env.toolchain, "toolchain")?;
    Ok(InstallOutcome::Installed {
        command,
        packages: env.toolchain.len(),
    })
}

/// Where the manifest lives, or `None` when nothing should be installed.
pub fn manifest_path(root: &Path, env: &EnvironmentConfig) -> Result<Option<std::path::PathBuf>> {
    match &env.manifest {
        Some(configured) => {
            let path = paths::resolve(root, configured);
            if !path.is_file() {
                return Err(Error::environment_manifest_missing(
                    path.to_string_lossy().to_string(),
                ));
            }
            Ok(Some(path))
        }
        None => {
            let path = root.join(DEFAULT_MANIFEST);
            Ok(path.is_file().then_some(path))
        }
    }
}

/// Validate the Dependency Set, then install it with `-r`.
pub fn install_manifest(root: &Path, env: &EnvironmentConfig) -> Result<InstallOutcome> {
    let Some(path) = manifest_path(root, env)? else {
        return Ok(InstallOutcome::Skipped {
            reason: format!("no {} in project root", DEFAULT_MANIFEST),
        });
    };

    let specs = manifest::load_manifest(&path)?;
    let packages = specs.iter().filter(|s| s.is_requirement()).count();
    if specs.is_empty() {
        return Ok(InstallOutcome::Skipped {
            reason: format!("{} declares no dependencies", path.display()),
        });
    }

    let args = vec!["-r".to_string(), path.to_string_lossy().to_string()];
    let command = pip_install(root, env, &args, "manifest")?;
    Ok(InstallOutcome::Installed { command, packages })
}

/// Install the project itself (editable by default).
pub fn install_project(root: &Path, env: &EnvironmentConfig) -> Result<InstallOutcome> {
    let mut args = Vec::new();
    if env.editable {
        args.push("-e".to_string());
    }
    args.push(".".to_string());
    let command = pip_install(root, env, &args, "project")?;
    Ok(InstallOutcome::Installed {
        command,
        packages: 1,
    })
}

fn pip_install(
    root: &Path,
    env: &EnvironmentConfig,
    packages: &[String],
    what: &str,
) -> Result<String> {
    let mut args = vec!["-m".to_string(), "pip".to_string(), "install".to_string()];
    args.extend(env.install_args.iter().cloned());
    args.extend(packages.iter().cloned());

    let display = shell::display_command(&env.interpreter, &args);
    crate::log_status!("environment", "Installing {}: {}", what, display);

    let process_env = vec![(
        "PIP_DISABLE_PIP_VERSION_CHECK".to_string(),
        "1".to_string(),
    )];
    let output = command::execute(&env.interpreter, &args, Some(root), &process_env);
    if output.success {
        return Ok(display);
    }
    Err(install_error(what, display, root, &output))
}

fn install_error(what: &str, command: String, root: &Path, output: &CommandOutput) -> Error {
    let err = Error::environment_install_failed(
        format!("Installing {} failed (exit code {})", what, output.exit_code),
        CommandFailedDetails {
            command,
            exit_code: output.exit_code,
            working_dir: Some(root.to_string_lossy().to_string()),
            output_tail: output.tail(OUTPUT_TAIL_LINES),
        },
    );
    match output.exit_code {
        127 => err.with_hint("Interpreter not found. Check environment.interpreter and PATH."),
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_pin_matches_any_patch_of_that_line() {
        let req = parse_version_requirement("3.9").unwrap();
        assert!(req.matches(&Version::new(3, 9, 0)));
        assert!(req.matches(&Version::new(3, 9, 18)));
        assert!(!req.matches(&Version::new(3, 10, 0)));
        assert!(!req.matches(&Version::new(3, 8, 17)));
    }

    #[test]
    fn operator_pins_pass_through() {
        let req = parse_version_requirement(">=3.8").unwrap();
        assert!(req.matches(&Version::new(3, 11, 2)));
        assert!(parse_version_requirement("three").is_err());
    }

    #[test]
    fn extract_version_handles_common_formats() {
        assert_eq!(extract_version("Python 3.9.18"), Some(Version::new(3, 9, 18)));
        assert_eq!(extract_version("Python 3.12.0rc1\n"), Some(Version::new(3, 12, 0)));
        assert_eq!(extract_version("Python 2.7"), Some(Version::new(2, 7, 0)));
        assert_eq!(extract_version("no digits here"), None);
    }

    #[test]
    fn missing_interpreter_is_a_runtime_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = EnvironmentConfig {
            interpreter: "docship-no-such-python".to_string(),
            version: Some("3.9".to_string()),
            ..Default::default()
        };
        let err = check_runtime(dir.path(), &env).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::EnvironmentRuntimeMismatch);
        assert_eq!(err.details["required"], "3.9");
    }

    #[test]
    fn empty_toolchain_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = EnvironmentConfig {
            toolchain: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            install_toolchain(dir.path(), &env).unwrap(),
            InstallOutcome::Skipped { .. }
        ));
    }

    #[test]
    fn manifest_resolution_rules() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut env = EnvironmentConfig::default();

        // default manifest absent: nothing to install
        assert!(manifest_path(dir.path(), &env).unwrap().is_none());

        std::fs::write(dir.path().join(DEFAULT_MANIFEST), "numpy\n").unwrap();
        assert!(manifest_path(dir.path(), &env).unwrap().is_some());

        env.manifest = Some("docs/requirements.txt".to_string());
        let err = manifest_path(dir.path(), &env).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::EnvironmentManifestInvalid);
    }

    #[cfg(unix)]
    mod with_fake_interpreter {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_python(dir: &Path, version: &str, exit_code: i32) -> String {
            let path = dir.join("fake-python");
            let script = format!(
                "#!/bin/sh\necho \"$@\" >> \"{}\"\necho \"Python {}\"\nexit {}\n",
                dir.join("calls.log").display(),
                version,
                exit_code
            );
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        #[test]
        fn check_runtime_accepts_matching_version() {
            let dir = tempfile::TempDir::new().unwrap();
            let env = EnvironmentConfig {
                interpreter: fake_python(dir.path(), "3.9.18", 0),
                version: Some("3.9".to_string()),
                ..Default::default()
            };
            let info = check_runtime(dir.path(), &env).unwrap();
            assert_eq!(info.version, "3.9.18");
        }

        #[test]
        fn check_runtime_rejects_other_release_line() {
            let dir = tempfile::TempDir::new().unwrap();
            let env = EnvironmentConfig {
                interpreter: fake_python(dir.path(), "3.11.4", 0),
                version: Some("3.9".to_string()),
                ..Default::default()
            };
            let err = check_runtime(dir.path(), &env).unwrap_err();
            assert_eq!(err.details["found"], "3.11.4");
        }

        #[test]
        fn install_project_uses_editable_flag() {
            let dir = tempfile::TempDir::new().unwrap();
            let env = EnvironmentConfig {
                interpreter: fake_python(dir.path(), "3.9.18", 0),
                install_args: vec!["--quiet".to_string()],
                ..Default::default()
            };
            install_project(dir.path(), &env).unwrap();
            let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
            assert_eq!(calls.trim(), "-m pip install --quiet -e .");
        }

        #[test]
        fn install_toolchain_passes_configured_packages() {
            let dir = tempfile::TempDir::new().unwrap();
            let env = EnvironmentConfig {
                interpreter: fake_python(dir.path(), "3.9.18", 0),
                toolchain: vec!["sphinx>=5".to_string(), "nbsphinx".to_string()],
                install_args: vec!["--quiet".to_string()],
                ..Default::default()
            };
            let outcome = install_toolchain(dir.path(), &env).unwrap();
            assert!(matches!(outcome, InstallOutcome::Installed { packages: 2, .. }));
            let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
            assert_eq!(calls.trim(), "-m pip install --quiet sphinx>=5 nbsphinx");
        }

        #[test]
        fn install_manifest_hands_the_file_to_pip() {
            let dir = tempfile::TempDir::new().unwrap();
            let manifest = dir.path().join(DEFAULT_MANIFEST);
            std::fs::write(
                &manifest,
                "--index-url https://example.org/simple\nnumpy>=1.20\n./vendor/pkg\n",
            )
            .unwrap();
            let env = EnvironmentConfig {
                interpreter: fake_python(dir.path(), "3.9.18", 0),
                install_args: vec!["--no-cache-dir".to_string()],
                ..Default::default()
            };

            let outcome = install_manifest(dir.path(), &env).unwrap();
            assert!(matches!(outcome, InstallOutcome::Installed { packages: 2, .. }));
            let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
            assert_eq!(
                calls.trim(),
                format!("-m pip install --no-cache-dir -r {}", manifest.display())
            );
        }

        #[test]
        fn invalid_manifest_never_reaches_pip() {
            let dir = tempfile::TempDir::new().unwrap();
            std::fs::write(dir.path().join(DEFAULT_MANIFEST), "numpy\n!!!\n").unwrap();
            let env = EnvironmentConfig {
                interpreter: fake_python(dir.path(), "3.9.18", 0),
                ..Default::default()
            };

            let err = install_manifest(dir.path(), &env).unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::EnvironmentManifestInvalid);
            assert!(!dir.path().join("calls.log").exists());
        }

        #[test]
        fn failing_install_reports_exit_code_and_tail() {
            let dir = tempfile::TempDir::new().unwrap();
            let env = EnvironmentConfig {
                interpreter: fake_python(dir.path(), "3.9.18", 1),
                ..Default::default()
            };
            let err = install_toolchain(dir.path(), &env).unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::EnvironmentInstallFailed);
            assert_eq!(err.details["exitCode"], 1);
            assert!(err.details["outputTail"]
                .as_str()
                .unwrap()
                .contains("Python 3.9.18"));
        }
    }
}
