//! `docship.toml` configuration.
//!
//! Every field has a default so a project without a config file still gets
//! the conventional Sphinx layout (`make html` in `docs/`, published to
//! `docs/html`). Precedence: defaults < file < environment < CLI flags.

use heck::ToKebabCase;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths;

/// Root configuration structure for docship.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DocshipConfig {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub environment: EnvironmentConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub triggers: TriggerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Name of the documentation set; used for artifact naming.
    #[serde(default = "default_project_name")]
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

/// Runtime and dependency installation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Pinned runtime version such as `"3.9"`; any patch release matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Documentation toolchain requirements, installed before the manifest.
    #[serde(default = "default_toolchain")]
    pub toolchain: Vec<String>,

    /// Project dependency manifest. `None` means "use requirements.txt if present".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,

    #[serde(default = "default_true")]
    pub editable: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_args: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            version: None,
            toolchain: default_toolchain(),
            manifest: None,
            editable: true,
            install_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default = "default_build_command")]
    pub command: String,

    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Where the documentation generator writes its output.
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// Final publish location; replaced wholesale on every run.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Glob patterns (relative to the output dir) of non-publishable entries.
    #[serde(default = "default_prune")]
    pub prune: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            working_dir: default_working_dir(),
            source_dir: default_source_dir(),
            output_dir: default_output_dir(),
            prune: default_prune(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    #[serde(default)]
    pub artifact: ArtifactConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArtifactConfig {
    /// Artifact name; defaults to the project name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "default_artifact_store")]
    pub store: String,

    /// When set, archives are also PUT to `<upload_url>/<name>/<run_id>/<file>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,

    /// Environment variable holding a bearer token for `upload_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            name: None,
            store: default_artifact_store(),
            upload_url: None,
            token_env: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Target branch; the remote's default branch when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    #[serde(default = "default_commit_message")]
    pub message: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            branch: None,
            author_name: default_author_name(),
            author_email: default_author_email(),
            message: default_commit_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    #[serde(default = "default_primary_branch")]
    pub primary_branch: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            primary_branch: default_primary_branch(),
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_project_name() -> String {
    "docs".to_string()
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_toolchain() -> Vec<String> {
    vec![
        "sphinx".to_string(),
        "nbsphinx".to_string(),
        "sphinx_rtd_theme".to_string(),
        "ipython".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_build_command() -> String {
    "make html".to_string()
}

fn default_working_dir() -> String {
    "docs".to_string()
}

fn default_source_dir() -> String {
    "docs/_build/html".to_string()
}

fn default_output_dir() -> String {
    "docs/html".to_string()
}

fn default_prune() -> Vec<String> {
    vec![
        ".doctrees".to_string(),
        "**/.doctrees".to_string(),
        "**/*.ipynb".to_string(),
        ".buildinfo".to_string(),
    ]
}

fn default_artifact_store() -> String {
    ".docship/artifacts".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_author_name() -> String {
    "github-actions[bot]".to_string()
}

fn default_author_email() -> String {
    "github-actions[bot]@users.noreply.github.com".to_string()
}

fn default_commit_message() -> String {
    "Update documentation".to_string()
}

fn default_primary_branch() -> String {
    "master".to_string()
}

// =============================================================================
// Accessors
// =============================================================================

impl DocshipConfig {
    /// Artifact name as a filesystem and URL safe slug (`My Docs` -> `my-docs`).
    pub fn artifact_name(&self) -> String {
        self.publish
            .artifact
            .name
            .as_deref()
            .unwrap_or(&self.project.name)
            .to_kebab_case()
    }

    /// Local artifact store directory for a project root.
    pub fn artifact_store_dir(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.publish.artifact.store)
    }

    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            return Err(Error::config_invalid_value("project.name", None, "must not be empty"));
        }
        if self.artifact_name().is_empty() {
            let (key, value) = match &self.publish.artifact.name {
                Some(name) => ("publish.artifact.name", name.clone()),
                None => ("project.name", self.project.name.clone()),
            };
            return Err(Error::config_invalid_value(
                key,
                Some(value),
                "must contain at least one letter or digit",
            ));
        }
        if self.environment.interpreter.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "environment.interpreter",
                None,
                "must not be empty",
            ));
        }
        if let Some(version) = &self.environment.version {
            crate::environment::parse_version_requirement(version)?;
        }
        if self.build.command.trim().is_empty() {
            return Err(Error::config_invalid_value("build.command", None, "must not be empty"));
        }

        let anchor = Path::new("/");
        paths::resolve_within(anchor, &self.build.source_dir, "build.source_dir")?;
        paths::resolve_within(anchor, &self.build.output_dir, "build.output_dir")?;

        for pattern in &self.build.prune {
            if pattern.trim().is_empty() {
                return Err(Error::config_invalid_value(
                    "build.prune",
                    None,
                    "patterns must not be empty",
                ));
            }
        }

        let remote = &self.publish.remote;
        if remote.author_name.trim().is_empty() || remote.author_email.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "publish.remote.author_name/author_email",
                None,
                "commit identity must be set",
            )
            .with_hint("The publish commit never uses the ambient git identity"));
        }
        if remote.message.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "publish.remote.message",
                None,
                "must not be empty",
            ));
        }
        if self.triggers.primary_branch.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "triggers.primary_branch",
                None,
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Apply `DOCSHIP_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(branch) = non_empty("DOCSHIP_PRIMARY_BRANCH") {
            self.triggers.primary_branch = branch;
        }
        if let Some(store) = non_empty("DOCSHIP_ARTIFACT_STORE") {
            self.publish.artifact.store = store;
        }
        if let Some(interpreter) = non_empty("DOCSHIP_INTERPRETER") {
            self.environment.interpreter = interpreter;
        }
    }
}

// =============================================================================
// Loading functions
// =============================================================================

/// Parse configuration text. `origin` is only used in error details.
pub fn parse(content: &str, origin: &str) -> Result<DocshipConfig> {
    toml::from_str(content).map_err(|e| Error::config_invalid_toml(origin, e))
}

/// Load configuration from an explicit file path.
pub fn load(path: &Path) -> Result<DocshipConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("read config {}", path.display())),
        )
    })?;
    parse(&content, &path.to_string_lossy())
}

/// Load the effective configuration for a project root.
///
/// An explicit path must exist; otherwise `<root>/docship.toml` is used when
/// present and built-in defaults when not. Environment overrides and
/// validation are applied in both cases.
pub fn load_or_default(root: &Path, explicit: Option<&Path>) -> Result<(DocshipConfig, Option<PathBuf>)> {
    let (mut config, source) = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::config_missing_key(
                    "config",
                    Some(path.to_string_lossy().to_string()),
                )
                .with_hint("Create one with: docship config init"));
            }
            (load(path)?, Some(path.to_path_buf()))
        }
        None => {
            let default_path = root.join(paths::CONFIG_FILE);
            if default_path.exists() {
                (load(&default_path)?, Some(default_path))
            } else {
                tracing::debug!(root = %root.display(), "no docship.toml, using defaults");
                (DocshipConfig::default(), None)
            }
        }
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok((config, source))
}

/// Render a configuration as TOML.
pub fn to_toml(config: &DocshipConfig) -> Result<String> {
    toml::to_string_pretty(config)
        .map_err(|e| Error::internal_unexpected(format!("serialize config: {}", e)))
}

/// Write the default configuration to `<root>/docship.toml`, refusing to overwrite.
pub fn init(root: &Path) -> Result<PathBuf> {
    let path = root.join(paths::CONFIG_FILE);
    if path.exists() {
        return Err(Error::validation_invalid_argument(
            "config",
            format!("{} already exists", path.display()),
            None,
            None,
        ));
    }
    let content = to_toml(&DocshipConfig::default())?;
    fs::write(&path, content).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("write {}", path.display())))
    })?;
    Ok(path)
}
