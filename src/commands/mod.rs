use std::path::{Path, PathBuf};

use docship::config::DocshipConfig;

pub type CmdResult<T> = docship::Result<(T, i32)>;

/// Flags shared by every subcommand.
pub(crate) struct GlobalArgs {
    pub root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// A project root with its effective configuration.
pub(crate) struct Project {
    pub root: PathBuf,
    pub config: DocshipConfig,
    pub config_path: Option<PathBuf>,
}

impl GlobalArgs {
    /// The project root: `--root`, or the current directory.
    pub fn project_root(&self) -> docship::Result<PathBuf> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(|e| {
                docship::Error::internal_io(e.to_string(), Some("read current dir".to_string()))
            })?,
        };
        if !root.is_dir() {
            return Err(docship::Error::validation_invalid_argument(
                "root",
                format!("{} is not a directory", root.display()),
                None,
                None,
            ));
        }
        Ok(root)
    }

    /// Resolve the root and load its configuration.
    pub fn project(&self) -> docship::Result<Project> {
        let root = self.project_root()?;
        let explicit = self.config.as_deref().map(|p| absolute(&root, p));
        let (config, config_path) = docship::config::load_or_default(&root, explicit.as_deref())?;
        tracing::debug!(
            root = %root.display(),
            config = ?config_path,
            "configuration loaded"
        );
        Ok(Project {
            root,
            config,
            config_path,
        })
    }
}

/// `--config` paths are relative to the working directory, not the root.
fn absolute(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| root.join(path))
}

pub mod artifacts;
pub mod build;
pub mod config;
pub mod on;
pub mod plan;
pub mod prepare;
pub mod run;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (docship::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::On(args) => dispatch!(args, global, on),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Prepare(args) => dispatch!(args, global, prepare),
        crate::Commands::Build(args) => dispatch!(args, global, build),
        crate::Commands::Artifacts(args) => dispatch!(args, global, artifacts),
        crate::Commands::Config(args) => dispatch!(args, global, config),
    }
}
