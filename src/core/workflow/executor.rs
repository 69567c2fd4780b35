use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::artifact::{self, ArtifactStore, HttpArtifactStore, LocalArtifactStore};
use crate::build::{self, BuildPaths};
use crate::cleanup;
use crate::config::DocshipConfig;
use crate::engine::{PipelineStep, PipelineStepResult, StepExecutor};
use crate::environment;
use crate::error::{Error, Result};
use crate::git::{self, Identity};
use crate::paths;

use super::types::{WorkflowContext, WorkflowStepType};

pub(crate) struct WorkflowStepExecutor {
    root: PathBuf,
    config: DocshipConfig,
    run_id: String,
    pub(crate) context: Mutex<WorkflowContext>,
}

fn to_data<T: Serialize>(value: &T, context: &str) -> Result<Option<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| Error::internal_json(e.to_string(), Some(context.to_string())))
}

impl WorkflowStepExecutor {
    pub fn new(root: &Path, config: DocshipConfig, run_id: String) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            run_id,
            context: Mutex::new(WorkflowContext::default()),
        }
    }

    pub(crate) fn lock_context(&self) -> Result<MutexGuard<'_, WorkflowContext>> {
        self.context
            .lock()
            .map_err(|_| Error::internal_unexpected("workflow context lock poisoned"))
    }

    fn output_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = self.lock_context()?.output_dir.clone() {
            return Ok(dir);
        }
        Ok(BuildPaths::resolve(&self.root, &self.config.build)?.output_dir)
    }

    fn run_runtime(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        let info = environment::check_runtime(&self.root, &self.config.environment)?;
        crate::log_status!("environment", "{} {}", info.interpreter, info.version);
        Ok(PipelineStepResult::success(step, to_data(&info, "runtime info")?))
    }

    fn run_toolchain(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        let outcome = environment::install_toolchain(&self.root, &self.config.environment)?;
        Ok(PipelineStepResult::success(step, to_data(&outcome, "toolchain install")?))
    }

    fn run_manifest(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        let outcome = environment::install_manifest(&self.root, &self.config.environment)?;
        Ok(PipelineStepResult::success(step, to_data(&outcome, "manifest install")?))
    }

    fn run_project(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        let outcome = environment::install_project(&self.root, &self.config.environment)?;
        Ok(PipelineStepResult::success(step, to_data(&outcome, "project install")?))
    }

    fn run_build(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        let cfg = &self.config.build;
        let reset = build::reset_output(&self.root, cfg)?;
        let output = build::run_build(&self.root, cfg)?;
        let final_dir = build::finalize_output(&self.root, cfg)?;
        self.lock_context()?.output_dir = Some(final_dir.clone());

        Ok(PipelineStepResult::success(
            step,
            Some(serde_json::json!({
                "command": output.command,
                "working_dir": output.working_dir,
                "exit_code": output.exit_code,
                "reset": reset,
                "output_dir": paths::relative_slash(&self.root, &final_dir),
            })),
        ))
    }

    fn run_clean(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        let output_dir = self.output_dir()?;
        let removed = cleanup::prune_and_verify(&output_dir, &self.config.build.prune)?;
        if !removed.is_empty() {
            crate::log_status!("build", "Pruned {} non-publishable entries", removed.len());
        }
        Ok(PipelineStepResult::success(
            step,
            Some(serde_json::json!({ "removed": removed })),
        ))
    }

    fn artifact_stores(&self) -> Result<Vec<Box<dyn ArtifactStore>>> {
        let cfg = &self.config.publish.artifact;
        let mut stores: Vec<Box<dyn ArtifactStore>> = Vec::new();

        // Upload first: a failed upload leaves nothing behind locally.
        if let Some(url) = &cfg.upload_url {
            let token = match &cfg.token_env {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    Error::publish_artifact_failed(
                        format!("Upload token variable {} is not set", var),
                        Some(var.clone()),
                    )
                    .with_hint(format!("Export {} with the upload token", var))
                })?),
                None => None,
            };
            stores.push(Box::new(HttpArtifactStore::new(url, token)?));
        }
        stores.push(Box::new(LocalArtifactStore::new(
            self.config.artifact_store_dir(&self.root),
        )));
        Ok(stores)
    }

    fn run_artifact(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        let output_dir = self.output_dir()?;
        let name = self.config.artifact_name();
        let package = artifact::package(&output_dir, &name, &self.run_id)?;
        let record = artifact::publish(&package, &self.artifact_stores()?)?;

        let data = to_data(&record, "artifact record")?;
        self.lock_context()?.artifact = Some(record);
        Ok(PipelineStepResult::success(step, data))
    }

    fn ensure_repo(&self) -> Result<()> {
        if git::is_git_repo(&self.root) {
            return Ok(());
        }
        Err(Error::git_command_failed(format!(
            "{} is not a git repository",
            self.root.display()
        ))
        .with_hint("The remote-publish pipeline must run inside a checkout"))
    }

    fn run_commit(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        self.ensure_repo()?;
        let remote = &self.config.publish.remote;
        let pathspec = self.config.build.output_dir.as_str();
        let identity = Identity {
            name: remote.author_name.clone(),
            email: remote.author_email.clone(),
        };

        git::stage(&self.root, pathspec)?;
        let outcome = git::commit_as(&self.root, &identity, &remote.message, pathspec)?;
        match &outcome {
            git::CommitOutcome::Committed { sha } => {
                crate::log_status!("publish", "Committed {} as {}", sha, identity.name);
            }
            git::CommitOutcome::NothingToCommit => {
                crate::log_status!("publish", "Output unchanged, nothing to commit");
            }
        }

        let data = to_data(&outcome, "commit outcome")?;
        self.lock_context()?.commit = Some(outcome);
        Ok(PipelineStepResult::success(step, data))
    }

    fn run_push(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        self.ensure_repo()?;
        let remote = &self.config.publish.remote;
        let branch = match &remote.branch {
            Some(branch) => branch.clone(),
            None => git::default_branch(&self.root, &remote.remote)?,
        };

        let output = git::push(&self.root, &remote.remote, &branch)?;
        crate::log_status!("publish", "Pushed to {}/{}", output.remote, output.branch);

        let data = to_data(&output, "push output")?;
        self.lock_context()?.push = Some(output);
        Ok(PipelineStepResult::success(step, data))
    }
}

impl StepExecutor for WorkflowStepExecutor {
    fn execute_step(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
        let step_type = WorkflowStepType::from_str(&step.step_type).ok_or_else(|| {
            Error::validation_invalid_argument(
                "step.type",
                format!("Unknown step type '{}'", step.step_type),
                Some(step.id.clone()),
                None,
            )
        })?;
        tracing::debug!(
            step = %step.id,
            step_type = step_type.as_str(),
            phase = ?step_type.phase(),
            "executing step"
        );

        match step_type {
            WorkflowStepType::Runtime => self.run_runtime(step),
            WorkflowStepType::Toolchain => self.run_toolchain(step),
            WorkflowStepType::Manifest => self.run_manifest(step),
            WorkflowStepType::Project => self.run_project(step),
            WorkflowStepType::Build => self.run_build(step),
            WorkflowStepType::Clean => self.run_clean(step),
            WorkflowStepType::Artifact => self.run_artifact(step),
            WorkflowStepType::Commit => self.run_commit(step),
            WorkflowStepType::Push => self.run_push(step),
        }
    }
}
