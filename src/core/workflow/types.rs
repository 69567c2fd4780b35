use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::artifact::ArtifactRecord;
use crate::engine::{PipelinePlanStep, PipelineRunResult};
use crate::git::{CommitOutcome, PushOutput};
use crate::trigger::TriggerEvent;

/// The two documentation pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Build and store the site as a named artifact. Never touches the repository.
    Artifact,
    /// Build, commit the output directory, and push it.
    RemotePublish,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Artifact => "artifact",
            PipelineKind::RemotePublish => "remote_publish",
        }
    }
}

/// How far a run goes. `prepare` and `build` commands stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Build,
    #[default]
    Publish,
}

/// Run state. Only moves forward; `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    NotStarted,
    Preparing,
    Building,
    Publishing,
    Done,
    Failed,
}

impl RunPhase {
    /// Exit code class for a step in this phase that could not run.
    pub(crate) fn missing_exit_code(&self) -> i32 {
        match self {
            RunPhase::Preparing => 10,
            RunPhase::Building => 20,
            RunPhase::Publishing => 30,
            _ => 1,
        }
    }
}

/// Step types understood by the workflow executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkflowStepType {
    Runtime,
    Toolchain,
    Manifest,
    Project,
    Build,
    Clean,
    Artifact,
    Commit,
    Push,
}

impl WorkflowStepType {
    pub(crate) fn from_str(s: &str) -> Option<Self> {
        match s {
            "env.runtime" => Some(Self::Runtime),
            "env.toolchain" => Some(Self::Toolchain),
            "env.manifest" => Some(Self::Manifest),
            "env.project" => Some(Self::Project),
            "docs.build" => Some(Self::Build),
            "docs.clean" => Some(Self::Clean),
            "publish.artifact" => Some(Self::Artifact),
            "publish.commit" => Some(Self::Commit),
            "publish.push" => Some(Self::Push),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "env.runtime",
            Self::Toolchain => "env.toolchain",
            Self::Manifest => "env.manifest",
            Self::Project => "env.project",
            Self::Build => "docs.build",
            Self::Clean => "docs.clean",
            Self::Artifact => "publish.artifact",
            Self::Commit => "publish.commit",
            Self::Push => "publish.push",
        }
    }

    pub(crate) fn phase(&self) -> RunPhase {
        match self {
            Self::Runtime | Self::Toolchain | Self::Manifest | Self::Project => RunPhase::Preparing,
            Self::Build | Self::Clean => RunPhase::Building,
            Self::Artifact | Self::Commit | Self::Push => RunPhase::Publishing,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowOptions {
    pub dry_run: bool,
    #[serde(default)]
    pub through: Stage,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowPlan {
    pub pipeline: PipelineKind,
    pub through: Stage,
    pub steps: Vec<PipelinePlanStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Outcome of one pipeline run (or dry run).
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub pipeline: PipelineKind,
    pub run_id: String,
    pub through: Stage,
    pub dry_run: bool,
    pub phase: RunPhase,
    /// Phase of the step that stopped a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<RunPhase>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<WorkflowPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PipelineRunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<PushOutput>,
}

impl WorkflowRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Pipelines started by one trigger event.
#[derive(Debug, Clone, Serialize)]
pub struct EventRun {
    pub event: TriggerEvent,
    pub pipelines: Vec<PipelineKind>,
    pub runs: Vec<WorkflowRun>,
    pub exit_code: i32,
}

/// State carried between steps of a single run.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkflowContext {
    pub output_dir: Option<PathBuf>,
    pub artifact: Option<ArtifactRecord>,
    pub commit: Option<CommitOutcome>,
    pub push: Option<PushOutput>,
}
