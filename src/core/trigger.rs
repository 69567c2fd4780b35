//! Which pipeline an external event starts.

use serde::{Deserialize, Serialize};

use crate::workflow::PipelineKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    Push { branch: String },
    PullRequest { base: String },
    Release,
    Manual,
}

impl TriggerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::PullRequest { .. } => "pull_request",
            TriggerEvent::Release => "release",
            TriggerEvent::Manual => "manual",
        }
    }
}

/// Pipelines started by `event`, in execution order.
///
/// Pushes and pull requests only count when they target the primary branch;
/// they never publish to the remote.
pub fn pipelines_for(event: &TriggerEvent, primary_branch: &str) -> Vec<PipelineKind> {
    match event {
        TriggerEvent::Push { branch } if branch_matches(branch, primary_branch) => {
            vec![PipelineKind::Artifact]
        }
        TriggerEvent::PullRequest { base } if branch_matches(base, primary_branch) => {
            vec![PipelineKind::Artifact]
        }
        TriggerEvent::Release | TriggerEvent::Manual => vec![PipelineKind::RemotePublish],
        _ => Vec::new(),
    }
}

/// CI systems report either `main` or `refs/heads/main`.
fn branch_matches(branch: &str, primary: &str) -> bool {
    branch.strip_prefix("refs/heads/").unwrap_or(branch) == primary
}
