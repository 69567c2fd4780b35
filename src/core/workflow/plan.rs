use std::path::Path;

use chrono::Utc;

use crate::artifact;
use crate::config::DocshipConfig;
use crate::engine::{self, PipelineRunResult, PipelineRunStatus, PipelineStep};
use crate::error::Result;
use crate::trigger::{self, TriggerEvent};

use super::executor::WorkflowStepExecutor;
use super::resolver::WorkflowCapabilityResolver;
use super::types::{
    EventRun, PipelineKind, RunPhase, Stage, WorkflowOptions, WorkflowPlan, WorkflowRun,
    WorkflowStepType,
};

const STEPS_FIELD: &str = "workflow.steps";

/// The linear step list for a pipeline, cut off after `through`.
///
/// Environment: runtime, toolchain, manifest, project.
/// Build: build, clean.
/// Publish: artifact, or commit then push.
pub fn steps_for(kind: PipelineKind, config: &DocshipConfig, through: Stage) -> Vec<PipelineStep> {
    let env = &config.environment;
    let mut steps = vec![
        PipelineStep::new("runtime", "env.runtime", "Check runtime version").with_config(
            "interpreter",
            serde_json::json!({ "program": env.interpreter, "version": env.version }),
        ),
        PipelineStep::new("toolchain", "env.toolchain", "Install documentation toolchain")
            .after("runtime")
            .with_config("packages", serde_json::json!(env.toolchain)),
        PipelineStep::new("manifest", "env.manifest", "Install project dependencies")
            .after("toolchain")
            .with_config("manifest", serde_json::json!(env.manifest)),
        PipelineStep::new("project", "env.project", "Install project")
            .after("manifest")
            .with_config("editable", serde_json::json!(env.editable)),
    ];
    if through == Stage::Prepare {
        return steps;
    }

    let build = &config.build;
    steps.push(
        PipelineStep::new("build", "docs.build", "Build documentation")
            .after("project")
            .with_config("command", serde_json::json!(build.command))
            .with_config("output_dir", serde_json::json!(build.output_dir)),
    );
    steps.push(
        PipelineStep::new("clean", "docs.clean", "Remove non-publishable files")
            .after("build")
            .with_config("prune", serde_json::json!(build.prune)),
    );
    if through == Stage::Build {
        return steps;
    }

    match kind {
        PipelineKind::Artifact => {
            let artifact = &config.publish.artifact;
            steps.push(
                PipelineStep::new("artifact", "publish.artifact", "Store build artifact")
                    .after("clean")
                    .with_config("name", serde_json::json!(config.artifact_name()))
                    .with_config("store", serde_json::json!(artifact.store))
                    .with_config("upload_url", serde_json::json!(artifact.upload_url)),
            );
        }
        PipelineKind::RemotePublish => {
            let remote = &config.publish.remote;
            steps.push(
                PipelineStep::new("commit", "publish.commit", "Commit output directory")
                    .after("clean")
                    .with_config("path", serde_json::json!(build.output_dir))
                    .with_config(
                        "author",
                        serde_json::json!(format!("{} <{}>", remote.author_name, remote.author_email)),
                    ),
            );
            steps.push(
                PipelineStep::new("push", "publish.push", "Push to remote")
                    .after("commit")
                    .with_config("remote", serde_json::json!(remote.remote))
                    .with_config("branch", serde_json::json!(remote.branch)),
            );
        }
    }
    steps
}

/// Plan a pipeline with the capability status of every step. Executes nothing.
pub fn plan(
    kind: PipelineKind,
    root: &Path,
    config: &DocshipConfig,
    options: &WorkflowOptions,
) -> Result<WorkflowPlan> {
    let steps = steps_for(kind, config, options.through);
    let resolver = WorkflowCapabilityResolver::new(root, config);
    let planned = engine::pipeline::plan(&steps, &resolver, true, STEPS_FIELD)?;

    Ok(WorkflowPlan {
        pipeline: kind,
        through: options.through,
        steps: planned.steps,
        warnings: planned.warnings,
    })
}

/// Run a pipeline. What a dry run previews is exactly what runs.
///
/// Step failures do not return `Err`: they end the run with phase `failed`
/// and a non-zero `exit_code`. `Err` is reserved for an invalid plan.
pub fn run(
    kind: PipelineKind,
    root: &Path,
    config: &DocshipConfig,
    options: &WorkflowOptions,
) -> Result<WorkflowRun> {
    let run_id = artifact::new_run_id();
    let started_at = Utc::now();
    let workflow_plan = plan(kind, root, config, options)?;

    if options.dry_run {
        return Ok(WorkflowRun {
            pipeline: kind,
            run_id,
            through: options.through,
            dry_run: true,
            phase: RunPhase::NotStarted,
            failed_in: None,
            started_at,
            finished_at: None,
            exit_code: 0,
            plan: Some(workflow_plan),
            result: None,
            output_dir: None,
            artifact: None,
            commit: None,
            push: None,
        });
    }

    crate::log_status!("docship", "Starting {} pipeline (run {})", kind.as_str(), run_id);
    tracing::info!(pipeline = kind.as_str(), %run_id, root = %root.display(), "pipeline started");

    let steps = steps_for(kind, config, options.through);
    let resolver = WorkflowCapabilityResolver::new(root, config);
    let executor = WorkflowStepExecutor::new(root, config.clone(), run_id.clone());
    let result = engine::pipeline::run(&steps, &executor, &resolver, STEPS_FIELD)?;

    let ctx = executor.lock_context()?.clone();
    let exit_code = exit_code_for(&result);
    let failed_in = failed_phase(&result);
    let phase = if result.status == PipelineRunStatus::Success {
        RunPhase::Done
    } else {
        RunPhase::Failed
    };

    match result.first_failure() {
        Some(failed) => crate::log_status!(
            "docship",
            "{} pipeline failed at '{}': {}",
            kind.as_str(),
            failed.id,
            failed.error.as_deref().unwrap_or("unknown error")
        ),
        None => crate::log_status!("docship", "{} pipeline finished", kind.as_str()),
    }
    tracing::info!(
        pipeline = kind.as_str(),
        %run_id,
        exit_code,
        ?phase,
        ?failed_in,
        "pipeline finished"
    );

    Ok(WorkflowRun {
        pipeline: kind,
        run_id,
        through: options.through,
        dry_run: false,
        phase,
        failed_in,
        started_at,
        finished_at: Some(Utc::now()),
        exit_code,
        plan: None,
        result: Some(result),
        output_dir: ctx.output_dir,
        artifact: ctx.artifact,
        commit: ctx.commit,
        push: ctx.push,
    })
}

/// Exit code of a finished run: 0, or the class of the step that stopped it.
pub(crate) fn exit_code_for(result: &PipelineRunResult) -> i32 {
    let Some(step) = result.first_failure() else {
        return 0;
    };
    if let Some(err) = &step.failure {
        return err.code.exit_code();
    }
    failed_phase(result).map_or(1, |phase| phase.missing_exit_code())
}

/// Phase of the step that stopped the run, if any did.
fn failed_phase(result: &PipelineRunResult) -> Option<RunPhase> {
    let step = result.first_failure()?;
    WorkflowStepType::from_str(&step.step_type).map(|t| t.phase())
}

/// Run the pipelines an event starts, stopping at the first failure.
pub fn run_for_event(
    event: TriggerEvent,
    root: &Path,
    config: &DocshipConfig,
    options: &WorkflowOptions,
) -> Result<EventRun> {
    let pipelines = trigger::pipelines_for(&event, &config.triggers.primary_branch);
    if pipelines.is_empty() {
        crate::log_status!(
            "docship",
            "No pipeline runs for {} (primary branch is '{}')",
            event.name(),
            config.triggers.primary_branch
        );
    }

    let mut runs = Vec::with_capacity(pipelines.len());
    let mut exit_code = 0;
    for kind in &pipelines {
        let workflow_run = run(*kind, root, config, options)?;
        exit_code = workflow_run.exit_code;
        runs.push(workflow_run);
        if exit_code != 0 {
            break;
        }
    }

    Ok(EventRun {
        event,
        pipelines,
        runs,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(steps: &[PipelineStep]) -> Vec<&str> {
        steps.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn artifact_pipeline_steps() {
        let steps = steps_for(PipelineKind::Artifact, &DocshipConfig::default(), Stage::Publish);
        assert_eq!(
            ids(&steps),
            vec!["runtime", "toolchain", "manifest", "project", "build", "clean", "artifact"]
        );
        assert!(engine::pipeline::plan_run(&steps, STEPS_FIELD).is_ok());
    }

    #[test]
    fn remote_publish_pipeline_steps() {
        let steps = steps_for(
            PipelineKind::RemotePublish,
            &DocshipConfig::default(),
            Stage::Publish,
        );
        assert_eq!(
            ids(&steps),
            vec!["runtime", "toolchain", "manifest", "project", "build", "clean", "commit", "push"]
        );
        assert_eq!(steps[7].needs, vec!["commit"]);
    }

    #[test]
    fn stages_cut_the_pipeline_short() {
        let config = DocshipConfig::default();
        assert_eq!(steps_for(PipelineKind::Artifact, &config, Stage::Prepare).len(), 4);
        assert_eq!(steps_for(PipelineKind::RemotePublish, &config, Stage::Build).len(), 6);
    }

    #[test]
    fn dry_run_executes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = WorkflowOptions {
            dry_run: true,
            through: Stage::Publish,
        };
        let run = run(PipelineKind::Artifact, dir.path(), &DocshipConfig::default(), &options).unwrap();
        assert!(run.dry_run);
        assert_eq!(run.phase, RunPhase::NotStarted);
        assert_eq!(run.failed_in, None);
        assert!(run.result.is_none());
        assert_eq!(run.plan.unwrap().steps.len(), 7);
        assert!(!dir.path().join("docs").exists());
    }

    #[test]
    fn missing_interpreter_fails_in_preparing_class() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = DocshipConfig::default();
        config.environment.interpreter = "docship-no-such-python".to_string();

        let run = run(PipelineKind::Artifact, dir.path(), &config, &WorkflowOptions::default()).unwrap();
        assert_eq!(run.phase, RunPhase::Failed);
        assert_eq!(run.failed_in, Some(RunPhase::Preparing));
        assert_eq!(run.exit_code, 10);
        let result = run.result.unwrap();
        assert_eq!(result.status, PipelineRunStatus::Missing);
        assert_eq!(result.summary.unwrap().skipped, 6);
    }

    #[test]
    fn non_primary_push_runs_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let event = TriggerEvent::Push {
            branch: "feature".to_string(),
        };
        let event_run = run_for_event(
            event,
            dir.path(),
            &DocshipConfig::default(),
            &WorkflowOptions::default(),
        )
        .unwrap();
        assert!(event_run.pipelines.is_empty());
        assert!(event_run.runs.is_empty());
        assert_eq!(event_run.exit_code, 0);
    }
}
