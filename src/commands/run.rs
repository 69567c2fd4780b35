use clap::{Args, ValueEnum};
use serde::Serialize;

use docship::workflow::{self, PipelineKind, Stage, WorkflowOptions, WorkflowRun};

use super::{CmdResult, GlobalArgs};

/// Pipeline names as typed on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PipelineArg {
    /// Build and store the site as a named artifact
    Artifact,
    /// Build, commit the output directory and push it
    Publish,
}

impl From<PipelineArg> for PipelineKind {
    fn from(arg: PipelineArg) -> Self {
        match arg {
            PipelineArg::Artifact => PipelineKind::Artifact,
            PipelineArg::Publish => PipelineKind::RemotePublish,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline to run
    #[arg(value_enum)]
    pub pipeline: PipelineArg,

    /// Show the plan without executing any step
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub command: &'static str,
    #[serde(flatten)]
    pub run: WorkflowRun,
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let project = global.project()?;
    let options = WorkflowOptions {
        dry_run: args.dry_run,
        through: Stage::Publish,
    };
    let run = workflow::run(args.pipeline.into(), &project.root, &project.config, &options)?;
    let exit_code = run.exit_code;
    Ok((
        RunOutput {
            command: "run",
            run,
        },
        exit_code,
    ))
}
