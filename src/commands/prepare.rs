use clap::Args;

use docship::workflow::{self, PipelineKind, Stage, WorkflowOptions};

use super::run::RunOutput;
use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct PrepareArgs {
    /// Show the plan without installing anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Check the runtime and install the toolchain, manifest and project.
pub fn run(args: PrepareArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let project = global.project()?;
    let options = WorkflowOptions {
        dry_run: args.dry_run,
        through: Stage::Prepare,
    };
    let run = workflow::run(PipelineKind::Artifact, &project.root, &project.config, &options)?;
    let exit_code = run.exit_code;
    Ok((
        RunOutput {
            command: "prepare",
            run,
        },
        exit_code,
    ))
}
