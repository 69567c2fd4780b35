use clap::Args;

use docship::workflow::{self, PipelineKind, Stage, WorkflowOptions};

use super::run::RunOutput;
use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct BuildArgs {
    /// Show the plan without building
    #[arg(long)]
    pub dry_run: bool,
}

/// Prepare the environment, build and clean the output. Publishes nothing.
pub fn run(args: BuildArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let project = global.project()?;
    let options = WorkflowOptions {
        dry_run: args.dry_run,
        through: Stage::Build,
    };
    let run = workflow::run(PipelineKind::Artifact, &project.root, &project.config, &options)?;
    let exit_code = run.exit_code;
    Ok((
        RunOutput {
            command: "build",
            run,
        },
        exit_code,
    ))
}
