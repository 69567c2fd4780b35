use clap::Args;
use serde::Serialize;

use docship::workflow::{self, Stage, WorkflowOptions, WorkflowPlan};

use super::run::PipelineArg;
use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct PlanArgs {
    /// Pipeline to plan
    #[arg(value_enum)]
    pub pipeline: PipelineArg,
}

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub command: &'static str,
    #[serde(flatten)]
    pub plan: WorkflowPlan,
}

pub fn run(args: PlanArgs, global: &GlobalArgs) -> CmdResult<PlanOutput> {
    let project = global.project()?;
    let options = WorkflowOptions {
        dry_run: true,
        through: Stage::Publish,
    };
    let plan = workflow::plan(args.pipeline.into(), &project.root, &project.config, &options)?;
    Ok((
        PlanOutput {
            command: "plan",
            plan,
        },
        0,
    ))
}
