use clap::{Args, ValueEnum};
use serde::Serialize;

use docship::trigger::TriggerEvent;
use docship::workflow::{self, EventRun, Stage, WorkflowOptions};

use super::{CmdResult, GlobalArgs};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EventArg {
    Push,
    PullRequest,
    Release,
    Manual,
}

#[derive(Args)]
pub struct OnArgs {
    /// Event that occurred
    #[arg(value_enum)]
    pub event: EventArg,

    /// Branch pushed to, or the pull request's base branch
    #[arg(long, env = "DOCSHIP_BRANCH")]
    pub branch: Option<String>,

    /// Show the plans without executing any step
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct OnOutput {
    pub command: &'static str,
    #[serde(flatten)]
    pub event_run: EventRun,
}

fn event_for(args: &OnArgs) -> docship::Result<TriggerEvent> {
    let branch = || {
        args.branch
            .clone()
            .ok_or_else(|| docship::Error::validation_missing_argument(vec!["--branch".to_string()]))
    };
    Ok(match args.event {
        EventArg::Push => TriggerEvent::Push { branch: branch()? },
        EventArg::PullRequest => TriggerEvent::PullRequest { base: branch()? },
        EventArg::Release => TriggerEvent::Release,
        EventArg::Manual => TriggerEvent::Manual,
    })
}

pub fn run(args: OnArgs, global: &GlobalArgs) -> CmdResult<OnOutput> {
    let event = event_for(&args)?;
    let project = global.project()?;
    let options = WorkflowOptions {
        dry_run: args.dry_run,
        through: Stage::Publish,
    };
    let event_run = workflow::run_for_event(event, &project.root, &project.config, &options)?;
    let exit_code = event_run.exit_code;
    Ok((
        OnOutput {
            command: "on",
            event_run,
        },
        exit_code,
    ))
}
