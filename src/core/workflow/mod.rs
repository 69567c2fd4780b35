//! The two documentation pipelines on top of the generic engine.
//!
//! Both share the environment and build stages; they differ only in the
//! publisher. Runs are strictly sequential and stop at the first failure.

mod executor;
mod plan;
mod resolver;
mod types;

pub use plan::{plan, run, run_for_event, steps_for};
pub use types::{
    EventRun, PipelineKind, RunPhase, Stage, WorkflowOptions, WorkflowPlan, WorkflowRun,
};
