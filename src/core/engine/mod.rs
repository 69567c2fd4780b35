//! Generic step pipeline.
//!
//! - `pipeline` - step model, dependency ordering, sequential fail-fast run
//!
//! The documentation workflows in `workflow` are built on these primitives.

pub mod pipeline;

pub use pipeline::{
    PipelinePlan, PipelinePlanStep, PipelineRunResult, PipelineRunStatus, PipelineRunSummary,
    PipelineStep, PipelineStepResult, PipelineStepStatus, StepCapabilityResolver, StepExecutor,
};
