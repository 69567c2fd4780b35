use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Hint, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
}

impl PipelineStep {
    pub fn new(id: &str, step_type: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            step_type: step_type.to_string(),
            label: Some(label.to_string()),
            needs: Vec::new(),
            config: HashMap::new(),
        }
    }

    pub fn after(mut self, id: &str) -> Self {
        self.needs.push(id.to_string());
        self
    }

    pub fn with_config(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    pub steps: Vec<PipelinePlanStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlanStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
    pub status: PipelineStepStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStepStatus {
    Ready,
    Missing,
    Disabled,
}

/// Decides whether the tools a step type needs are available.
pub trait StepCapabilityResolver {
    fn is_supported(&self, step_type: &str) -> bool;
    fn missing(&self, step_type: &str) -> Vec<String>;
}

pub trait StepExecutor {
    fn execute_step(&self, step: &PipelineStep) -> Result<PipelineStepResult>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStepResult {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: PipelineRunStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub elapsed_ms: u64,
    /// The full error behind a failed step, for exit-code mapping.
    #[serde(skip)]
    pub failure: Option<Error>,
}

impl PipelineStepResult {
    pub fn success(step: &PipelineStep, data: Option<serde_json::Value>) -> Self {
        Self::with_status(step, PipelineRunStatus::Success, data)
    }

    fn with_status(
        step: &PipelineStep,
        status: PipelineRunStatus,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: step.id.clone(),
            step_type: step.step_type.clone(),
            status,
            missing: Vec::new(),
            warnings: Vec::new(),
            hints: Vec::new(),
            data,
            error: None,
            error_code: None,
            elapsed_ms: 0,
            failure: None,
        }
    }

    fn skipped(step: &PipelineStep, reason: String) -> Self {
        let mut result = Self::with_status(step, PipelineRunStatus::Skipped, None);
        result.warnings.push(reason);
        result
    }

    fn failed(step: &PipelineStep, err: Error) -> Self {
        let mut result = Self::with_status(step, PipelineRunStatus::Failed, None);
        result.hints = err.hints.clone();
        result.error = Some(err.message.clone());
        result.error_code = Some(err.code.as_str().to_string());
        result.failure = Some(err);
        result
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunResult {
    pub steps: Vec<PipelineStepResult>,
    pub status: PipelineRunStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<PipelineRunSummary>,
}

impl PipelineRunResult {
    /// The step that stopped the run, if any.
    pub fn first_failure(&self) -> Option<&PipelineStepResult> {
        self.steps.iter().find(|step| {
            matches!(
                step.status,
                PipelineRunStatus::Failed | PipelineRunStatus::Missing
            )
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunSummary {
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub missing: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    Success,
    Failed,
    Skipped,
    Missing,
}

pub fn plan(
    steps: &[PipelineStep],
    resolver: &dyn StepCapabilityResolver,
    enabled: bool,
    field: &str,
) -> Result<PipelinePlan> {
    let (ordered, warnings) = order_steps(steps, field)?;
    let planned_steps = ordered
        .into_iter()
        .map(|step| to_plan_step(step, resolver, enabled))
        .collect();

    Ok(PipelinePlan {
        steps: planned_steps,
        warnings,
    })
}

/// Validate ids and dependencies and return steps in execution order.
pub fn plan_run(steps: &[PipelineStep], field: &str) -> Result<Vec<PipelineStep>> {
    order_steps(steps, field).map(|(ordered, _)| ordered)
}

/// Kahn's algorithm. Ties keep declaration order, so a linear pipeline runs
/// exactly as declared.
fn order_steps(steps: &[PipelineStep], field: &str) -> Result<(Vec<PipelineStep>, Vec<String>)> {
    let mut id_index = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        if id_index.insert(step.id.clone(), idx).is_some() {
            return Err(Error::validation_invalid_argument(
                field,
                format!("Duplicate step id '{}'", step.id),
                None,
                None,
            ));
        }
    }

    let mut indegree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (idx, step) in steps.iter().enumerate() {
        for need in &step.needs {
            let Some(&parent_idx) = id_index.get(need) else {
                return Err(Error::validation_invalid_argument(
                    field,
                    format!("Step '{}' depends on unknown step '{}'", step.id, need),
                    None,
                    None,
                ));
            };
            indegree[idx] += 1;
            dependents[parent_idx].push(idx);
        }
    }

    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(steps.len());
    while let Some(idx) = queue.pop_front() {
        ordered.push(steps[idx].clone());
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if ordered.len() != steps.len() {
        let pending: Vec<String> = steps
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, step)| step.id.clone())
            .collect();
        return Err(Error::validation_invalid_argument(
            field,
            "Steps contain a cycle".to_string(),
            None,
            Some(pending),
        ));
    }

    let mut warnings = Vec::new();
    let reordered = ordered
        .iter()
        .zip(steps.iter())
        .any(|(a, b)| a.id != b.id);
    if reordered {
        warnings.push("Steps reordered based on dependencies".to_string());
    }

    Ok((ordered, warnings))
}

fn to_plan_step(
    step: PipelineStep,
    resolver: &dyn StepCapabilityResolver,
    enabled: bool,
) -> PipelinePlanStep {
    let (status, missing) = if !enabled {
        (PipelineStepStatus::Disabled, Vec::new())
    } else if resolver.is_supported(&step.step_type) {
        (PipelineStepStatus::Ready, Vec::new())
    } else {
        (
            PipelineStepStatus::Missing,
            resolver.missing(&step.step_type),
        )
    };

    PipelinePlanStep {
        id: step.id,
        step_type: step.step_type,
        label: step.label,
        needs: step.needs,
        config: step.config,
        status,
        missing,
    }
}

/// Execute steps one at a time in dependency order.
///
/// The first step that fails or is missing a tool halts the run: every later
/// step is reported as skipped and never reaches the executor.
pub fn run(
    steps: &[PipelineStep],
    executor: &dyn StepExecutor,
    resolver: &dyn StepCapabilityResolver,
    field: &str,
) -> Result<PipelineRunResult> {
    let (ordered, warnings) = order_steps(steps, field)?;
    let mut results: Vec<PipelineStepResult> = Vec::with_capacity(ordered.len());
    let mut statuses: HashMap<String, PipelineRunStatus> = HashMap::new();
    let mut halted_by: Option<String> = None;

    for step in ordered {
        let result = if let Some(failed) = &halted_by {
            PipelineStepResult::skipped(&step, format!("Skipped because '{}' failed", failed))
        } else if let Some(dep) = step
            .needs
            .iter()
            .find(|need| statuses.get(*need) != Some(&PipelineRunStatus::Success))
        {
            PipelineStepResult::skipped(&step, format!("Skipped because '{}' did not succeed", dep))
        } else {
            execute_single_step(&step, executor, resolver)
        };

        if matches!(
            result.status,
            PipelineRunStatus::Failed | PipelineRunStatus::Missing
        ) && halted_by.is_none()
        {
            halted_by = Some(step.id.clone());
        }
        statuses.insert(step.id.clone(), result.status);
        results.push(result);
    }

    let status = derive_overall_status(&results);
    let summary = build_summary(&results, &status);

    Ok(PipelineRunResult {
        steps: results,
        status,
        warnings,
        summary: Some(summary),
    })
}

fn derive_overall_status(results: &[PipelineStepResult]) -> PipelineRunStatus {
    if results
        .iter()
        .any(|result| result.status == PipelineRunStatus::Failed)
    {
        return PipelineRunStatus::Failed;
    }
    if results
        .iter()
        .any(|result| result.status == PipelineRunStatus::Missing)
    {
        return PipelineRunStatus::Missing;
    }
    if !results.is_empty()
        && results
            .iter()
            .all(|result| result.status == PipelineRunStatus::Skipped)
    {
        return PipelineRunStatus::Skipped;
    }
    PipelineRunStatus::Success
}

fn build_summary(results: &[PipelineStepResult], status: &PipelineRunStatus) -> PipelineRunSummary {
    let count = |wanted: PipelineRunStatus| results.iter().filter(|r| r.status == wanted).count();

    let next_actions = match status {
        PipelineRunStatus::Failed => vec![
            "Fix the reported error and re-run the pipeline (completed steps are safe to repeat)"
                .to_string(),
        ],
        PipelineRunStatus::Missing => {
            vec!["Install the missing tools and re-run the pipeline".to_string()]
        }
        _ => Vec::new(),
    };

    PipelineRunSummary {
        total_steps: results.len(),
        succeeded: count(PipelineRunStatus::Success),
        failed: count(PipelineRunStatus::Failed),
        skipped: count(PipelineRunStatus::Skipped),
        missing: count(PipelineRunStatus::Missing),
        next_actions,
    }
}

fn execute_single_step(
    step: &PipelineStep,
    executor: &dyn StepExecutor,
    resolver: &dyn StepCapabilityResolver,
) -> PipelineStepResult {
    if !resolver.is_supported(&step.step_type) {
        let mut result = PipelineStepResult::with_status(step, PipelineRunStatus::Missing, None);
        result.missing = resolver.missing(&step.step_type);
        result.error = Some(format!(
            "Missing required tools: {}",
            result.missing.join(", ")
        ));
        return result;
    }

    let started = Instant::now();
    let mut result = match executor.execute_step(step) {
        Ok(mut result) => {
            if result.status == PipelineRunStatus::Success {
                result.missing = Vec::new();
                result.error = None;
            }
            result
        }
        Err(err) => PipelineStepResult::failed(step, err),
    };
    result.elapsed_ms = started.elapsed().as_millis() as u64;

    tracing::debug!(
        step = %step.id,
        status = ?result.status,
        elapsed_ms = result.elapsed_ms,
        "step finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    struct Recorder {
        calls: RefCell<Vec<String>>,
        fail: HashSet<String>,
    }

    impl Recorder {
        fn failing(ids: &[&str]) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail: ids.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl StepExecutor for Recorder {
        fn execute_step(&self, step: &PipelineStep) -> Result<PipelineStepResult> {
            self.calls.borrow_mut().push(step.id.clone());
            if self.fail.contains(&step.id) {
                return Err(Error::build_output_missing("docs/_build/html"));
            }
            Ok(PipelineStepResult::success(step, None))
        }
    }

    struct Tools(HashSet<&'static str>);

    impl StepCapabilityResolver for Tools {
        fn is_supported(&self, step_type: &str) -> bool {
            !self.0.contains(step_type)
        }
        fn missing(&self, step_type: &str) -> Vec<String> {
            vec![format!("tool for {}", step_type)]
        }
    }

    fn all_tools() -> Tools {
        Tools(HashSet::new())
    }

    fn linear() -> Vec<PipelineStep> {
        vec![
            PipelineStep::new("prepare", "env.project", "Prepare"),
            PipelineStep::new("build", "docs.build", "Build").after("prepare"),
            PipelineStep::new("publish", "publish.artifact", "Publish").after("build"),
        ]
    }

    #[test]
    fn runs_in_declared_order_when_linear() {
        let exec = Recorder::failing(&[]);
        let result = run(&linear(), &exec, &all_tools(), "steps").unwrap();
        assert_eq!(result.status, PipelineRunStatus::Success);
        assert_eq!(*exec.calls.borrow(), vec!["prepare", "build", "publish"]);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn orders_by_dependencies() {
        let steps = vec![
            PipelineStep::new("publish", "publish.artifact", "Publish").after("build"),
            PipelineStep::new("build", "docs.build", "Build"),
        ];
        let ordered = plan_run(&steps, "steps").unwrap();
        let ids: Vec<&str> = ordered.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["build", "publish"]);
    }

    #[test]
    fn first_failure_skips_everything_after() {
        let exec = Recorder::failing(&["prepare"]);
        let result = run(&linear(), &exec, &all_tools(), "steps").unwrap();

        assert_eq!(result.status, PipelineRunStatus::Failed);
        assert_eq!(*exec.calls.borrow(), vec!["prepare"]);
        assert_eq!(result.steps[1].status, PipelineRunStatus::Skipped);
        assert_eq!(result.steps[2].status, PipelineRunStatus::Skipped);
        assert_eq!(result.first_failure().unwrap().id, "prepare");
        assert_eq!(
            result.steps[0].error_code.as_deref(),
            Some("build.output_missing")
        );

        let summary = result.summary.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.next_actions.len(), 1);
    }

    #[test]
    fn fail_fast_also_covers_steps_without_needs() {
        let steps = vec![
            PipelineStep::new("a", "env.runtime", "A"),
            PipelineStep::new("b", "env.toolchain", "B"),
        ];
        let exec = Recorder::failing(&["a"]);
        let result = run(&steps, &exec, &all_tools(), "steps").unwrap();
        assert_eq!(*exec.calls.borrow(), vec!["a"]);
        assert_eq!(result.steps[1].status, PipelineRunStatus::Skipped);
    }

    #[test]
    fn missing_tool_halts_without_executing() {
        let exec = Recorder::failing(&[]);
        let tools = Tools(["docs.build"].into_iter().collect());
        let result = run(&linear(), &exec, &tools, "steps").unwrap();

        assert_eq!(result.status, PipelineRunStatus::Missing);
        assert_eq!(*exec.calls.borrow(), vec!["prepare"]);
        assert_eq!(result.steps[1].missing, vec!["tool for docs.build"]);
        assert_eq!(result.steps[2].status, PipelineRunStatus::Skipped);
    }

    #[test]
    fn rejects_duplicates_unknown_needs_and_cycles() {
        let dup = vec![
            PipelineStep::new("a", "x", "A"),
            PipelineStep::new("a", "x", "A"),
        ];
        assert!(plan_run(&dup, "steps").is_err());

        let unknown = vec![PipelineStep::new("a", "x", "A").after("ghost")];
        assert!(plan_run(&unknown, "steps").is_err());

        let cycle = vec![
            PipelineStep::new("a", "x", "A").after("b"),
            PipelineStep::new("b", "x", "B").after("a"),
        ];
        let err = plan_run(&cycle, "steps").unwrap_err();
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn plan_reports_missing_and_disabled() {
        let tools = Tools(["publish.artifact"].into_iter().collect());
        let planned = plan(&linear(), &tools, true, "steps").unwrap();
        assert_eq!(planned.steps[0].status, PipelineStepStatus::Ready);
        assert_eq!(planned.steps[2].status, PipelineStepStatus::Missing);

        let disabled = plan(&linear(), &tools, false, "steps").unwrap();
        assert!(disabled
            .steps
            .iter()
            .all(|s| s.status == PipelineStepStatus::Disabled));
    }
}
