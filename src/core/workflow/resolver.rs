use std::path::{Path, PathBuf};

use crate::config::DocshipConfig;
use crate::engine::StepCapabilityResolver;
use crate::utils::command;

use super::types::WorkflowStepType;

/// Words that are shell syntax rather than programs on `PATH`.
const SHELL_BUILTINS: &[&str] = &[
    "cd", "exec", "export", "set", "source", ".", ":", "eval", "unset", "test", "[", "if", "for",
    "while", "true", "false", "echo",
];

/// Checks that the external tools each step shells out to can be found.
pub(crate) struct WorkflowCapabilityResolver {
    root: PathBuf,
    interpreter: String,
    build_command: String,
}

impl WorkflowCapabilityResolver {
    pub fn new(root: &Path, config: &DocshipConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            interpreter: config.environment.interpreter.clone(),
            build_command: config.build.command.clone(),
        }
    }

    fn program_available(&self, program: &str) -> bool {
        if program.contains('/') {
            let path = Path::new(program);
            return if path.is_absolute() {
                path.is_file()
            } else {
                self.root.join(path).is_file()
            };
        }
        command::find_program(program).is_some()
    }

    /// The program a build command starts with, when it is a plain word.
    fn build_program(&self) -> Option<&str> {
        let first = self.build_command.split_whitespace().next()?;
        if first.contains('=') || first.contains('/') || SHELL_BUILTINS.contains(&first) {
            return None;
        }
        Some(first)
    }

    fn shell(&self) -> &'static str {
        if cfg!(windows) {
            "cmd"
        } else {
            "sh"
        }
    }

    fn required_tools(&self, step_type: WorkflowStepType) -> Vec<String> {
        match step_type {
            WorkflowStepType::Runtime
            | WorkflowStepType::Toolchain
            | WorkflowStepType::Manifest
            | WorkflowStepType::Project => vec![self.interpreter.clone()],
            WorkflowStepType::Build => {
                let mut tools = vec![self.shell().to_string()];
                if let Some(program) = self.build_program() {
                    tools.push(program.to_string());
                }
                tools
            }
            WorkflowStepType::Commit | WorkflowStepType::Push => vec!["git".to_string()],
            WorkflowStepType::Clean | WorkflowStepType::Artifact => Vec::new(),
        }
    }
}

impl StepCapabilityResolver for WorkflowCapabilityResolver {
    fn is_supported(&self, step_type: &str) -> bool {
        self.missing(step_type).is_empty()
    }

    fn missing(&self, step_type: &str) -> Vec<String> {
        let Some(step_type) = WorkflowStepType::from_str(step_type) else {
            return vec![format!("Unknown step type '{}'", step_type)];
        };
        self.required_tools(step_type)
            .into_iter()
            .filter(|tool| !self.program_available(tool))
            .map(|tool| format!("'{}' not found on PATH", tool))
            .collect()
    }
}
