use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidToml,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    EnvironmentRuntimeMismatch,
    EnvironmentInstallFailed,
    EnvironmentManifestInvalid,

    BuildCommandFailed,
    BuildOutputMissing,
    BuildOutputUnclean,

    PublishArtifactFailed,
    PublishPushRejected,

    GitCommandFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidToml => "config.invalid_toml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::EnvironmentRuntimeMismatch => "environment.runtime_mismatch",
            ErrorCode::EnvironmentInstallFailed => "environment.install_failed",
            ErrorCode::EnvironmentManifestInvalid => "environment.manifest_invalid",

            ErrorCode::BuildCommandFailed => "build.command_failed",
            ErrorCode::BuildOutputMissing => "build.output_missing",
            ErrorCode::BuildOutputUnclean => "build.output_unclean",

            ErrorCode::PublishArtifactFailed => "publish.artifact_failed",
            ErrorCode::PublishPushRejected => "publish.push_rejected",

            ErrorCode::GitCommandFailed => "git.command_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::ConfigMissingKey
            | ErrorCode::ConfigInvalidToml
            | ErrorCode::ConfigInvalidValue
            | ErrorCode::ValidationMissingArgument
            | ErrorCode::ValidationInvalidArgument => 2,

            ErrorCode::EnvironmentRuntimeMismatch
            | ErrorCode::EnvironmentInstallFailed
            | ErrorCode::EnvironmentManifestInvalid => 10,

            ErrorCode::BuildCommandFailed
            | ErrorCode::BuildOutputMissing
            | ErrorCode::BuildOutputUnclean => 20,

            ErrorCode::PublishArtifactFailed
            | ErrorCode::PublishPushRejected
            | ErrorCode::GitCommandFailed => 30,

            ErrorCode::InternalIoError
            | ErrorCode::InternalJsonError
            | ErrorCode::InternalUnexpected => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidTomlDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMismatchDetails {
    pub interpreter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<String>,
}

/// Details for any external command that exited non-zero.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output_tail: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputUncleanDetails {
    pub output_dir: String,
    pub offending: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRejectedDetails {
    pub remote: String,
    pub branch: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            to_details(ConfigMissingKeyDetails {
                key: key.into(),
                path,
            }),
        )
    }

    pub fn config_invalid_toml(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidToml,
            "Invalid TOML in configuration",
            to_details(ConfigInvalidTomlDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for '{}': {}", key, problem),
            to_details(ConfigInvalidValueDetails {
                key,
                value,
                problem,
            }),
        )
    }

    pub fn environment_runtime_mismatch(
        interpreter: impl Into<String>,
        required: Option<String>,
        found: Option<String>,
    ) -> Self {
        let interpreter = interpreter.into();
        let message = match (&required, &found) {
            (Some(req), Some(found)) => format!(
                "Runtime '{}' is version {}, but {} is required",
                interpreter, found, req
            ),
            (_, None) => format!("Runtime '{}' is not available", interpreter),
            (None, Some(found)) => format!(
                "Runtime '{}' reported an unrecognized version: {}",
                interpreter, found
            ),
        };
        Self::new(
            ErrorCode::EnvironmentRuntimeMismatch,
            message,
            to_details(RuntimeMismatchDetails {
                interpreter,
                required,
                found,
            }),
        )
    }

    pub fn environment_install_failed(
        message: impl Into<String>,
        details: CommandFailedDetails,
    ) -> Self {
        Self::new(
            ErrorCode::EnvironmentInstallFailed,
            message,
            to_details(details),
        )
    }

    pub fn environment_manifest_invalid(
        path: impl Into<String>,
        line: usize,
        problem: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::EnvironmentManifestInvalid,
            format!("Invalid dependency manifest {} (line {}): {}", path, line, problem),
            serde_json::json!({ "path": path, "line": line, "problem": problem }),
        )
    }

    pub fn environment_manifest_missing(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::EnvironmentManifestInvalid,
            format!("Dependency manifest {} does not exist", path),
            serde_json::json!({ "path": path }),
        )
        .with_hint("Fix environment.manifest in docship.toml or remove it to skip manifest install")
    }

    pub fn build_command_failed(message: impl Into<String>, details: CommandFailedDetails) -> Self {
        Self::new(ErrorCode::BuildCommandFailed, message, to_details(details))
    }

    pub fn build_output_missing(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::BuildOutputMissing,
            format!("Build did not produce output at {}", path),
            serde_json::json!({ "path": path }),
        )
        .with_hint("Check that build.source_dir matches where the documentation generator writes")
    }

    pub fn build_output_unclean(output_dir: impl Into<String>, offending: Vec<String>) -> Self {
        let output_dir = output_dir.into();
        Self::new(
            ErrorCode::BuildOutputUnclean,
            format!(
                "Output directory {} still contains {} non-publishable entr{}",
                output_dir,
                offending.len(),
                if offending.len() == 1 { "y" } else { "ies" }
            ),
            to_details(OutputUncleanDetails {
                output_dir,
                offending,
            }),
        )
    }

    pub fn publish_artifact_failed(message: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::PublishArtifactFailed,
            message,
            serde_json::json!({ "context": context }),
        )
    }

    pub fn publish_push_rejected(details: PushRejectedDetails) -> Self {
        let message = format!(
            "Push to {}/{} was rejected",
            details.remote, details.branch
        );
        Self::new(ErrorCode::PublishPushRejected, message, to_details(details))
            .with_hint("The remote has diverged; integrate it manually and re-run the publish pipeline")
    }

    pub fn git_command_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GitCommandFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalIoError,
            format!("IO error: {}", error),
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            format!("Unexpected error: {}", error),
            serde_json::json!({ "error": error }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}
