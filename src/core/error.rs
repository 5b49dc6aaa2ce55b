use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    WorkloadNotFound,
    TemplateNotFound,
    VersionConfigNotFound,

    TemplateScanFailed,
    TemplateInvalid,
    TemplateUnresolved,

    DirectoryUnreadable,

    CommandRejected,
    CommandTimeout,
    ResourceMissing,
    PermissionDenied,
    GenericExecutionFailure,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::WorkloadNotFound => "workload.not_found",
            ErrorCode::TemplateNotFound => "template.not_found",
            ErrorCode::VersionConfigNotFound => "version_config.not_found",

            ErrorCode::TemplateScanFailed => "template.scan_failed",
            ErrorCode::TemplateInvalid => "template.invalid",
            ErrorCode::TemplateUnresolved => "template.unresolved",

            ErrorCode::DirectoryUnreadable => "artifact.directory_unreadable",

            ErrorCode::CommandRejected => "execution.command_rejected",
            ErrorCode::CommandTimeout => "execution.timeout",
            ErrorCode::ResourceMissing => "execution.resource_missing",
            ErrorCode::PermissionDenied => "execution.permission_denied",
            ErrorCode::GenericExecutionFailure => "execution.failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
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
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
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

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
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
pub struct TemplateParseDetails {
    pub template: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUnreadableDetails {
    pub path: String,
    pub error: String,
}

/// Failure details for one executed command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailedDetails {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub raw: String,
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
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn workload_not_found(id: impl Into<String>, path: Option<String>) -> Self {
        Self::not_found(ErrorCode::WorkloadNotFound, "Workload not found", id, path)
            .with_hint("Check --root or the templateRoot setting in deckhand.json")
    }

    pub fn template_not_found(id: impl Into<String>, path: Option<String>) -> Self {
        Self::not_found(ErrorCode::TemplateNotFound, "Template not found", id, path)
    }

    pub fn version_config_not_found(id: impl Into<String>, path: Option<String>) -> Self {
        Self::not_found(
            ErrorCode::VersionConfigNotFound,
            "Version config record not found",
            id,
            path,
        )
    }

    fn not_found(
        code: ErrorCode,
        message: &str,
        id: impl Into<String>,
        path: Option<String>,
    ) -> Self {
        Self::new(code, message, to_details(NotFoundDetails { id: id.into(), path }))
    }

    pub fn template_scan_failed(template: impl Into<String>, err: &serde_yml::Error) -> Self {
        Self::new(
            ErrorCode::TemplateScanFailed,
            "Template could not be scanned for placeholders",
            to_details(parse_details(template.into(), err)),
        )
    }

    pub fn template_invalid(template: impl Into<String>, err: &serde_yml::Error) -> Self {
        Self::new(
            ErrorCode::TemplateInvalid,
            "Materialized template is not valid YAML",
            to_details(parse_details(template.into(), err)),
        )
        .with_hint("Check the values substituted into the template for YAML special characters")
    }

    pub fn template_unresolved(template: impl Into<String>, names: Vec<String>) -> Self {
        let template = template.into();
        Self::new(
            ErrorCode::TemplateUnresolved,
            format!(
                "Template '{}' has unresolved placeholders: {}",
                template,
                names.join(", ")
            ),
            serde_json::json!({ "template": template, "placeholders": names }),
        )
        .with_hint("Supply the missing values with --set name=value")
    }

    pub fn directory_unreadable(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DirectoryUnreadable,
            "Source directory could not be listed",
            to_details(DirectoryUnreadableDetails {
                path: path.into(),
                error: error.into(),
            }),
        )
    }

    pub fn command_rejected(command: impl Into<String>, problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::CommandRejected,
            format!("Command rejected: {}", problem),
            serde_json::json!({ "command": command.into(), "problem": problem }),
        )
    }

    /// Build a step failure error. `code` must be one of the execution codes.
    pub fn execution_failed(
        code: ErrorCode,
        message: impl Into<String>,
        details: ExecutionFailedDetails,
    ) -> Self {
        let mut err = Self::new(code, message, to_details(details));
        if code == ErrorCode::CommandTimeout {
            err.retryable = Some(true);
        }
        err
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

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            serde_json::json!({ "path": path.into(), "error": err.to_string() }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
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
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::internal_unexpected(message)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

fn parse_details(template: String, err: &serde_yml::Error) -> TemplateParseDetails {
    let location = err.location();
    TemplateParseDetails {
        template,
        error: err.to_string(),
        line: location.as_ref().map(|l| l.line()),
        column: location.as_ref().map(|l| l.column()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_dotted_names() {
        assert_eq!(ErrorCode::TemplateInvalid.as_str(), "template.invalid");
        assert_eq!(
            ErrorCode::DirectoryUnreadable.as_str(),
            "artifact.directory_unreadable"
        );
        assert_eq!(ErrorCode::CommandTimeout.as_str(), "execution.timeout");
    }

    #[test]
    fn template_invalid_carries_parse_error() {
        let parse_err = serde_yml::from_str::<serde_yml::Value>("a: [1, 2").unwrap_err();
        let err = Error::template_invalid("configmap.yaml", &parse_err);

        assert_eq!(err.code, ErrorCode::TemplateInvalid);
        assert_eq!(err.details["template"], "configmap.yaml");
        assert!(!err.details["error"].as_str().unwrap().is_empty());
        assert_eq!(err.hints.len(), 1);
    }

    #[test]
    fn timeouts_are_marked_retryable() {
        let err = Error::execution_failed(
            ErrorCode::CommandTimeout,
            "timed out",
            ExecutionFailedDetails {
                command: "kubectl apply".to_string(),
                exit_code: None,
                raw: String::new(),
            },
        );
        assert_eq!(err.retryable, Some(true));
    }
}
