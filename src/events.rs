// Event types and payload structures for streamed apply and generate operations
// These are sent to clients as Server-Sent Events and kept in each project's activity log

use crate::models::ApplyStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Event name constants (SSE `event:` field)
pub const EVENT_APPLY_PROGRESS: &str = "apply:progress";
pub const EVENT_GENERATE_PROGRESS: &str = "generate:progress";
pub const EVENT_INSTALL_PROGRESS: &str = "install:progress";

/// Classification carried by failure events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyResponse,
    InvalidPath,
    ProviderError,
    ProviderTimeout,
    SandboxError,
    CommandFailed,
    NoSandbox,
    StoreClosed,
    InvalidProjectId,
    InvalidRequest,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::EmptyResponse => "empty_response",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::SandboxError => "sandbox_error",
            ErrorKind::CommandFailed => "command_failed",
            ErrorKind::NoSandbox => "no_sandbox",
            ErrorKind::StoreClosed => "store_closed",
            ErrorKind::InvalidProjectId => "invalid_project_id",
            ErrorKind::InvalidRequest => "invalid_request",
        };
        write!(f, "{}", name)
    }
}

/// Result of one command run during an apply operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReport {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Summary attached to the COMPLETED event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    pub files_written: Vec<String>,
    pub files_skipped: Vec<String>,
    pub packages_installed: Vec<String>,
    pub commands_run: Vec<CommandReport>,
    pub warnings: Vec<String>,
}

/// Progress inside a stage; never a stage transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepDetail {
    InstallOutput { line: String },
    PackagesInstalled { packages: Vec<String> },
    FileWritten { path: String, bytes: usize },
    CommandFinished(CommandReport),
    DevServerRestarted,
}

/// One event of an apply operation.
///
/// Every variant except `Progress` is a transition of the apply state
/// machine and is emitted exactly once per transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        project_id: String,
        operation_id: String,
    },
    Parsing {
        files: usize,
        packages: usize,
        commands: usize,
    },
    ParseWarning {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    InstallingPackages {
        packages: Vec<String>,
        already_installed: Vec<String>,
        builtin: Vec<String>,
    },
    WritingFiles {
        files: Vec<String>,
    },
    RunningCommands {
        commands: Vec<String>,
    },
    Completed {
        summary: ApplySummary,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        failed_stage: ApplyStage,
        kind: ErrorKind,
        message: String,
    },
    Progress {
        detail: StepDetail,
    },
}

impl ProgressEvent {
    /// The stage this event transitions to, `None` for in-stage progress
    pub fn stage(&self) -> Option<ApplyStage> {
        match self {
            ProgressEvent::Started { .. } => Some(ApplyStage::Started),
            ProgressEvent::Parsing { .. } => Some(ApplyStage::Parsing),
            ProgressEvent::ParseWarning { .. } => Some(ApplyStage::ParseWarning),
            ProgressEvent::InstallingPackages { .. } => Some(ApplyStage::InstallingPackages),
            ProgressEvent::WritingFiles { .. } => Some(ApplyStage::WritingFiles),
            ProgressEvent::RunningCommands { .. } => Some(ApplyStage::RunningCommands),
            ProgressEvent::Completed { .. } => Some(ApplyStage::Completed),
            ProgressEvent::Failed { .. } => Some(ApplyStage::Failed),
            ProgressEvent::Progress { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Failed { .. }
        )
    }
}

/// One event of a generate operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        project_id: String,
        operation_id: String,
        model: String,
        is_edit: bool,
    },
    Chunk {
        text: String,
    },
    FileDetected {
        path: String,
    },
    PackageDetected {
        name: String,
    },
    Completed {
        response: String,
        files: Vec<String>,
        packages: Vec<String>,
        warnings: Vec<String>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationEvent::Completed { .. } | GenerationEvent::Failed { .. }
        )
    }
}

/// One event of a direct package installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        packages: Vec<String>,
        already_installed: Vec<String>,
    },
    Output {
        line: String,
    },
    Completed {
        packages: Vec<String>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl InstallEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallEvent::Completed { .. } | InstallEvent::Failed { .. }
        )
    }
}

/// Event recorded in a project's activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "event", rename_all = "snake_case")]
pub enum Activity {
    Apply(ProgressEvent),
    Generate(GenerationEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
    pub activity: Activity,
}

impl ActivityEntry {
    pub fn new(operation_id: &str, activity: Activity) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            timestamp: Utc::now(),
            activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_wire_format() {
        let event = ProgressEvent::Failed {
            failed_stage: ApplyStage::InstallingPackages,
            kind: ErrorKind::SandboxError,
            message: "npm exited with 1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "FAILED");
        assert_eq!(json["failedStage"], "INSTALLING_PACKAGES");
        assert_eq!(json["kind"], "sandbox_error");
    }

    #[test]
    fn test_parse_warning_stage_name() {
        let event = ProgressEvent::ParseWarning {
            message: "x".to_string(),
            path: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "PARSE_WARNING");
        assert!(json.get("path").is_none());
        assert_eq!(event.stage(), Some(ApplyStage::ParseWarning));
    }

    #[test]
    fn test_progress_is_not_a_transition() {
        let event = ProgressEvent::Progress {
            detail: StepDetail::FileWritten {
                path: "src/a.js".to_string(),
                bytes: 3,
            },
        };
        assert_eq!(event.stage(), None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["detail"]["step"], "file_written");
    }

    #[test]
    fn test_generation_event_wire_format() {
        let event = GenerationEvent::FileDetected {
            path: "src/App.jsx".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file_detected");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_activity_entry_roundtrip() {
        let entry = ActivityEntry::new(
            "op-1",
            Activity::Apply(ProgressEvent::Parsing {
                files: 1,
                packages: 0,
                commands: 2,
            }),
        );
        let json = serde_json::to_string(&entry).unwrap();
        let back: ActivityEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
