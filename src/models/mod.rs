// Data models shared by the parser, the package detector and the project store

pub mod state_machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Parsed AI responses
// ============================================================================

/// A single file write requested by an AI response.
/// The path is exactly what the response said; normalization happens at apply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOp {
    pub path: String,
    pub content: String,
}

/// A fenced code block for which no destination path could be inferred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlock {
    pub language: Option<String>,
    pub content: String,
}

/// Non-fatal observations collected while scanning and assembling a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    /// A tag or fence was still open when the input ended; it was dropped
    UnterminatedTag { tag: String },
    /// A fenced block without a recognizable destination path
    UnattributedCodeBlock { language: Option<String>, index: usize },
    /// A file whose content is empty after trimming (kept as an empty write)
    EmptyFile { path: String },
    /// A `<package>` tag with no name in it
    EmptyPackage,
    /// A `<command>` tag with nothing to run
    EmptyCommand,
    /// A known tag that could not be interpreted (e.g. `<file>` without a path)
    MalformedTag { raw: String },
    /// A segment the assembler does not know how to use
    UnrecognizedSegment { raw: String },
    /// Non-empty input with no files, packages or commands in it
    NoActionableContent,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseWarning::UnterminatedTag { tag } => {
                write!(f, "Dropped unterminated <{}> opening", tag)
            }
            ParseWarning::UnattributedCodeBlock { language, index } => write!(
                f,
                "Code block #{} ({}) has no destination path",
                index,
                language.as_deref().unwrap_or("no language")
            ),
            ParseWarning::EmptyFile { path } => write!(f, "File '{}' is empty", path),
            ParseWarning::EmptyPackage => write!(f, "Empty <package> tag"),
            ParseWarning::EmptyCommand => write!(f, "Empty <command> tag"),
            ParseWarning::MalformedTag { raw } => write!(f, "Malformed tag: {}", raw),
            ParseWarning::UnrecognizedSegment { raw } => write!(f, "Unrecognized segment: {}", raw),
            ParseWarning::NoActionableContent => {
                write!(f, "Response contains no files, packages or commands")
            }
        }
    }
}

/// Structured change-set extracted from one AI response.
/// Built once per apply operation and not mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResponse {
    /// File writes in first-occurrence order, last-write-wins per path
    pub files: Vec<FileOp>,
    /// Explicitly requested packages, lower-cased and sorted
    pub packages: BTreeSet<String>,
    /// Shell commands in discovery order
    pub commands: Vec<String>,
    /// Fenced blocks that could not be attributed to a path
    pub unattributed_blocks: Vec<CodeBlock>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedResponse {
    /// True when there is nothing to install, write or run
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.packages.is_empty() && self.commands.is_empty()
    }

    /// Look up a file op by its (unnormalized) path
    pub fn file(&self, path: &str) -> Option<&FileOp> {
        self.files.iter().find(|f| f.path == path)
    }
}

// ============================================================================
// Package classification
// ============================================================================

/// Classification of one module specifier within a detection run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Builtin,
    AlreadyInstalled,
    ToInstall,
}

/// Partition of a specifier set into built-ins, installed and to-install
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageClassification {
    pub to_install: BTreeSet<String>,
    pub already_installed: BTreeSet<String>,
    pub builtin: BTreeSet<String>,
}

impl PackageClassification {
    /// Status of a specifier, if it was part of the classified input
    pub fn status_of(&self, specifier: &str) -> Option<PackageStatus> {
        if self.builtin.contains(specifier) {
            Some(PackageStatus::Builtin)
        } else if self.already_installed.contains(specifier) {
            Some(PackageStatus::AlreadyInstalled)
        } else if self.to_install.contains(specifier) {
            Some(PackageStatus::ToInstall)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.to_install.len() + self.already_installed.len() + self.builtin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Apply progress
// ============================================================================

/// Stage of an apply operation, reported once per transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplyStage {
    Started,
    Parsing,
    ParseWarning,
    InstallingPackages,
    WritingFiles,
    RunningCommands,
    Completed,
    Failed,
}

impl std::fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ApplyStage::Started => "STARTED",
            ApplyStage::Parsing => "PARSING",
            ApplyStage::ParseWarning => "PARSE_WARNING",
            ApplyStage::InstallingPackages => "INSTALLING_PACKAGES",
            ApplyStage::WritingFiles => "WRITING_FILES",
            ApplyStage::RunningCommands => "RUNNING_COMMANDS",
            ApplyStage::Completed => "COMPLETED",
            ApplyStage::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Conversation state
// ============================================================================

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Optional bookkeeping attached to a message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edited_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_type: Option<EditType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Whether an edit created a project or changed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditType {
    Create,
    Edit,
}

/// Final outcome of an apply operation as recorded in the edit history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOutcome {
    Success,
    Failed,
    Cancelled,
}

/// One entry of a project's edit history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRecord {
    pub files: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub edit_type: EditType,
    pub outcome: EditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EditRecord {
    pub fn new(files: Vec<String>, summary: impl Into<String>, edit_type: EditType) -> Self {
        Self {
            files,
            timestamp: Utc::now(),
            summary: summary.into(),
            edit_type,
            outcome: EditOutcome::Success,
            error: None,
        }
    }
}

/// Conversation history and derived context for one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub project_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub edits: Vec<EditRecord>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub preferences: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for a conversation state. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, alias = "currentTopic")]
    pub topic: Option<String>,
    #[serde(default, alias = "userPreferences")]
    pub preferences: Option<serde_json::Map<String, serde_json::Value>>,
}

impl StatePatch {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            preferences: None,
        }
    }

    pub fn preference(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let mut preferences = serde_json::Map::new();
        preferences.insert(key.into(), value.into());
        Self {
            topic: None,
            preferences: Some(preferences),
        }
    }
}

/// Retention limits applied by `trim`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimPolicy {
    pub max_messages: Option<usize>,
    pub max_edits: Option<usize>,
    /// Entries older than this many seconds are dropped
    pub max_age_secs: Option<i64>,
}

/// How many entries a trim removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimReport {
    pub messages_removed: usize,
    pub edits_removed: usize,
}
