//! Defines the event sink contract between the conversation loop and the
//! host. Uses the same SQ (submissions in) / EQ (events out) split the
//! teacher uses for its Codex/client protocol, generalized from shell
//! exec/patch approvals to the permission-prompt flow this kernel drives.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::permission::Decision;
use crate::permission::PermissionKey;

/// Text lines from the host beginning with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Compact,
    Clear,
    Context,
    Model(String),
    Restore(Uuid),
}

impl Command {
    /// Parse a host input line; returns `None` if it is not a command
    /// (plain text should be sent as a user message instead).
    pub fn parse(line: &str) -> Option<Result<Command, String>> {
        let line = line.trim();
        if !line.starts_with('/') {
            return None;
        }
        let mut parts = line[1..].splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();
        Some(match name {
            "compact" => Ok(Command::Compact),
            "clear" => Ok(Command::Clear),
            "context" => Ok(Command::Context),
            "model" => {
                if rest.is_empty() {
                    Err("/model requires a model id".to_string())
                } else {
                    Ok(Command::Model(rest.to_string()))
                }
            }
            "restore" => rest
                .parse::<Uuid>()
                .map(Command::Restore)
                .map_err(|e| format!("/restore requires a session uuid: {e}")),
            other => Err(format!("unknown command: /{other}")),
        })
    }
}

/// A pending permission prompt. The loop blocks on `respond` (conceptually;
/// concrete transport is a oneshot channel owned by the caller) until the
/// host calls back with the user's decision or the loop's own timeout
/// fires first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub tool_call_id: String,
    pub key: PermissionKey,
    pub agent: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionResponse {
    Approved,
    ApprovedForSession,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub interaction_id: String,
    pub path: PathBuf,
    pub operation: String,
}

/// Tagged events the core pushes to the host's event sink.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Token {
        text: String,
    },
    ToolUse {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolExecution {
        call_id: String,
    },
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
    /// `ui.emit` progress message from a running tool; no permission check.
    ToolProgress {
        call_id: String,
        message: String,
    },
    PermissionRequest(PermissionRequest),
    PermissionTimeout {
        call_id: String,
        applied_default: Decision,
    },
    ContextWarning {
        used_tokens: u64,
        window: u64,
    },
    ContextAutoCompact,
    ContextUpdate {
        input_tokens: u64,
        output_tokens: u64,
    },
    CompactionStart,
    CompactionProgress {
        message: String,
    },
    CompactionComplete {
        old_tokens: u64,
        new_tokens: u64,
    },
    CompactionFailed {
        reason: String,
    },
    FileChange(FileChangeEvent),
    ModelChanged {
        model_id: String,
    },
    HistoryCleared,
    ContextInfo {
        used_tokens: u64,
        window: u64,
    },
    SessionRestored {
        session_id: Uuid,
    },
    Error {
        message: String,
    },
    Completion,
}
