//! Two-level error design mirroring the teacher's `CodexErr`/`SandboxErr`
//! split: [`SandboxError`] is the outer, caller-facing error; compile and
//! capability failures carry enough detail (JS stack trace, denied key) to
//! avoid swallowing the diagnostic.

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("tool {0:?} is not registered")]
    UnknownTool(String),
    #[error("a tool named {0:?} is already registered")]
    DuplicateTool(String),
    #[error("{0:?} is not a valid JS identifier")]
    InvalidFunctionName(String),
    #[error("{0:?} is not a valid agent name")]
    InvalidAgentName(String),
    #[error("failed to compile {tool:?}: {message}")]
    Compile { tool: String, message: String },
    #[error("tool {tool:?} timed out after {elapsed_ms}ms")]
    Timeout { tool: String, elapsed_ms: u64 },
    #[error("tool {0:?} leaked a write-class isolate during a prior timeout and cannot run until restart")]
    Leaked(String),
    #[error("tool {tool:?} raised an exception: {message}")]
    Exception { tool: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by a capability call from inside an isolate, before it is
/// turned into a JS-thrown error string. Kept separate from
/// [`SandboxError`] because these never cross the host boundary directly —
/// they are always rendered to `"namespace.op: message"` JS exception text.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("permission denied: {0}")]
    Denied(cosmos_protocol::PermissionKey),
    #[error("permission denied: {0} (requires user approval)")]
    RequiresApproval(cosmos_protocol::PermissionKey),
    #[error("invalid agent name for storage: {0:?}")]
    InvalidStorageAgent(String),
    #[error("url does not parse: {0}")]
    InvalidUrl(String),
    #[error("scheme {0:?} is not allowed")]
    SchemeNotAllowed(String),
    #[error("host resolves to a loopback, private, or link-local address")]
    HostNotAllowed,
    #[error("too many redirects (max 10)")]
    TooManyRedirects,
    #[error("response body exceeds the 10 MiB cap")]
    ResponseTooLarge,
    #[error("final path component is a symlink")]
    SymlinkRefused,
    #[error("snapshot error: {0}")]
    Snapshot(#[from] cosmos_vfs::VfsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
