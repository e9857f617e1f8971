//! The eight error kinds of §7, collected into one top-level enum that
//! wraps each sub-crate's error type via `#[from]` — the same shape the
//! teacher's `CodexErr` uses to wrap `SandboxErr`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CosmosErr>;

#[derive(Error, Debug)]
pub enum CosmosErr {
    /// Manifest parse, signature, or key problems. Non-recoverable for the
    /// affected tool; other tools continue to load.
    #[error("config error: {0}")]
    Config(#[from] cosmos_manifest::ManifestError),

    /// Surfaced to the LLM as a failed tool_result; never aborts the
    /// conversation.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// User did not respond to a permission prompt in time.
    #[error("permission prompt for {0} timed out")]
    PermissionTimeout(cosmos_protocol::PermissionKey),

    /// JS exception, compile failure, or leaked isolate.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] cosmos_sandbox::SandboxError),

    /// Capability boundary rejected the call (denied, bad url, symlink, …).
    #[error("capability error: {0}")]
    Capability(#[from] cosmos_sandbox::CapabilityError),

    /// Provider transport failure: throttled, access-denied, model-not-found,
    /// model-not-ready, validation, or stream disconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// Override file, audit log, or snapshot store write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Unrecoverable: the session loop cannot continue.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Policy(#[from] cosmos_policy::PolicyError),

    #[error(transparent)]
    Vfs(#[from] cosmos_vfs::VfsError),

    #[error(transparent)]
    Audit(#[from] cosmos_audit::AuditError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CosmosErr {
    /// Whether this error should be surfaced as a failed tool_result fed
    /// back to the provider, rather than aborting the conversation.
    pub fn is_tool_result_class(&self) -> bool {
        matches!(
            self,
            CosmosErr::PolicyDenied(_) | CosmosErr::Sandbox(_) | CosmosErr::Capability(_)
        )
    }
}
