//! Shared wire/event/permission types for the cosmos sandbox-and-policy
//! kernel. Every other crate in the workspace depends on this one rather
//! than on each other's internals, matching the teacher's `codex-protocol`
//! crate acting as the shared vocabulary between `codex-core`, `codex-cli`,
//! and the rest of the workspace.

pub mod audit;
pub mod event;
pub mod message;
pub mod permission;
pub mod snapshot;

pub use audit::AuditRecord;
pub use audit::redact_arguments;
pub use event::Command;
pub use event::Event;
pub use event::PermissionRequest;
pub use event::PermissionResponse;
pub use message::Message;
pub use message::Role;
pub use message::ToolCall;
pub use message::ToolResult;
pub use permission::Decision;
pub use permission::DecisionSource;
pub use permission::Effect;
pub use permission::PermissionKey;
pub use permission::PermissionKeyError;
pub use permission::PermissionMode;
pub use permission::PermissionRule;
pub use snapshot::NO_INTERACTION;
pub use snapshot::SnapshotOperation;
pub use snapshot::SnapshotRecord;
