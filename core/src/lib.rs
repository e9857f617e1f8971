//! Root of the `cosmos-core` library: the conversation kernel that wires
//! manifest-driven tool registration, policy evaluation, sandboxed
//! execution, VFS snapshotting, and audit logging into one submission/event
//! loop a host process drives through [`CosmosSession`].

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the appropriate abstraction (e.g.,
// the CLI or the tracing stack).
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod error;
pub mod host;
#[path = "loop.rs"]
pub mod r#loop;
pub mod provider;
pub mod session;
pub mod session_store;

pub use config::Config;
pub use error::CosmosErr;
pub use error::Result;
pub use host::CosmosSession;
pub use host::Submission;
pub use host::SubmissionOp;
pub use provider::Prompt;
pub use provider::Provider;
pub use provider::ResponseEvent;
pub use provider::ResponseStream;
pub use provider::ScriptedProvider;
pub use provider::StopReason;
pub use provider::TokenUsage;
pub use provider::ToolDescriptor;
pub use r#loop::DEFAULT_PERMISSION_TIMEOUT;
pub use r#loop::LoopContext;
pub use r#loop::process_user_message;
pub use session::Session;
pub use session::SessionState;
pub use session::TokenCounters;
pub use session_store::SessionStore;
