//! `deno_core`-backed per-tool isolate runtime and capability APIs (§4.5,
//! §4.6): one isolate per registered tool, lazy-compiled and hot-reloaded on
//! source mtime change, permission-gated at every capability boundary.

mod capability;
mod error;
mod invocation;
mod ops;
mod registry;
mod runtime;

pub use capability::CapabilityContext;
pub use capability::FsEntry;
pub use capability::HttpResponse;
pub use error::CapabilityError;
pub use error::SandboxError;
pub use registry::ToolRegistry;
pub use registry::ToolSpec;
pub use runtime::SandboxRuntime;
