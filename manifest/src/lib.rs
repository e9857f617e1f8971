//! Parses, validates, and signature-verifies per-tool manifests (§4.1).
//!
//! The permissions mapping is the only part of a manifest that carries a
//! security obligation; function descriptors and timeouts are
//! signed-adjacent conveniences validated for shape but not cryptographically
//! bound.

mod duration;
mod error;
mod manifest;
mod signing;
mod types;

pub use duration::DurationParseError;
pub use duration::parse_duration;
pub use error::ManifestError;
pub use manifest::ManifestLoader;
pub use manifest::VerificationConfig;
pub use manifest::validate_tool_name;
pub use signing::SignatureError;
pub use signing::canonical_payload;
pub use types::FunctionDescriptor;
pub use types::Manifest;
pub use types::ParamDescriptor;
pub use types::ParamType;
