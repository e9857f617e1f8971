#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("manifest must be a JSON object")]
    NotAnObject,
    #[error("unknown field: {0:?}")]
    UnknownField(String),
    #[error("missing required field: {0:?}")]
    MissingField(&'static str),
    #[error("field {0:?} has the wrong type")]
    WrongType(&'static str),
    #[error("invalid name: {0:?}; must match [a-z0-9][a-z0-9_-]*")]
    InvalidName(String),
    #[error("duplicate function name: {0:?}")]
    DuplicateFunctionName(String),
    #[error("function name {0:?} is not a valid JS identifier")]
    InvalidFunctionName(String),
    #[error("invalid parameter type {0:?} for function {1:?}, param {2:?}")]
    InvalidParamType(String, String, String),
    #[error("invalid return type {0:?} for function {1:?}")]
    InvalidReturnType(String, String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(#[from] crate::duration::DurationParseError),
    #[error("invalid permission mode {0:?} for key {1:?}")]
    InvalidPermissionMode(String, String),
    #[error("invalid permission action: {0}")]
    InvalidPermissionKey(#[from] cosmos_protocol::PermissionKeyError),
    #[error("signature required but missing")]
    SignatureRequired,
    #[error("signature verification failed: {0}")]
    SignatureInvalid(#[from] crate::signing::SignatureError),
}
