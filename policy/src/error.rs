#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy override file is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unsupported policy override file version: {0}")]
    UnsupportedVersion(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not determine home directory")]
    NoHomeDir,
}
