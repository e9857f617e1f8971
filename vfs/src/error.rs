#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VfsError {
    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Aggregated failures from a best-effort restore (§4.4): the operation
/// always returns the paths it *did* restore alongside this error for the
/// ones it didn't.
#[derive(Debug, thiserror::Error)]
#[error("{} of {attempted} restores failed", failed.len())]
pub struct RestoreError {
    pub attempted: usize,
    pub failed: Vec<(std::path::PathBuf, VfsError)>,
}
