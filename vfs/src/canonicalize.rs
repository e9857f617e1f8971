//! Filesystem canonicalization for VFS operations: symlinks are fully
//! resolved and relative paths are anchored against `cwd`. Unlike
//! `cosmos_policy::normalize_fs_target`, this touches disk — it is used
//! right before a snapshot read/write, never for permission-key matching.

use std::path::Path;
use std::path::PathBuf;

use crate::error::VfsError;

/// Canonicalize `path`. If the path does not exist yet, canonicalize its
/// parent (which must exist) and re-append the file name, so a still-to-be-
/// created file gets a stable, symlink-resolved location.
pub fn canonicalize_for_write(path: &Path, cwd: &Path) -> Result<PathBuf, VfsError> {
    let anchored = if path.is_absolute() { path.to_path_buf() } else { cwd.join(path) };

    match std::fs::canonicalize(&anchored) {
        Ok(canonical) => Ok(canonical),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let file_name = anchored
                .file_name()
                .ok_or_else(|| VfsError::io(anchored.clone(), std::io::Error::from(std::io::ErrorKind::InvalidInput)))?
                .to_owned();
            let parent = anchored.parent().unwrap_or(Path::new("."));
            let canonical_parent = std::fs::canonicalize(parent).map_err(|e| VfsError::io(parent, e))?;
            Ok(canonical_parent.join(file_name))
        }
        Err(e) => Err(VfsError::io(anchored, e)),
    }
}
