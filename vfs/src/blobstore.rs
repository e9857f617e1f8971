//! Content-addressed blob store under `.cosmos/snapshots/<session_id>/`.
//! Blobs are immutable once written: a duplicate hash is never rewritten.

use std::path::Path;
use std::path::PathBuf;

use sha2::Digest;
use sha2::Sha256;

use crate::error::VfsError;

pub fn hash_contents(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// `dir` is `.cosmos/snapshots/<session_id>/`, created with owner-only
    /// permissions on first use.
    pub fn open(dir: PathBuf) -> Result<Self, VfsError> {
        std::fs::create_dir_all(&dir).map_err(|e| VfsError::io(dir.clone(), e))?;
        set_owner_only(&dir)?;
        Ok(Self { dir })
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.dir.join(hash)
    }

    /// Write `bytes` under their content hash unless a blob with that hash
    /// already exists, and return the hash.
    pub fn put(&self, bytes: &[u8]) -> Result<String, VfsError> {
        let hash = hash_contents(bytes);
        let path = self.blob_path(&hash);
        if !path.exists() {
            std::fs::write(&path, bytes).map_err(|e| VfsError::io(path, e))?;
        }
        Ok(hash)
    }

    pub fn get(&self, hash: &str) -> Result<Vec<u8>, VfsError> {
        let path = self.blob_path(hash);
        std::fs::read(&path).map_err(|e| VfsError::io(path, e))
    }
}

#[cfg(unix)]
fn set_owner_only(dir: &Path) -> Result<(), VfsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(|e| VfsError::io(dir, e))
}

#[cfg(not(unix))]
fn set_owner_only(_dir: &Path) -> Result<(), VfsError> {
    Ok(())
}
