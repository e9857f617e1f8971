//! `Snapshot`/`RestoreInteraction` orchestration (§4.4).

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use cosmos_protocol::NO_INTERACTION;
use cosmos_protocol::SnapshotOperation;
use cosmos_protocol::SnapshotRecord;
use uuid::Uuid;

use crate::blobstore::BlobStore;
use crate::canonicalize::canonicalize_for_write;
use crate::error::RestoreError;
use crate::error::VfsError;

/// Per-session snapshotter. Records are kept in memory in insertion order so
/// `RestoreInteraction` can walk them in reverse; the blob store is the
/// durable half of the state.
pub struct Snapshotter {
    project_root: PathBuf,
    blobs: BlobStore,
    records: Mutex<Vec<SnapshotRecord>>,
    current_interaction: Mutex<Option<String>>,
}

impl Snapshotter {
    pub fn open(project_root: PathBuf, session_id: Uuid) -> Result<Self, VfsError> {
        let snapshots_dir = project_root.join(".cosmos").join("snapshots").join(session_id.to_string());
        Ok(Self {
            project_root,
            blobs: BlobStore::open(snapshots_dir)?,
            records: Mutex::new(Vec::new()),
            current_interaction: Mutex::new(None),
        })
    }

    /// Set by the conversation loop at the start of each LLM turn.
    pub fn begin_interaction(&self, interaction_id: String) {
        *self.current_interaction.lock().expect("interaction mutex poisoned") = Some(interaction_id);
    }

    /// Unset at the end of the turn.
    pub fn end_interaction(&self) {
        *self.current_interaction.lock().expect("interaction mutex poisoned") = None;
    }

    fn interaction_id(&self) -> String {
        self.current_interaction
            .lock()
            .expect("interaction mutex poisoned")
            .clone()
            .unwrap_or_else(|| NO_INTERACTION.to_string())
    }

    /// Snapshot `path` before `operation` is performed against it.
    pub fn snapshot(&self, path: &Path, operation: SnapshotOperation) -> Result<SnapshotRecord, VfsError> {
        let canonical = canonicalize_for_write(path, &self.project_root)?;

        let (content_hash, was_new_file) = match std::fs::read(&canonical) {
            Ok(bytes) => (Some(self.blobs.put(&bytes)?), false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (None, true),
            Err(e) => return Err(VfsError::io(canonical, e)),
        };

        let record = SnapshotRecord {
            interaction_id: self.interaction_id(),
            path_canonical: canonical,
            content_hash,
            operation,
            was_new_file,
            timestamp: chrono::Utc::now(),
        };

        self.records.lock().expect("records mutex poisoned").push(record.clone());
        Ok(record)
    }

    /// Restore every record for `interaction_id`, newest first. Best-effort:
    /// a single failure does not halt the remainder.
    pub fn restore_interaction(&self, interaction_id: &str) -> (Vec<PathBuf>, Option<RestoreError>) {
        let matching: Vec<SnapshotRecord> = {
            let records = self.records.lock().expect("records mutex poisoned");
            records.iter().filter(|r| r.interaction_id == interaction_id).cloned().collect()
        };

        let attempted = matching.len();
        let mut restored = Vec::new();
        let mut failed = Vec::new();

        for record in matching.into_iter().rev() {
            match restore_one(&self.blobs, &record) {
                Ok(()) => restored.push(record.path_canonical),
                Err(e) => failed.push((record.path_canonical, e)),
            }
        }

        let error = if failed.is_empty() { None } else { Some(RestoreError { attempted, failed }) };
        (restored, error)
    }
}

fn restore_one(blobs: &BlobStore, record: &SnapshotRecord) -> Result<(), VfsError> {
    if record.was_new_file {
        match std::fs::remove_file(&record.path_canonical) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VfsError::io(record.path_canonical.clone(), e)),
        }
    } else {
        let hash = record.content_hash.as_deref().unwrap_or_default();
        let bytes = blobs.get(hash)?;
        std::fs::write(&record.path_canonical, bytes).map_err(|e| VfsError::io(record.path_canonical.clone(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_of_missing_file_marks_was_new_file() {
        let dir = tempdir().unwrap();
        let snapshotter = Snapshotter::open(dir.path().to_path_buf(), Uuid::new_v4()).unwrap();
        let record = snapshotter.snapshot(Path::new("new.txt"), SnapshotOperation::Write).unwrap();
        assert!(record.was_new_file);
        assert!(record.content_hash.is_none());
    }

    #[test]
    fn snapshot_of_existing_file_stores_blob() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"original").unwrap();
        let snapshotter = Snapshotter::open(dir.path().to_path_buf(), Uuid::new_v4()).unwrap();
        let record = snapshotter.snapshot(Path::new("a.txt"), SnapshotOperation::Write).unwrap();
        assert!(!record.was_new_file);
        assert!(record.content_hash.is_some());
    }

    #[test]
    fn snapshot_without_active_interaction_uses_sentinel() {
        let dir = tempdir().unwrap();
        let snapshotter = Snapshotter::open(dir.path().to_path_buf(), Uuid::new_v4()).unwrap();
        let record = snapshotter.snapshot(Path::new("new.txt"), SnapshotOperation::Write).unwrap();
        assert_eq!(record.interaction_id, NO_INTERACTION);
    }

    #[test]
    fn restore_recreates_deleted_content_and_removes_new_files() {
        let dir = tempdir().unwrap();
        let file_a = dir.path().join("a.txt");
        std::fs::write(&file_a, b"original").unwrap();

        let snapshotter = Snapshotter::open(dir.path().to_path_buf(), Uuid::new_v4()).unwrap();
        snapshotter.begin_interaction("turn-1".to_string());
        snapshotter.snapshot(&file_a, SnapshotOperation::Write).unwrap();
        std::fs::write(&file_a, b"modified by tool").unwrap();

        let file_b = dir.path().join("b.txt");
        snapshotter.snapshot(&file_b, SnapshotOperation::Write).unwrap();
        std::fs::write(&file_b, b"created by tool").unwrap();
        snapshotter.end_interaction();

        let (restored, error) = snapshotter.restore_interaction("turn-1");
        assert!(error.is_none());
        assert_eq!(restored.len(), 2);
        assert_eq!(std::fs::read(&file_a).unwrap(), b"original");
        assert!(!file_b.exists());
    }

    #[test]
    fn restore_is_best_effort_on_partial_failure() {
        let dir = tempdir().unwrap();
        let file_a = dir.path().join("a.txt");
        std::fs::write(&file_a, b"original").unwrap();

        let sub = dir.path().join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        let file_b = sub.join("b.txt");
        std::fs::write(&file_b, b"original-b").unwrap();

        let snapshotter = Snapshotter::open(dir.path().to_path_buf(), Uuid::new_v4()).unwrap();
        snapshotter.begin_interaction("turn-1".to_string());
        snapshotter.snapshot(&file_a, SnapshotOperation::Write).unwrap();
        snapshotter.snapshot(&file_b, SnapshotOperation::Write).unwrap();
        std::fs::write(&file_a, b"modified").unwrap();
        std::fs::write(&file_b, b"modified-b").unwrap();
        snapshotter.end_interaction();

        // Remove sub/'s directory entirely so restoring file_b's blob back
        // to its canonical path fails, while file_a's restore still succeeds.
        std::fs::remove_dir_all(&sub).unwrap();

        let (restored, error) = snapshotter.restore_interaction("turn-1");
        assert_eq!(restored, vec![file_a.canonicalize().unwrap()]);
        let error = error.expect("expected the file_b restore to fail");
        assert_eq!(error.attempted, 2);
        assert_eq!(error.failed.len(), 1);
        assert_eq!(error.failed[0].0, file_b);
    }
}
