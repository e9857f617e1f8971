//! Append-only JSONL writer for a single session's audit file, one record
//! per decision (§4.3). A bounded channel feeds a background task that owns
//! the file handle, so callers never block on disk I/O and writes are
//! serialized without an explicit lock.

use std::path::Path;
use std::path::PathBuf;

use cosmos_protocol::AuditRecord;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::error::AuditError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AuditLog {
    tx: Sender<String>,
    path: PathBuf,
}

impl AuditLog {
    /// Open (creating if absent) `<project>/.cosmos/audit-<session_id>.jsonl`
    /// and spawn the background writer task.
    pub async fn open(project_root: &Path, session_id: Uuid) -> Result<Self, AuditError> {
        let dir = project_root.join(".cosmos");
        tokio::fs::create_dir_all(&dir).await?;
        set_owner_only_dir(&dir).await?;

        let path = dir.join(format!("audit-{session_id}.jsonl"));
        let std_file = std::fs::OpenOptions::new().append(true).create(true).open(&path)?;

        let (tx, mut rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        tokio::task::spawn(async move {
            let mut file = tokio::fs::File::from_std(std_file);
            while let Some(line) = rx.recv().await {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    tracing::warn!("audit writer: failed to write line: {e}");
                    break;
                }
                if let Err(e) = file.write_all(b"\n").await {
                    tracing::warn!("audit writer: failed to write newline: {e}");
                    break;
                }
                if let Err(e) = file.flush().await {
                    tracing::warn!("audit writer: failed to flush: {e}");
                    break;
                }
            }
        });

        Ok(Self { tx, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize and enqueue `record`. Redaction of `arguments` must already
    /// have been applied by the caller before constructing the record.
    pub async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let json = serde_json::to_string(record)?;
        self.tx.send(json).await.map_err(|_| AuditError::WriterClosed)
    }
}

#[cfg(unix)]
async fn set_owner_only_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await
}

#[cfg(not(unix))]
async fn set_owner_only_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmos_protocol::DecisionSource;
    use cosmos_protocol::Effect;
    use cosmos_protocol::PermissionKey;
    use tempfile::tempdir;

    fn record(session_id: Uuid) -> AuditRecord {
        AuditRecord {
            timestamp: chrono::Utc::now(),
            session_id,
            agent: "agent-a".to_string(),
            tool: "search".to_string(),
            permission_key: "net:http".parse::<PermissionKey>().unwrap(),
            decision_effect: Effect::Allow,
            decision_source: DecisionSource::Manifest,
            arguments_redacted: serde_json::json!({"query": "rust"}),
        }
    }

    #[tokio::test]
    async fn appends_one_json_object_per_line() {
        let dir = tempdir().unwrap();
        let session_id = Uuid::new_v4();
        let log = AuditLog::open(dir.path(), session_id).await.unwrap();

        log.append(&record(session_id)).await.unwrap();
        log.append(&record(session_id)).await.unwrap();

        // Give the background task a chance to drain the channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["agent"], "agent-a");
        }
    }

    #[tokio::test]
    async fn filename_embeds_session_id() {
        let dir = tempdir().unwrap();
        let session_id = Uuid::new_v4();
        let log = AuditLog::open(dir.path(), session_id).await.unwrap();
        assert!(log.path().to_string_lossy().contains(&session_id.to_string()));
    }
}
