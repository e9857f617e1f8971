//! JSONL persistence of a session's `message_history`, so `/restore
//! <session>` can rehydrate it (§4.7 [SUPPLEMENT]). Same shape as
//! `cosmos_audit`'s writer/reader: a background task owns the file, callers
//! enqueue without blocking on disk.

use std::path::Path;
use std::path::PathBuf;

use cosmos_protocol::Message;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::error::CosmosErr;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct SessionStore {
    tx: Sender<String>,
    path: PathBuf,
}

impl SessionStore {
    /// Open (creating if absent) `<project>/.cosmos/sessions/<session_id>.jsonl`
    /// and spawn the background writer task.
    pub async fn open(project_root: &Path, session_id: Uuid) -> Result<Self, CosmosErr> {
        let dir = project_root.join(".cosmos").join("sessions");
        tokio::fs::create_dir_all(&dir).await?;
        set_owner_only_dir(&dir).await?;

        let path = dir.join(format!("{session_id}.jsonl"));
        let std_file = std::fs::OpenOptions::new().append(true).create(true).open(&path)?;

        let (tx, mut rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        tokio::task::spawn(async move {
            let mut file = tokio::fs::File::from_std(std_file);
            while let Some(line) = rx.recv().await {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    tracing::warn!("session store: failed to write line: {e}");
                    break;
                }
                if let Err(e) = file.write_all(b"\n").await {
                    tracing::warn!("session store: failed to write newline: {e}");
                    break;
                }
                if let Err(e) = file.flush().await {
                    tracing::warn!("session store: failed to flush: {e}");
                    break;
                }
            }
        });

        Ok(Self { tx, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, message: &Message) -> Result<(), CosmosErr> {
        let json = serde_json::to_string(message)?;
        self.tx.send(json).await.map_err(|_| CosmosErr::Persistence("session store writer is closed".to_string()))
    }
}

/// Rehydrate `message_history` for `/restore <session>`. Malformed lines are
/// skipped with a warning rather than failing the whole restore.
pub async fn load(project_root: &Path, session_id: Uuid) -> Result<Vec<Message>, CosmosErr> {
    let path = project_root.join(".cosmos").join("sessions").join(format!("{session_id}.jsonl"));
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut messages = Vec::new();
    for line in contents.lines() {
        match serde_json::from_str::<Message>(line) {
            Ok(message) => messages.push(message),
            Err(e) => tracing::warn!("session store: skipping malformed line: {e}"),
        }
    }
    Ok(messages)
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
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn records_round_trip_through_load() {
        let dir = tempdir().unwrap();
        let session_id = Uuid::new_v4();
        let store = SessionStore::open(dir.path(), session_id).await.unwrap();
        store.record(&Message::user_text("hi")).await.unwrap();
        store.record(&Message::assistant_text("hello")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let restored = load(dir.path(), session_id).await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].text.as_deref(), Some("hi"));
        assert_eq!(restored[1].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn missing_session_file_returns_empty() {
        let dir = tempdir().unwrap();
        let restored = load(dir.path(), Uuid::new_v4()).await.unwrap();
        assert!(restored.is_empty());
    }
}
