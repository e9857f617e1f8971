//! Read-only access to a session's audit file, for a future history UI or
//! for `/context`-style introspection (§4.3 [SUPPLEMENT]).

use std::path::Path;

use cosmos_protocol::AuditRecord;
use uuid::Uuid;

use crate::error::AuditError;

pub struct AuditReader;

impl AuditReader {
    /// Return the last `n` records written for `session_id` under
    /// `project_root`, oldest first. Malformed lines are skipped with a
    /// warning rather than failing the whole read — the file is append-only
    /// application data, not a format we need to be strict about on replay.
    pub async fn tail(project_root: &Path, session_id: Uuid, n: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let path = project_root.join(".cosmos").join(format!("audit-{session_id}.jsonl"));
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in contents.lines() {
            match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("audit reader: skipping malformed line: {e}"),
            }
        }

        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::AuditLog;
    use cosmos_protocol::DecisionSource;
    use cosmos_protocol::Effect;
    use cosmos_protocol::PermissionKey;
    use tempfile::tempdir;

    fn record(session_id: Uuid, tool: &str) -> AuditRecord {
        AuditRecord {
            timestamp: chrono::Utc::now(),
            session_id,
            agent: "agent-a".to_string(),
            tool: tool.to_string(),
            permission_key: "net:http".parse::<PermissionKey>().unwrap(),
            decision_effect: Effect::Allow,
            decision_source: DecisionSource::Manifest,
            arguments_redacted: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn tail_returns_most_recent_n_in_order() {
        let dir = tempdir().unwrap();
        let session_id = Uuid::new_v4();
        let log = AuditLog::open(dir.path(), session_id).await.unwrap();
        for tool in ["a", "b", "c"] {
            log.append(&record(session_id, tool)).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let tail = AuditReader::tail(dir.path(), session_id, 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].tool, "b");
        assert_eq!(tail[1].tool, "c");
    }

    #[tokio::test]
    async fn missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        let tail = AuditReader::tail(dir.path(), Uuid::new_v4(), 10).await.unwrap();
        assert!(tail.is_empty());
    }
}
