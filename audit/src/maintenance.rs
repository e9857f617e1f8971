//! Startup maintenance: deletes session audit files, snapshot directories,
//! and session files older than the retention window (§4.3). Errors are
//! logged but never block startup, matching the spec's "non-fatal" wording.

use std::path::Path;
use std::time::Duration;
use std::time::SystemTime;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Sweep `.cosmos/audit-*.jsonl`, `.cosmos/snapshots/*`, and
/// `.cosmos/sessions/*` for entries whose mtime is older than `retention`.
/// Returns the count of entries removed; individual failures are logged via
/// `tracing::warn!` and otherwise ignored.
pub async fn sweep(project_root: &Path, retention: Duration) -> usize {
    let cosmos_dir = project_root.join(".cosmos");
    let mut removed = 0;

    removed += sweep_flat_glob(&cosmos_dir, "audit-", retention).await;
    removed += sweep_dir_entries(&cosmos_dir.join("snapshots"), retention).await;
    removed += sweep_dir_entries(&cosmos_dir.join("sessions"), retention).await;

    removed
}

async fn sweep_flat_glob(dir: &Path, prefix: &str, retention: Duration) -> usize {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!("audit maintenance: could not read {}: {e}", dir.display());
            return 0;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("audit maintenance: error iterating {}: {e}", dir.display());
                break;
            }
        };
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix) {
            continue;
        }
        if is_stale(&entry.path(), retention).await && remove_path(&entry.path()).await {
            removed += 1;
        }
    }
    removed
}

async fn sweep_dir_entries(dir: &Path, retention: Duration) -> usize {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!("audit maintenance: could not read {}: {e}", dir.display());
            return 0;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("audit maintenance: error iterating {}: {e}", dir.display());
                break;
            }
        };
        if is_stale(&entry.path(), retention).await && remove_path(&entry.path()).await {
            removed += 1;
        }
    }
    removed
}

async fn is_stale(path: &Path, retention: Duration) -> bool {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!("audit maintenance: could not stat {}: {e}", path.display());
            return false;
        }
    };
    let mtime = match metadata.modified() {
        Ok(mtime) => mtime,
        Err(e) => {
            tracing::warn!("audit maintenance: mtime unavailable for {}: {e}", path.display());
            return false;
        }
    };
    match SystemTime::now().duration_since(mtime) {
        Ok(age) => age > retention,
        Err(_) => false,
    }
}

async fn remove_path(path: &Path) -> bool {
    let result = if path.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("audit maintenance: failed to remove {}: {e}", path.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sweep_is_noop_when_cosmos_dir_absent() {
        let dir = tempdir().unwrap();
        let removed = sweep(dir.path(), DEFAULT_RETENTION).await;
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn sweep_removes_stale_audit_file_but_keeps_fresh_one() {
        let dir = tempdir().unwrap();
        let cosmos_dir = dir.path().join(".cosmos");
        tokio::fs::create_dir_all(&cosmos_dir).await.unwrap();

        let stale = cosmos_dir.join("audit-stale.jsonl");
        let fresh = cosmos_dir.join("audit-fresh.jsonl");
        tokio::fs::write(&stale, b"{}").await.unwrap();
        tokio::fs::write(&fresh, b"{}").await.unwrap();

        // Backdate the stale file's mtime well past the retention window.
        let old = SystemTime::now() - Duration::from_secs(31 * 24 * 60 * 60);
        filetime::set_file_mtime(&stale, filetime::FileTime::from_system_time(old)).unwrap();

        let removed = sweep(dir.path(), DEFAULT_RETENTION).await;
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }
}
