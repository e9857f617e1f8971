//! On-disk representation of `.cosmos/policy.json` and its atomic
//! read/write contract (§3, §6): always valid JSON or absent, mode 0600,
//! replace-only via a sibling temp file + rename so a crash mid-write is
//! never observable as a partial file.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use cosmos_protocol::Effect;
use serde::Deserialize;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::PolicyError;

pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideReason {
    Override,
    UserGrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub effect: Effect,
    pub reason: OverrideReason,
    pub timestamp: DateTime<Utc>,
}

/// `agent -> normalized_key -> entry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOverrideFile {
    pub version: u32,
    #[serde(default)]
    pub overrides: HashMap<String, HashMap<String, OverrideEntry>>,
}

impl Default for PolicyOverrideFile {
    fn default() -> Self {
        empty()
    }
}

pub fn empty() -> PolicyOverrideFile {
    PolicyOverrideFile {
        version: CURRENT_VERSION,
        overrides: HashMap::new(),
    }
}

/// Load the override file at `path`. A missing file is not an error: it is
/// equivalent to an empty override set. A present-but-malformed file is a
/// [`PolicyError`] (this is the `FatalError` case from §7 at the caller's
/// discretion — bootstrap should treat it as tampering/disk failure).
pub fn load(path: &Path) -> Result<PolicyOverrideFile, PolicyError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(empty()),
        Err(e) => return Err(e.into()),
    };
    let file: PolicyOverrideFile = serde_json::from_slice(&bytes)?;
    if file.version != CURRENT_VERSION {
        return Err(PolicyError::UnsupportedVersion(file.version));
    }
    Ok(file)
}

/// Atomically replace `path` with `file`'s contents: write to a sibling temp
/// file with mode 0600, then rename over the target. `NamedTempFile` in the
/// target directory plus `persist` guarantees the rename is same-filesystem
/// and therefore atomic.
pub fn save(path: &Path, file: &PolicyOverrideFile) -> Result<(), PolicyError> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(&dir)?;

    let json = serde_json::to_vec_pretty(file)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    set_owner_only(tmp.path())?;
    std::io::Write::write_all(&mut tmp, &json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    set_owner_only(path)?;
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let file = load(&path).unwrap();
        assert_eq!(file.version, CURRENT_VERSION);
        assert!(file.overrides.is_empty());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".cosmos").join("policy.json");

        let mut file = empty();
        file.overrides.entry("agent-a".to_string()).or_default().insert(
            "fs:read:/a/b".to_string(),
            OverrideEntry {
                effect: Effect::Allow,
                reason: OverrideReason::Override,
                timestamp: Utc::now(),
            },
        );
        save(&path, &file).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.overrides["agent-a"]["fs:read:/a/b"].reason, OverrideReason::Override);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, br#"{"version":2,"overrides":{}}"#).unwrap();
        assert!(matches!(load(&path), Err(PolicyError::UnsupportedVersion(2))));
    }
}
