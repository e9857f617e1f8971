//! Data shape produced by the VFS snapshotter before a destructive write or
//! delete, and consumed when restoring an interaction.

use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Sentinel interaction id used when a snapshot happens outside an active
/// LLM turn (e.g. startup maintenance).
pub const NO_INTERACTION: &str = "no-interaction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOperation {
    Write,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub interaction_id: String,
    pub path_canonical: PathBuf,
    pub content_hash: Option<String>,
    pub operation: SnapshotOperation,
    pub was_new_file: bool,
    pub timestamp: DateTime<Utc>,
}
