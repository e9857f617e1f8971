//! Capability namespace logic (§4.6): `fs`, `http`, `storage`, `ui`. Kept
//! independent of the `deno_core` op bindings in `runtime.rs` so the
//! permission-check-then-side-effect contract can be unit tested without a
//! live isolate.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use cosmos_policy::Evaluator;
use cosmos_protocol::PermissionKey;
use cosmos_vfs::canonicalize_for_write;
use serde::Deserialize;
use serde::Serialize;

use crate::error::CapabilityError;

const MAX_REDIRECTS: usize = 10;
const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Per-invocation context threaded through every capability call: who is
/// calling, under which permission mode allowances, and where side effects
/// should be recorded.
#[derive(Clone)]
pub struct CapabilityContext {
    pub agent: String,
    pub tool: String,
    pub cwd: PathBuf,
    pub storage_dir: PathBuf,
    pub evaluator: Arc<Evaluator>,
    pub manifest_rules: Vec<cosmos_protocol::PermissionRule>,
    /// Test-only escape hatch for `http.get`/`http.post`'s loopback/private
    /// address rejection.
    pub loopback_allowed: bool,
    /// Wired by the conversation loop to receive `ui.emit` progress
    /// messages as `ToolExecutionEvent`s; `None` silently drops them.
    pub ui_sink: Option<tokio::sync::mpsc::UnboundedSender<String>>,
    /// Records a pre-image of every destructive fs call under whichever
    /// interaction id the loop currently has active.
    pub snapshotter: Arc<cosmos_vfs::Snapshotter>,
}

/// Evaluate `key` against this context's manifest rules and translate
/// anything other than `Allow` into the exact capability-layer error the
/// spec requires — prompts never surface from inside a capability, only a
/// denial message noting approval would be required.
fn check_permission(ctx: &CapabilityContext, key: PermissionKey) -> Result<(), CapabilityError> {
    let decision = ctx.evaluator.evaluate(&ctx.agent, &key, &ctx.manifest_rules);
    match decision.effect {
        cosmos_protocol::Effect::Allow => Ok(()),
        cosmos_protocol::Effect::Deny => Err(CapabilityError::Denied(key)),
        cosmos_protocol::Effect::PromptOnce | cosmos_protocol::Effect::PromptAlways => {
            Err(CapabilityError::RequiresApproval(key))
        }
    }
}

fn fs_key(action: &str, canonical: &Path) -> PermissionKey {
    PermissionKey::new("fs", action, Some(canonical.display().to_string()))
}

pub fn fs_read(ctx: &CapabilityContext, path: &str) -> Result<String, CapabilityError> {
    let canonical = canonicalize_for_write(Path::new(path), &ctx.cwd).map_err(|e| CapabilityError::Io(to_io(e)))?;
    check_permission(ctx, fs_key("read", &canonical))?;
    Ok(std::fs::read_to_string(&canonical)?)
}

pub fn fs_write(ctx: &CapabilityContext, path: &str, content: &str) -> Result<(), CapabilityError> {
    let canonical = canonicalize_for_write(Path::new(path), &ctx.cwd).map_err(|e| CapabilityError::Io(to_io(e)))?;
    check_permission(ctx, fs_key("write", &canonical))?;

    if let Some(parent) = canonical.parent() {
        std::fs::create_dir_all(parent)?;
        set_owner_only(parent)?;
    }

    // Re-canonicalize and re-check after mkdir to defeat a TOCTOU symlink
    // swap introduced between the two steps.
    let recanonical = canonicalize_for_write(&canonical, &ctx.cwd).map_err(|e| CapabilityError::Io(to_io(e)))?;
    check_permission(ctx, fs_key("write", &recanonical))?;

    ctx.snapshotter.snapshot(&recanonical, cosmos_protocol::SnapshotOperation::Write)?;

    let mut open_options = std::fs::OpenOptions::new();
    open_options.create(true).truncate(true).write(true);
    no_follow(&mut open_options);
    let mut file = open_options.open(&recanonical)?;
    std::io::Write::write_all(&mut file, content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FsEntry {
    pub name: String,
    pub size: u64,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    #[serde(rename = "modTime")]
    pub mod_time: String,
}

pub fn fs_stat(ctx: &CapabilityContext, path: &str) -> Result<FsEntry, CapabilityError> {
    let canonical = canonicalize_for_write(Path::new(path), &ctx.cwd).map_err(|e| CapabilityError::Io(to_io(e)))?;
    check_permission(ctx, fs_key("read", &canonical))?;
    entry_for(&canonical)
}

pub fn fs_list(ctx: &CapabilityContext, path: &str) -> Result<Vec<FsEntry>, CapabilityError> {
    let canonical = canonicalize_for_write(Path::new(path), &ctx.cwd).map_err(|e| CapabilityError::Io(to_io(e)))?;
    check_permission(ctx, fs_key("read", &canonical))?;

    let mut entries = Vec::new();
    for dir_entry in std::fs::read_dir(&canonical)? {
        entries.push(entry_for(&dir_entry?.path())?);
    }
    Ok(entries)
}

fn entry_for(path: &Path) -> Result<FsEntry, CapabilityError> {
    let metadata = std::fs::metadata(path)?;
    Ok(FsEntry {
        name: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        size: metadata.len(),
        is_dir: metadata.is_dir(),
        mod_time: chrono::DateTime::<chrono::Utc>::from(metadata.modified()?).to_rfc3339(),
    })
}

pub fn fs_unlink(ctx: &CapabilityContext, path: &str) -> Result<(), CapabilityError> {
    let canonical = canonicalize_for_write(Path::new(path), &ctx.cwd).map_err(|e| CapabilityError::Io(to_io(e)))?;
    check_permission(ctx, fs_key("write", &canonical))?;

    #[cfg(unix)]
    {
        let metadata = std::fs::symlink_metadata(&canonical)?;
        if metadata.file_type().is_symlink() {
            return Err(CapabilityError::SymlinkRefused);
        }
    }
    ctx.snapshotter.snapshot(&canonical, cosmos_protocol::SnapshotOperation::Delete)?;
    std::fs::remove_file(&canonical)?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: std::collections::BTreeMap<String, String>,
}

fn validate_http_url(ctx: &CapabilityContext, url: &str) -> Result<reqwest::Url, CapabilityError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| CapabilityError::InvalidUrl(url.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CapabilityError::SchemeNotAllowed(parsed.scheme().to_string()));
    }
    if !ctx.loopback_allowed && host_is_disallowed(&parsed) {
        return Err(CapabilityError::HostNotAllowed);
    }
    Ok(parsed)
}

fn host_is_disallowed(url: &reqwest::Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(ip)) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback() || (ip.segments()[0] & 0xffc0) == 0xfe80,
        Some(url::Host::Domain(domain)) => domain == "localhost",
        None => true,
    }
}

pub async fn http_get(
    ctx: &CapabilityContext,
    url: &str,
    headers: Option<&std::collections::BTreeMap<String, String>>,
) -> Result<HttpResponse, CapabilityError> {
    let parsed = validate_http_url(ctx, url)?;
    check_permission(ctx, PermissionKey::new("net", "http", Some(url.to_string())))?;

    let client = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).timeout(HTTP_TIMEOUT).build()?;

    let mut current = parsed;
    for _ in 0..=MAX_REDIRECTS {
        let mut request = client.get(current.clone());
        if let Some(headers) = headers {
            for (k, v) in headers {
                request = request.header(k, v);
            }
        }
        let response = request.send().await?;
        if response.status().is_redirection()
            && let Some(location) = response.headers().get(reqwest::header::LOCATION)
        {
            let next = current.join(location.to_str().unwrap_or_default()).map_err(|_| CapabilityError::InvalidUrl(url.to_string()))?;
            validate_http_url(ctx, next.as_str())?;
            check_permission(ctx, PermissionKey::new("net", "http", Some(next.to_string())))?;
            current = next;
            continue;
        }
        return finish_http_response(response).await;
    }
    Err(CapabilityError::TooManyRedirects)
}

pub async fn http_post(
    ctx: &CapabilityContext,
    url: &str,
    body: &str,
    headers: Option<&std::collections::BTreeMap<String, String>>,
) -> Result<HttpResponse, CapabilityError> {
    let parsed = validate_http_url(ctx, url)?;
    check_permission(ctx, PermissionKey::new("net", "http", Some(url.to_string())))?;

    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let mut request = client.post(parsed).body(body.to_string());
    if let Some(headers) = headers {
        for (k, v) in headers {
            request = request.header(k, v);
        }
    }
    let response = request.send().await?;
    finish_http_response(response).await
}

async fn finish_http_response(response: reqwest::Response) -> Result<HttpResponse, CapabilityError> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_lowercase(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    let bytes = response.bytes().await?;
    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(CapabilityError::ResponseTooLarge);
    }
    Ok(HttpResponse { status, body: String::from_utf8_lossy(&bytes).into_owned(), headers })
}

fn validate_storage_agent(agent: &str) -> Result<(), CapabilityError> {
    let has_separator = agent.contains('/') || agent.contains('\\');
    if agent.is_empty() || agent == "." || agent == ".." || has_separator {
        return Err(CapabilityError::InvalidStorageAgent(agent.to_string()));
    }
    Ok(())
}

pub fn storage_get(ctx: &CapabilityContext) -> Result<serde_json::Value, CapabilityError> {
    validate_storage_agent(&ctx.agent)?;
    check_permission_broad(ctx, "storage", "read")?;

    let path = ctx.storage_dir.join(format!("{}.json", ctx.agent));
    match std::fs::read(&path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Value::Null),
        Err(e) => Err(e.into()),
    }
}

pub fn storage_set(ctx: &CapabilityContext, value: &serde_json::Value) -> Result<(), CapabilityError> {
    validate_storage_agent(&ctx.agent)?;
    check_permission_broad(ctx, "storage", "write")?;

    std::fs::create_dir_all(&ctx.storage_dir)?;
    set_owner_only(&ctx.storage_dir)?;

    let path = ctx.storage_dir.join(format!("{}.json", ctx.agent));
    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&ctx.storage_dir)?;
    set_owner_only(tmp.path())?;
    std::io::Write::write_all(&mut tmp, &json)?;
    tmp.persist(&path).map_err(|e| e.error)?;
    set_owner_only(&path)?;
    Ok(())
}

fn check_permission_broad(ctx: &CapabilityContext, resource: &str, action: &str) -> Result<(), CapabilityError> {
    check_permission(ctx, PermissionKey::new(resource, action, None))
}

/// `ui.emit`: always allowed, silently dropped if no sink is wired.
pub fn ui_emit(sink: Option<&tokio::sync::mpsc::UnboundedSender<String>>, message: String) {
    if let Some(sink) = sink {
        let _ = sink.send(message);
    }
}

fn to_io(e: cosmos_vfs::VfsError) -> std::io::Error {
    match e {
        cosmos_vfs::VfsError::Io { source, .. } => source,
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn no_follow(options: &mut std::fs::OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.custom_flags(libc::O_NOFOLLOW);
}

#[cfg(not(unix))]
fn no_follow(_options: &mut std::fs::OpenOptions) {}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmos_protocol::PermissionMode;
    use cosmos_protocol::PermissionRule;
    use tempfile::tempdir;

    fn ctx(dir: &Path, rules: Vec<PermissionRule>) -> CapabilityContext {
        let evaluator = Evaluator::load(dir.join(".cosmos").join("policy.json"), dir.to_path_buf()).unwrap();
        let snapshotter = cosmos_vfs::Snapshotter::open(dir.to_path_buf(), uuid::Uuid::nil()).unwrap();
        CapabilityContext {
            agent: "agent-a".to_string(),
            tool: "tool".to_string(),
            cwd: dir.to_path_buf(),
            storage_dir: dir.join(".cosmos").join("storage"),
            evaluator: Arc::new(evaluator),
            manifest_rules: rules,
            loopback_allowed: true,
            ui_sink: None,
            snapshotter: Arc::new(snapshotter),
        }
    }

    fn rule(key: &str, mode: PermissionMode) -> PermissionRule {
        PermissionRule { key: key.parse().unwrap(), mode }
    }

    #[test]
    fn fs_read_denied_without_matching_rule() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"secret").unwrap();
        let context = ctx(dir.path(), vec![]);
        let err = fs_read(&context, "a.txt").unwrap_err();
        assert!(matches!(err, CapabilityError::Denied(_)));
    }

    #[test]
    fn fs_read_allowed_with_matching_rule_returns_contents() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"secret").unwrap();
        let canonical = dir.path().canonicalize().unwrap().join("a.txt");
        let context = ctx(dir.path(), vec![rule(&format!("fs:read:{}", canonical.display()), PermissionMode::Allow)]);
        assert_eq!(fs_read(&context, "a.txt").unwrap(), "secret");
    }

    #[test]
    fn fs_write_creates_parent_and_writes_content() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("sub").join("b.txt");
        let context = ctx(dir.path(), vec![rule("fs:write:**", PermissionMode::Allow)]);
        fs_write(&context, target.to_str().unwrap(), "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
    }

    #[test]
    fn fs_write_over_existing_file_snapshots_the_pre_image() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("b.txt");
        std::fs::write(&target, "original").unwrap();
        let context = ctx(dir.path(), vec![rule("fs:write:**", PermissionMode::Allow)]);

        context.snapshotter.begin_interaction("turn-1".to_string());
        fs_write(&context, target.to_str().unwrap(), "overwritten").unwrap();

        let (restored, failure) = context.snapshotter.restore_interaction("turn-1");
        assert!(failure.is_none());
        assert_eq!(restored, vec![target.canonicalize().unwrap()]);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn fs_unlink_refuses_symlink() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real.txt");
        std::fs::write(&real, b"x").unwrap();
        let link = dir.path().join("link.txt");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&real, &link).unwrap();

        #[cfg(unix)]
        {
            let context = ctx(dir.path(), vec![rule("fs:write:**", PermissionMode::Allow)]);
            let err = fs_unlink(&context, link.to_str().unwrap()).unwrap_err();
            assert!(matches!(err, CapabilityError::SymlinkRefused));
        }
    }

    #[test]
    fn storage_rejects_path_separator_in_agent_name() {
        let dir = tempdir().unwrap();
        let evaluator = Evaluator::load(dir.path().join(".cosmos").join("policy.json"), dir.path().to_path_buf()).unwrap();
        let snapshotter = cosmos_vfs::Snapshotter::open(dir.path().to_path_buf(), uuid::Uuid::nil()).unwrap();
        let context = CapabilityContext {
            agent: "../etc".to_string(),
            tool: "tool".to_string(),
            cwd: dir.path().to_path_buf(),
            storage_dir: dir.path().join("storage"),
            evaluator: Arc::new(evaluator),
            manifest_rules: vec![rule("storage:read", PermissionMode::Allow)],
            loopback_allowed: true,
            ui_sink: None,
            snapshotter: Arc::new(snapshotter),
        };
        let err = storage_get(&context).unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidStorageAgent(_)));
    }

    #[test]
    fn storage_round_trips_through_set_and_get() {
        let dir = tempdir().unwrap();
        let context = ctx(
            dir.path(),
            vec![rule("storage:read", PermissionMode::Allow), rule("storage:write", PermissionMode::Allow)],
        );
        storage_set(&context, &serde_json::json!({"count": 1})).unwrap();
        assert_eq!(storage_get(&context).unwrap(), serde_json::json!({"count": 1}));
    }

    #[test]
    fn http_rejects_non_http_scheme() {
        let dir = tempdir().unwrap();
        let context = ctx(dir.path(), vec![rule("net:http", PermissionMode::Allow)]);
        let err = validate_http_url(&context, "file:///etc/passwd").unwrap_err();
        assert!(matches!(err, CapabilityError::SchemeNotAllowed(_)));
    }

    #[test]
    fn ui_emit_is_dropped_silently_without_a_sink() {
        ui_emit(None, "progress".to_string());
    }

    #[test]
    fn ui_emit_forwards_to_sink_when_wired() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        ui_emit(Some(&tx), "progress".to_string());
        assert_eq!(rx.try_recv().unwrap(), "progress");
    }
}
