//! Host-side glue for the `cosmos` binary: a trivial streaming provider
//! (no concrete LLM wire format is shipped, per the kernel's own provider
//! boundary) and the manifest-to-registry loader that turns
//! `<project>/.cosmos/agents/<agent>/*.json` into registered sandbox tools.

use std::path::Path;
use std::path::PathBuf;

use cosmos_core::Config;
use cosmos_core::Prompt;
use cosmos_core::Provider;
use cosmos_core::ResponseEvent;
use cosmos_core::ResponseStream;
use cosmos_core::StopReason;
use cosmos_manifest::ManifestLoader;
use cosmos_manifest::VerificationConfig;
use cosmos_sandbox::ToolRegistry;
use cosmos_sandbox::ToolSpec;
use tokio::sync::mpsc;

const AGENTS_DIR: &str = "agents";

/// A provider that turns every user turn into a one-shot text reply
/// instead of calling out to a real model. Keeps the host loop runnable
/// end to end without committing this kernel to any particular wire
/// format.
#[derive(Default)]
pub struct EchoProvider;

impl Provider for EchoProvider {
    fn send(&self, request: Prompt) -> ResponseStream {
        let reply = request
            .messages
            .last()
            .and_then(|m| m.text.clone())
            .unwrap_or_else(|| "(no input)".to_string());

        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move {
            let _ = tx.send(Ok(ResponseEvent::TextDelta { text: format!("echo: {reply}") })).await;
            let _ = tx.send(Ok(ResponseEvent::MessageStop { stop_reason: StopReason::EndTurn })).await;
        });
        ResponseStream::new(rx)
    }
}

/// Walk `<project_root>/.cosmos/agents/<agent>/*.json`, load every
/// manifest found, and register one [`ToolSpec`] per declared function.
/// A missing `agents` directory registers zero tools rather than erroring
/// — a fresh project has none yet.
pub fn register_manifests(project_root: &Path, config: &Config, registry: &ToolRegistry) -> anyhow::Result<usize> {
    let agents_dir = project_root.join(".cosmos").join(AGENTS_DIR);
    if !agents_dir.is_dir() {
        return Ok(0);
    }

    let verification = VerificationConfig {
        require_signature: config.require_manifest_signature,
        trusted_public_keys: config.trusted_public_keys.clone(),
    };
    let loader = ManifestLoader::new();
    let mut registered = 0usize;

    for entry in std::fs::read_dir(&agents_dir)? {
        let entry = entry?;
        let agent_dir = entry.path();
        if !agent_dir.is_dir() {
            continue;
        }
        let agent = entry.file_name().to_string_lossy().into_owned();

        for (manifest_path, result) in loader.load_dir(&agent_dir, &verification)? {
            let manifest = match result {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!("skipping manifest {}: {e}", manifest_path.display());
                    continue;
                }
            };
            let source_path: PathBuf = agent_dir.join(&manifest.entry);
            let timeout_ms = Some(manifest.timeout_duration.as_millis() as u64);

            for function in &manifest.functions {
                let spec = ToolSpec {
                    function_name: function.name.clone(),
                    agent: agent.clone(),
                    source_path: source_path.clone(),
                    timeout_ms,
                    permissions: manifest.parsed_permissions.clone(),
                };
                match registry.register(spec) {
                    Ok(()) => registered += 1,
                    Err(e) => tracing::warn!("could not register {}::{}: {e}", manifest.name, function.name),
                }
            }
        }
    }

    Ok(registered)
}
