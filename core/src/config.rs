//! Configuration: `<project>/.cosmos/config.toml`, read once at startup and
//! merged onto defaults the same way the teacher reads `CODEX_HOME/config.toml`
//! — missing file is not an error, malformed file is.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;

use crate::error::CosmosErr;

const CONFIG_TOML_FILE: &str = "config.toml";
const DEFAULT_CONTEXT_WINDOW: u64 = 128_000;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETENTION_DAYS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigToml {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    context_window: Option<u64>,
    #[serde(default)]
    default_tool_timeout_secs: Option<u64>,
    #[serde(default)]
    retention_days: Option<u64>,
    #[serde(default)]
    require_manifest_signature: bool,
    #[serde(default)]
    trusted_public_keys: Vec<String>,
}

/// Resolved application configuration for one project.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub model: String,
    pub context_window: u64,
    pub default_tool_timeout: Duration,
    pub retention: Duration,
    pub require_manifest_signature: bool,
    pub trusted_public_keys: Vec<VerifyingKey>,
}

impl Config {
    /// Read `<project_root>/.cosmos/config.toml`. A missing file loads
    /// defaults; a malformed one is an error.
    pub fn load(project_root: &Path) -> Result<Self, CosmosErr> {
        let config_path = project_root.join(".cosmos").join(CONFIG_TOML_FILE);
        let parsed: ConfigToml = match std::fs::read_to_string(&config_path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config.toml at {}, using defaults", config_path.display());
                ConfigToml::default()
            }
            Err(e) => return Err(e.into()),
        };

        let trusted_public_keys = parsed
            .trusted_public_keys
            .iter()
            .map(|encoded| decode_public_key(encoded))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            project_root: project_root.to_path_buf(),
            model: parsed.model.unwrap_or_else(|| "default".to_string()),
            context_window: parsed.context_window.unwrap_or(DEFAULT_CONTEXT_WINDOW),
            default_tool_timeout: Duration::from_secs(parsed.default_tool_timeout_secs.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS)),
            retention: Duration::from_secs(parsed.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS) * 24 * 60 * 60),
            require_manifest_signature: parsed.require_manifest_signature,
            trusted_public_keys,
        })
    }
}

fn decode_public_key(encoded: &str) -> Result<VerifyingKey, CosmosErr> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CosmosErr::Fatal(format!("invalid trusted_public_keys entry: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CosmosErr::Fatal("trusted public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&array).map_err(|e| CosmosErr::Fatal(format!("invalid trusted public key: {e}")))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config.context_window, DEFAULT_CONTEXT_WINDOW);
        assert!(!config.require_manifest_signature);
        assert!(config.trusted_public_keys.is_empty());
    }

    #[test]
    fn parses_declared_fields() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(".cosmos")).expect("mkdir");
        std::fs::write(
            dir.path().join(".cosmos").join(CONFIG_TOML_FILE),
            "model = \"custom\"\ncontext_window = 64000\ndefault_tool_timeout_secs = 10\n",
        )
        .expect("write");

        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config.model, "custom");
        assert_eq!(config.context_window, 64_000);
        assert_eq!(config.default_tool_timeout, Duration::from_secs(10));
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(".cosmos")).expect("mkdir");
        std::fs::write(dir.path().join(".cosmos").join(CONFIG_TOML_FILE), "not valid toml =====").expect("write");
        assert!(Config::load(dir.path()).is_err());
    }
}
