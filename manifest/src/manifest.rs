use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use cosmos_protocol::PermissionKey;
use cosmos_protocol::PermissionMode;
use cosmos_protocol::PermissionRule;
use ed25519_dalek::VerifyingKey;
use serde_json::Value;

use crate::duration::parse_duration;
use crate::error::ManifestError;
use crate::signing::canonical_payload;
use crate::signing::decode_signature;
use crate::signing::verify_against_any;
use crate::types::FunctionDescriptor;
use crate::types::Manifest;
use crate::types::ParamDescriptor;
use crate::types::ParamType;

const TOP_LEVEL_FIELDS: &[&str] = &[
    "name",
    "version",
    "entry",
    "functions",
    "permissions",
    "timeout",
    "permissions_signature",
];

const DEFAULT_TIMEOUT: &str = "30s";
const MAX_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Input to [`ManifestLoader::load`]: whether a signature is mandatory and
/// which keys are trusted to have produced it.
#[derive(Debug, Clone, Default)]
pub struct VerificationConfig {
    pub require_signature: bool,
    pub trusted_public_keys: Vec<VerifyingKey>,
}

/// Parses, validates, and (conditionally) signature-verifies tool
/// manifests. Trusted keys may come from the caller's [`VerificationConfig`]
/// or from a process-wide embedded set configured at startup.
pub struct ManifestLoader {
    embedded_trusted_keys: Vec<VerifyingKey>,
}

impl Default for ManifestLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestLoader {
    pub fn new() -> Self {
        Self {
            embedded_trusted_keys: Vec::new(),
        }
    }

    pub fn with_embedded_trusted_keys(keys: Vec<VerifyingKey>) -> Self {
        Self {
            embedded_trusted_keys: keys,
        }
    }

    pub fn load(&self, bytes: &[u8], config: &VerificationConfig) -> Result<Manifest, ManifestError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let object = value.as_object().ok_or(ManifestError::NotAnObject)?;

        for key in object.keys() {
            if !TOP_LEVEL_FIELDS.contains(&key.as_str()) {
                return Err(ManifestError::UnknownField(key.clone()));
            }
        }

        let name = required_str(object, "name")?;
        validate_tool_name(&name)?;

        let version = required_str(object, "version")?;
        let entry = required_str(object, "entry")?;

        let functions_value = object
            .get("functions")
            .ok_or(ManifestError::MissingField("functions"))?;
        let functions = parse_functions(functions_value)?;

        let permissions_value = object
            .get("permissions")
            .ok_or(ManifestError::MissingField("permissions"))?;
        let (raw_permissions, parsed_permissions) = parse_permissions(permissions_value)?;

        let timeout_raw = match object.get("timeout") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(ManifestError::WrongType("timeout")),
            None => DEFAULT_TIMEOUT.to_string(),
        };
        let timeout_duration = parse_duration(&timeout_raw)?.min(MAX_TIMEOUT);

        let canonical_bytes = canonical_payload(&raw_permissions);

        let permissions_signature = if config.require_signature {
            let sig_b64 = object
                .get("permissions_signature")
                .and_then(Value::as_str)
                .ok_or(ManifestError::SignatureRequired)?;
            let signature = decode_signature(sig_b64)?;
            let trusted: Vec<VerifyingKey> = config
                .trusted_public_keys
                .iter()
                .chain(self.embedded_trusted_keys.iter())
                .copied()
                .collect();
            verify_against_any(&canonical_bytes, &signature, &trusted)?;
            Some(signature.to_bytes().to_vec())
        } else if let Some(sig_b64) = object.get("permissions_signature").and_then(Value::as_str) {
            let signature = decode_signature(sig_b64)?;
            Some(signature.to_bytes().to_vec())
        } else {
            None
        };

        Ok(Manifest {
            name,
            version,
            entry,
            functions,
            parsed_permissions,
            timeout_duration,
            permissions_signature,
        })
    }

    /// Load every `*.json` file in `dir`, collecting per-file errors instead
    /// of aborting the whole directory on the first bad manifest.
    pub fn load_dir(
        &self,
        dir: &Path,
        config: &VerificationConfig,
    ) -> std::io::Result<Vec<(PathBuf, Result<Manifest, ManifestError>)>> {
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let result = self.load(&bytes, config);
            results.push((path, result));
        }
        Ok(results)
    }
}

fn required_str(object: &serde_json::Map<String, Value>, field: &'static str) -> Result<String, ManifestError> {
    match object.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ManifestError::WrongType(field)),
        None => Err(ManifestError::MissingField(field)),
    }
}

/// `name` matches `[a-z0-9][a-z0-9_-]*`.
pub fn validate_tool_name(name: &str) -> Result<(), ManifestError> {
    let valid = {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {
                chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            }
            _ => false,
        }
    };
    if valid {
        Ok(())
    } else {
        Err(ManifestError::InvalidName(name.to_string()))
    }
}

/// Function names must be valid JS identifiers: `[a-zA-Z_$][a-zA-Z0-9_$]*`.
fn is_valid_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

fn parse_functions(value: &Value) -> Result<Vec<FunctionDescriptor>, ManifestError> {
    let array = value.as_array().ok_or(ManifestError::WrongType("functions"))?;
    let mut seen = HashSet::new();
    let mut functions = Vec::with_capacity(array.len());

    for entry in array {
        let obj = entry.as_object().ok_or(ManifestError::WrongType("functions"))?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or(ManifestError::MissingField("functions[].name"))?
            .to_string();

        if !is_valid_js_identifier(&name) {
            return Err(ManifestError::InvalidFunctionName(name));
        }
        if !seen.insert(name.clone()) {
            return Err(ManifestError::DuplicateFunctionName(name));
        }

        let params_value = obj
            .get("params")
            .ok_or(ManifestError::MissingField("functions[].params"))?;
        let params_array = params_value
            .as_array()
            .ok_or(ManifestError::WrongType("functions[].params"))?;

        let mut params = Vec::with_capacity(params_array.len());
        for param in params_array {
            let param_obj = param.as_object().ok_or(ManifestError::WrongType("functions[].params[]"))?;
            let param_name = param_obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or(ManifestError::MissingField("functions[].params[].name"))?
                .to_string();
            let type_str = param_obj
                .get("type")
                .and_then(Value::as_str)
                .ok_or(ManifestError::MissingField("functions[].params[].type"))?;
            let param_type = ParamType::parse(type_str).ok_or_else(|| {
                ManifestError::InvalidParamType(type_str.to_string(), name.clone(), param_name.clone())
            })?;
            let required = param_obj
                .get("required")
                .and_then(Value::as_bool)
                .ok_or(ManifestError::MissingField("functions[].params[].required"))?;
            params.push(ParamDescriptor {
                name: param_name,
                param_type,
                required,
            });
        }

        let return_str = obj
            .get("returns")
            .and_then(Value::as_str)
            .ok_or(ManifestError::MissingField("functions[].returns"))?;
        let return_type = ParamType::parse(return_str)
            .ok_or_else(|| ManifestError::InvalidReturnType(return_str.to_string(), name.clone()))?;

        functions.push(FunctionDescriptor {
            name,
            params,
            return_type,
        });
    }

    Ok(functions)
}

fn parse_permissions(
    value: &Value,
) -> Result<(BTreeMap<String, String>, Vec<PermissionRule>), ManifestError> {
    let object = value.as_object().ok_or(ManifestError::WrongType("permissions"))?;
    let mut raw = BTreeMap::new();
    let mut parsed = Vec::with_capacity(object.len());

    for (key_str, mode_value) in object {
        let mode_str = mode_value
            .as_str()
            .ok_or(ManifestError::WrongType("permissions[key]"))?;
        let mode = match mode_str {
            "allow" => PermissionMode::Allow,
            "deny" => PermissionMode::Deny,
            "request_once" => PermissionMode::RequestOnce,
            "request_always" => PermissionMode::RequestAlways,
            other => {
                return Err(ManifestError::InvalidPermissionMode(
                    other.to_string(),
                    key_str.clone(),
                ));
            }
        };
        let key: PermissionKey = key_str.parse()?;
        raw.insert(key_str.clone(), mode_str.to_string());
        parsed.push(PermissionRule { key, mode });
    }

    Ok((raw, parsed))
}
