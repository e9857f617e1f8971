//! `RegisterTool` (§4.5): validates names up front; no compilation happens
//! at registration time, only at first `Execute` (lazy compile, §runtime).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use regex_lite::Regex;

use crate::error::SandboxError;

/// One entry per registered tool function. `source_path` is read lazily on
/// first execution.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub function_name: String,
    pub agent: String,
    pub source_path: PathBuf,
    pub timeout_ms: Option<u64>,
    pub permissions: Vec<cosmos_protocol::PermissionRule>,
}

fn is_valid_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn agent_name_pattern() -> Regex {
    Regex::new("^[a-z0-9][a-z0-9_-]*$").expect("static regex is valid")
}

pub struct ToolRegistry {
    tools: Mutex<HashMap<String, ToolSpec>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, spec: ToolSpec) -> Result<(), SandboxError> {
        if !is_valid_js_identifier(&spec.function_name) {
            return Err(SandboxError::InvalidFunctionName(spec.function_name));
        }
        if !agent_name_pattern().is_match(&spec.agent) {
            return Err(SandboxError::InvalidAgentName(spec.agent));
        }

        let mut tools = self.tools.lock().expect("tool registry mutex poisoned");
        if tools.contains_key(&spec.function_name) {
            return Err(SandboxError::DuplicateTool(spec.function_name));
        }
        tools.insert(spec.function_name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, function_name: &str) -> Result<ToolSpec, SandboxError> {
        self.tools
            .lock()
            .expect("tool registry mutex poisoned")
            .get(function_name)
            .cloned()
            .ok_or_else(|| SandboxError::UnknownTool(function_name.to_string()))
    }

    pub fn function_names(&self) -> Vec<String> {
        self.tools.lock().expect("tool registry mutex poisoned").keys().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
