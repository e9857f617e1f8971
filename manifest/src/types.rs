use std::time::Duration;

use cosmos_protocol::PermissionRule;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn parse(raw: &str) -> Option<ParamType> {
        match raw {
            "string" => Some(ParamType::String),
            "number" => Some(ParamType::Number),
            "boolean" => Some(ParamType::Boolean),
            "object" => Some(ParamType::Object),
            "array" => Some(ParamType::Array),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub params: Vec<ParamDescriptor>,
    #[serde(rename = "returns")]
    pub return_type: ParamType,
}

/// A parsed, validated manifest. Only constructible via
/// [`crate::ManifestLoader::load`].
#[derive(Debug, Clone)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub entry: String,
    pub functions: Vec<FunctionDescriptor>,
    pub parsed_permissions: Vec<PermissionRule>,
    pub timeout_duration: Duration,
    pub permissions_signature: Option<Vec<u8>>,
}

impl Manifest {
    pub fn function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }
}
