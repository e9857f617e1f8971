//! Audit record shape and the redaction rule applied before any record is
//! serialized to the append-only log.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::permission::DecisionSource;
use crate::permission::Effect;
use crate::permission::PermissionKey;

/// Field-name substrings (case-insensitive) whose values are replaced with
/// `"[REDACTED]"` before an audit record is written.
const REDACTION_TERMS: &[&str] = &["token", "key", "password", "secret", "credential", "auth"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: uuid::Uuid,
    pub agent: String,
    pub tool: String,
    pub permission_key: PermissionKey,
    pub decision_effect: Effect,
    pub decision_source: DecisionSource,
    pub arguments_redacted: Value,
}

/// Shallow-redact `arguments`: any object field whose name contains one of
/// [`REDACTION_TERMS`] (case-insensitively) is replaced with the literal
/// string `"[REDACTED]"`. Only the top level is inspected, matching the
/// "shallow copy" wording of the contract.
pub fn redact_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let lower = k.to_lowercase();
                if REDACTION_TERMS.iter().any(|term| lower.contains(term)) {
                    out.insert(k.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(k.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_case_insensitive_matches() {
        let input = json!({
            "API_KEY": "sk-123",
            "Password": "hunter2",
            "plain": "value",
            "authToken": "abc",
        });
        let redacted = redact_arguments(&input);
        assert_eq!(redacted["API_KEY"], json!("[REDACTED]"));
        assert_eq!(redacted["Password"], json!("[REDACTED]"));
        assert_eq!(redacted["authToken"], json!("[REDACTED]"));
        assert_eq!(redacted["plain"], json!("value"));
    }

    #[test]
    fn non_object_arguments_pass_through() {
        let input = json!("just a string");
        assert_eq!(redact_arguments(&input), input);
    }
}
