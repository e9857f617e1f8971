//! Capability keys, permission rules, and policy decisions.
//!
//! A capability key is the colon-separated string `resource:action[:target]`
//! that names a single permission (see the GLOSSARY). Keys are parsed once,
//! at manifest-load or request time, into a [`PermissionKey`] so that the
//! policy evaluator never has to re-parse strings while matching rules.

use std::fmt;
use std::str::FromStr;

use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PermissionKeyError {
    #[error("empty permission key")]
    Empty,
    #[error("invalid permission resource: {0:?}")]
    InvalidResource(String),
    #[error("invalid permission action: {0:?}")]
    InvalidAction(String),
}

/// `(resource, action, target?)`, e.g. `fs:read:./src/**`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
    pub target: Option<String>,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>, target: Option<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            target,
        }
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    pub fn has_glob(&self) -> bool {
        matches!(&self.target, Some(t) if t.contains('*'))
    }

    /// Normalize the key's target in place using `normalize`, which is
    /// expected to expand `~` and path-clean filesystem targets. Non-fs
    /// resources are passed through unchanged (identity normalization).
    pub fn normalized(&self, normalize: impl FnOnce(&str) -> String) -> Self {
        let mut key = self.clone();
        if self.resource == "fs" {
            if let Some(target) = &self.target {
                key.target = Some(normalize(target));
            }
        }
        key
    }

    /// True if `self` and `other` share the same resource and action and
    /// `self`'s target pattern matches `other`'s (exact or glob). `self` is
    /// treated as the manifest rule's key, `other` as the request's key.
    pub fn rule_matches_request(&self, request: &PermissionKey) -> bool {
        if self.resource != request.resource || self.action != request.action {
            return false;
        }
        match (&self.target, &request.target) {
            (None, _) => true,
            (Some(rule_target), Some(req_target)) => {
                if rule_target == req_target {
                    true
                } else if rule_target.contains('*') {
                    Regex::new(&glob_to_regex(rule_target)).map(|re| re.is_match(req_target)).unwrap_or(false)
                } else {
                    false
                }
            }
            (Some(_), None) => false,
        }
    }

    /// Count of literal path segments before the first wildcard segment;
    /// used to rank glob specificity (longer literal prefix wins).
    pub fn literal_prefix_segments(&self) -> usize {
        match &self.target {
            Some(t) => t
                .split('/')
                .take_while(|segment| !segment.contains('*'))
                .count(),
            None => 0,
        }
    }
}

/// Translate our `*`/`**` glob grammar (§4.2) into an anchored regex: `*`
/// matches within a single path segment (never crosses `/`), `**` matches
/// across any number of segments, and every other character is matched
/// literally.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if !literal.is_empty() {
                out.push_str(&regex_lite::escape(&literal));
                literal.clear();
            }
            if chars.peek() == Some(&'*') {
                chars.next();
                out.push_str(".*");
            } else {
                out.push_str("[^/]*");
            }
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        out.push_str(&regex_lite::escape(&literal));
    }

    out.push('$');
    out
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)?;
        if let Some(target) = &self.target {
            write!(f, ":{target}")?;
        }
        Ok(())
    }
}

impl FromStr for PermissionKey {
    type Err = PermissionKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PermissionKeyError::Empty);
        }
        let mut parts = s.splitn(3, ':');
        let resource = parts.next().unwrap_or_default();
        let action = parts.next().unwrap_or_default();
        let target = parts.next().map(str::to_string);

        if resource.is_empty() || !resource.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PermissionKeyError::InvalidResource(resource.to_string()));
        }
        if action.is_empty() || !action.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PermissionKeyError::InvalidAction(action.to_string()));
        }
        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
            target,
        })
    }
}

/// Permission mode as declared in a manifest, ordered here from least to
/// most restrictive for the tie-break rule in specificity ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Allow,
    RequestOnce,
    RequestAlways,
    Deny,
}

impl PermissionMode {
    /// Restrictiveness rank used for tie-breaking: higher wins.
    pub fn restrictiveness_rank(self) -> u8 {
        match self {
            PermissionMode::Allow => 0,
            PermissionMode::RequestOnce => 1,
            PermissionMode::RequestAlways => 2,
            PermissionMode::Deny => 3,
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionMode::Allow => "allow",
            PermissionMode::Deny => "deny",
            PermissionMode::RequestOnce => "request_once",
            PermissionMode::RequestAlways => "request_always",
        };
        write!(f, "{s}")
    }
}

/// `(PermissionKey, mode)`, ordered within the manifest as declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    pub key: PermissionKey,
    pub mode: PermissionMode,
}

/// Effect of a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
    PromptOnce,
    PromptAlways,
}

impl Effect {
    pub fn from_mode(mode: PermissionMode) -> Self {
        match mode {
            PermissionMode::Allow => Effect::Allow,
            PermissionMode::Deny => Effect::Deny,
            PermissionMode::RequestOnce => Effect::PromptOnce,
            PermissionMode::RequestAlways => Effect::PromptAlways,
        }
    }

    pub fn is_allow(self) -> bool {
        matches!(self, Effect::Allow)
    }
}

/// Where a [`Decision`] came from; recorded so the audit log captures *why*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Manifest,
    PolicyOverride,
    PersistedGrant,
    DefaultDeny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub effect: Effect,
    pub source: DecisionSource,
    pub matched_rule: Option<PermissionKey>,
}

impl Decision {
    pub fn default_deny() -> Self {
        Self {
            effect: Effect::Deny,
            source: DecisionSource::DefaultDeny,
            matched_rule: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_action_target() {
        let key: PermissionKey = "fs:read:./src/**".parse().unwrap();
        assert_eq!(key.resource, "fs");
        assert_eq!(key.action, "read");
        assert_eq!(key.target.as_deref(), Some("./src/**"));
        assert!(key.has_target());
        assert!(key.has_glob());
    }

    #[test]
    fn parses_broad_key_without_target() {
        let key: PermissionKey = "net:http".parse().unwrap();
        assert_eq!(key.target, None);
        assert!(!key.has_target());
    }

    #[test]
    fn rejects_empty_action() {
        let err = "fs:".parse::<PermissionKey>().unwrap_err();
        assert_eq!(err, PermissionKeyError::InvalidAction(String::new()));
    }

    #[test]
    fn rejects_empty_key() {
        assert_eq!("".parse::<PermissionKey>().unwrap_err(), PermissionKeyError::Empty);
    }

    #[test]
    fn broad_rule_matches_any_target() {
        let rule: PermissionKey = "fs:read".parse().unwrap();
        let req: PermissionKey = "fs:read:/a/b".parse().unwrap();
        assert!(rule.rule_matches_request(&req));
    }

    #[test]
    fn exact_rule_matches_only_identical_target() {
        let rule: PermissionKey = "fs:read:/a/b".parse().unwrap();
        let req_match: PermissionKey = "fs:read:/a/b".parse().unwrap();
        let req_other: PermissionKey = "fs:read:/a/c".parse().unwrap();
        assert!(rule.rule_matches_request(&req_match));
        assert!(!rule.rule_matches_request(&req_other));
    }

    #[test]
    fn glob_star_matches_single_segment() {
        let rule: PermissionKey = "fs:read:/a/*/c".parse().unwrap();
        let ok: PermissionKey = "fs:read:/a/b/c".parse().unwrap();
        let too_deep: PermissionKey = "fs:read:/a/b/d/c".parse().unwrap();
        assert!(rule.rule_matches_request(&ok));
        // `*` matches exactly one path segment; reaching one level deeper
        // must not match. `**` is the form callers should use for that.
        assert!(!rule.rule_matches_request(&too_deep));
    }

    #[test]
    fn double_star_crosses_segments_single_star_does_not() {
        let star_rule: PermissionKey = "fs:read:/proj/src/*".parse().unwrap();
        let double_star_rule: PermissionKey = "fs:read:/proj/src/**".parse().unwrap();
        let nested: PermissionKey = "fs:read:/proj/src/a/b/secret".parse().unwrap();

        assert!(!star_rule.rule_matches_request(&nested));
        assert!(double_star_rule.rule_matches_request(&nested));
    }

    #[test]
    fn double_star_matches_anything() {
        let rule: PermissionKey = "fs:read:**".parse().unwrap();
        let req: PermissionKey = "fs:read:/x/y/z".parse().unwrap();
        assert!(rule.rule_matches_request(&req));
    }

    #[test]
    fn literal_prefix_counts_segments_before_wildcard() {
        let rule: PermissionKey = "fs:read:/a/b/*".parse().unwrap();
        assert_eq!(rule.literal_prefix_segments(), 2);
    }
}
