//! The default-deny policy evaluator (§4.2).

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use cosmos_protocol::Decision;
use cosmos_protocol::DecisionSource;
use cosmos_protocol::Effect;
use cosmos_protocol::PermissionKey;
use cosmos_protocol::PermissionMode;
use cosmos_protocol::PermissionRule;

use crate::error::PolicyError;
use crate::override_store;
use crate::override_store::OverrideEntry;
use crate::override_store::OverrideReason;
use crate::override_store::PolicyOverrideFile;
use crate::path::normalize_fs_target;

/// Evaluates permission requests against manifest rules and the persisted
/// override file. A poisoned internal mutex is treated as a fatal bug (the
/// same posture the teacher's `Session` takes toward its own mutexes) rather
/// than something to recover from silently.
pub struct Evaluator {
    overrides_path: PathBuf,
    home_dir: PathBuf,
    overrides: Mutex<PolicyOverrideFile>,
}

impl Evaluator {
    /// Resolve the user's home directory and `project_root/.cosmos/policy.json`,
    /// then load. Fails with [`PolicyError::NoHomeDir`] if the platform
    /// cannot report a home directory at all (e.g. `$HOME` unset on unix).
    pub fn load_for_project(project_root: &Path) -> Result<Self, PolicyError> {
        let home_dir = dirs::home_dir().ok_or(PolicyError::NoHomeDir)?;
        Self::load(default_policy_path(project_root), home_dir)
    }

    /// Load the override file at `overrides_path` (or start empty if
    /// absent). `home_dir` is used to expand `~` in fs targets.
    pub fn load(overrides_path: PathBuf, home_dir: PathBuf) -> Result<Self, PolicyError> {
        let overrides = override_store::load(&overrides_path)?;
        Ok(Self {
            overrides_path,
            home_dir,
            overrides: Mutex::new(overrides),
        })
    }

    /// Re-read the override file from disk, replacing the in-memory copy.
    pub fn reload(&self) -> Result<(), PolicyError> {
        let fresh = override_store::load(&self.overrides_path)?;
        *self.overrides.lock().expect("override mutex poisoned") = fresh;
        Ok(())
    }

    fn normalize(&self, key: &PermissionKey) -> PermissionKey {
        key.normalized(|target| normalize_fs_target(target, &self.home_dir))
    }

    pub fn evaluate(
        &self,
        agent: &str,
        requested_key: &PermissionKey,
        manifest_rules: &[PermissionRule],
    ) -> Decision {
        let normalized_request = self.normalize(requested_key);

        // Step 1: override lookup. `reason == override` wins unconditionally.
        {
            let overrides = self.overrides.lock().expect("override mutex poisoned");
            if let Some(entry) = lookup(&overrides, agent, &normalized_request.to_string())
                && entry.reason == OverrideReason::Override
            {
                return Decision {
                    effect: entry.effect,
                    source: DecisionSource::PolicyOverride,
                    matched_rule: Some(normalized_request.clone()),
                };
            }
        }

        // Step 2 + 3: select and rank candidate manifest rules.
        let mut candidates: Vec<&PermissionRule> = manifest_rules
            .iter()
            .filter(|rule| {
                let normalized_rule_key = self.normalize(&rule.key);
                normalized_rule_key.rule_matches_request(&normalized_request)
            })
            .collect();

        candidates.sort_by(|a, b| specificity_cmp(a, b).reverse());

        let winning_rule = match candidates.first() {
            Some(rule) => *rule,
            None => return Decision::default_deny(),
        };

        // Step 4: persisted grant resolution for request_once, keyed by the
        // *rule's* raw key, not the request's.
        if winning_rule.mode == PermissionMode::RequestOnce {
            let overrides = self.overrides.lock().expect("override mutex poisoned");
            if let Some(entry) = lookup(&overrides, agent, &winning_rule.key.to_string()) {
                return Decision {
                    effect: entry.effect,
                    source: DecisionSource::PersistedGrant,
                    matched_rule: Some(winning_rule.key.clone()),
                };
            }
        }

        // Steps 5 + 6: mode to effect, or default deny (already handled above).
        Decision {
            effect: Effect::from_mode(winning_rule.mode),
            source: DecisionSource::Manifest,
            matched_rule: Some(winning_rule.key.clone()),
        }
    }

    /// Persist a user's decision for a `request_once` key as a `user_grant`
    /// override, keyed by the manifest rule's raw (un-normalized) key text.
    pub fn record_once_decision(
        &self,
        agent: &str,
        raw_rule_key: &str,
        allowed: bool,
    ) -> Result<(), PolicyError> {
        let effect = if allowed { Effect::Allow } else { Effect::Deny };
        let mut overrides = self.overrides.lock().expect("override mutex poisoned");
        overrides
            .overrides
            .entry(agent.to_string())
            .or_default()
            .insert(
                raw_rule_key.to_string(),
                OverrideEntry {
                    effect,
                    reason: OverrideReason::UserGrant,
                    timestamp: Utc::now(),
                },
            );
        override_store::save(&self.overrides_path, &overrides)
    }

    /// Human-readable rendering of a decision for the audit log / host
    /// surface, mirroring the teacher's `get_error_message_ui`.
    pub fn describe(&self, agent: &str, key: &PermissionKey, decision: &Decision) -> String {
        match decision.source {
            DecisionSource::DefaultDeny => format!("denied by default-deny policy: {key}"),
            DecisionSource::PolicyOverride => format!("{} by team policy override: {key}", effect_verb(decision.effect)),
            DecisionSource::PersistedGrant => format!("{} by a previously recorded grant for {agent}: {key}", effect_verb(decision.effect)),
            DecisionSource::Manifest => format!("{} by manifest rule: {key}", effect_verb(decision.effect)),
        }
    }
}

fn effect_verb(effect: Effect) -> &'static str {
    match effect {
        Effect::Allow | Effect::PromptOnce | Effect::PromptAlways => "allowed",
        Effect::Deny => "denied",
    }
}

fn lookup<'a>(file: &'a PolicyOverrideFile, agent: &str, key: &str) -> Option<&'a OverrideEntry> {
    file.overrides.get(agent).and_then(|keys| keys.get(key))
}

/// Specificity ordering for rule selection: exact target beats glob beats
/// broad; within globs, longer literal prefix wins; ties broken by mode
/// restrictiveness (`deny > request_always > request_once > allow`).
fn specificity_cmp(a: &PermissionRule, b: &PermissionRule) -> std::cmp::Ordering {
    specificity_rank(a)
        .cmp(&specificity_rank(b))
        .then_with(|| a.mode.restrictiveness_rank().cmp(&b.mode.restrictiveness_rank()))
}

/// `(kind_rank, literal_prefix_len)`: `kind_rank` 2 = exact, 1 = glob, 0 =
/// broad. Combined with the literal-prefix length this total-orders any two
/// rules the way the spec's (a)/(b) clauses describe.
fn specificity_rank(rule: &PermissionRule) -> (u8, usize) {
    match &rule.key.target {
        None => (0, 0),
        Some(target) if target.contains('*') => (1, rule.key.literal_prefix_segments()),
        Some(_) => (2, usize::MAX),
    }
}

pub fn default_policy_path(project_root: &Path) -> PathBuf {
    project_root.join(".cosmos").join("policy.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmos_protocol::PermissionKey;
    use tempfile::tempdir;

    fn rule(key: &str, mode: PermissionMode) -> PermissionRule {
        PermissionRule {
            key: key.parse().unwrap(),
            mode,
        }
    }

    fn evaluator() -> (Evaluator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".cosmos").join("policy.json");
        let evaluator = Evaluator::load(path, dir.path().to_path_buf()).unwrap();
        (evaluator, dir)
    }

    #[test]
    fn load_for_project_uses_cosmos_subdir_of_project_root() {
        let dir = tempdir().unwrap();
        let evaluator = Evaluator::load_for_project(dir.path()).unwrap();
        let key: PermissionKey = "fs:read:./readme.md".parse().unwrap();
        let decision = evaluator.evaluate("agent", &key, &[]);
        assert_eq!(decision.source, DecisionSource::DefaultDeny);
    }

    #[test]
    fn default_deny_for_empty_manifest() {
        let (evaluator, _dir) = evaluator();
        let key: PermissionKey = "fs:read:./docs/readme.md".parse().unwrap();
        let decision = evaluator.evaluate("agent", &key, &[]);
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.source, DecisionSource::DefaultDeny);
    }

    #[test]
    fn default_deny_when_no_rule_matches() {
        let (evaluator, _dir) = evaluator();
        let rules = vec![rule("fs:read:./src/**", PermissionMode::Allow)];
        let key: PermissionKey = "fs:read:./docs/readme.md".parse().unwrap();
        let decision = evaluator.evaluate("agent", &key, &rules);
        assert_eq!(decision.source, DecisionSource::DefaultDeny);
    }

    #[test]
    fn exact_rule_beats_glob_rule() {
        let (evaluator, _dir) = evaluator();
        let rules = vec![
            rule("fs:read:./src/**", PermissionMode::Allow),
            rule("fs:read:./src/secret.go", PermissionMode::Deny),
        ];
        let key: PermissionKey = "fs:read:./src/secret.go".parse().unwrap();
        let decision = evaluator.evaluate("agent", &key, &rules);
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.source, DecisionSource::Manifest);
    }

    #[test]
    fn tilde_normalization_matches_absolute_home_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".cosmos").join("policy.json");
        let evaluator = Evaluator::load(path, dir.path().to_path_buf()).unwrap();

        let rules = vec![rule("fs:read:~/.config/**", PermissionMode::Allow)];
        let home_config = dir.path().join(".config").join("a.toml");
        let key: PermissionKey = format!("fs:read:{}", home_config.display()).parse().unwrap();
        let decision = evaluator.evaluate("agent", &key, &rules);
        assert_eq!(decision.effect, Effect::Allow);
        assert_eq!(decision.source, DecisionSource::Manifest);
    }

    #[test]
    fn override_supremacy_wins_over_manifest() {
        let (evaluator, _dir) = evaluator();
        let key: PermissionKey = "fs:write:/a/b".parse().unwrap();
        // Insert an override-reason entry directly.
        {
            let mut overrides = evaluator.overrides.lock().unwrap();
            overrides.overrides.entry("agent".to_string()).or_default().insert(
                key.to_string(),
                OverrideEntry {
                    effect: Effect::Deny,
                    reason: OverrideReason::Override,
                    timestamp: Utc::now(),
                },
            );
        }
        let rules = vec![rule("fs:write:/a/b", PermissionMode::Allow)];
        let decision = evaluator.evaluate("agent", &key, &rules);
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.source, DecisionSource::PolicyOverride);
    }

    #[test]
    fn persisted_grant_resolves_request_once() {
        let (evaluator, _dir) = evaluator();
        let key: PermissionKey = "net:http".parse().unwrap();
        let rules = vec![rule("net:http", PermissionMode::RequestOnce)];

        let before = evaluator.evaluate("agent", &key, &rules);
        assert_eq!(before.effect, Effect::PromptOnce);

        evaluator.record_once_decision("agent", "net:http", true).unwrap();
        let after = evaluator.evaluate("agent", &key, &rules);
        assert_eq!(after.effect, Effect::Allow);
        assert_eq!(after.source, DecisionSource::PersistedGrant);
    }

    #[test]
    fn request_always_ignores_grants() {
        let (evaluator, _dir) = evaluator();
        let key: PermissionKey = "net:http".parse().unwrap();
        let rules = vec![rule("net:http", PermissionMode::RequestAlways)];
        evaluator.record_once_decision("agent", "net:http", true).unwrap();
        let decision = evaluator.evaluate("agent", &key, &rules);
        assert_eq!(decision.effect, Effect::PromptAlways);
        assert_eq!(decision.source, DecisionSource::Manifest);
    }

    #[test]
    fn non_canonical_path_matches_same_override_as_canonical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".cosmos").join("policy.json");
        let evaluator = Evaluator::load(path, dir.path().to_path_buf()).unwrap();

        let canonical: PermissionKey = "fs:write:/a/b".parse().unwrap();
        {
            let mut overrides = evaluator.overrides.lock().unwrap();
            overrides.overrides.entry("agent".to_string()).or_default().insert(
                canonical.to_string(),
                OverrideEntry {
                    effect: Effect::Deny,
                    reason: OverrideReason::Override,
                    timestamp: Utc::now(),
                },
            );
        }

        let messy: PermissionKey = "fs:write:/a/./c/../b".parse().unwrap();
        let decision = evaluator.evaluate("agent", &messy, &[]);
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.source, DecisionSource::PolicyOverride);
    }
}
