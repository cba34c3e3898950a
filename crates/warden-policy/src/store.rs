//! The loaded, immutable policy set.
//!
//! `PolicyStore` parses a `PolicyFile` from TOML, validates every policy, and
//! compiles time windows once. After construction it exposes only shared
//! references; the decision engine reads it and never mutates it.

use std::{collections::HashSet, path::Path};

use chrono::FixedOffset;
use tracing::{debug, info};

use warden_contracts::{
    error::PolicyError,
    policy::{ActionRule, Policy, PolicyFile, RuleEffect},
    request::ActionClass,
};

use crate::window::CompiledWindow;

/// A policy plus its compiled time windows, indexed by action class.
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub policy: Policy,
    windows: [Option<CompiledWindow>; 3],
}

impl LoadedPolicy {
    /// The rule for `class` and its compiled window, if the policy covers it.
    pub fn rule(&self, class: ActionClass) -> Option<(&ActionRule, Option<&CompiledWindow>)> {
        self.policy
            .actions
            .get(class)
            .map(|rule| (rule, self.windows[class_index(class)].as_ref()))
    }
}

fn class_index(class: ActionClass) -> usize {
    match class {
        ActionClass::Read => 0,
        ActionClass::Write => 1,
        ActionClass::Destructive => 2,
    }
}

/// The immutable set of policies a decision engine evaluates against.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    offset: FixedOffset,
    policies: Vec<LoadedPolicy>,
    source: String,
}

impl PolicyStore {
    /// Parse `s` as a TOML policy file and validate it.
    ///
    /// An empty policy list is accepted here; `from_file` rejects it.
    pub fn from_toml_str(s: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = toml::from_str(s).map_err(|e| PolicyError::Parse {
            reason: e.to_string(),
        })?;
        Self::from_policy_file(file, "inline")
    }

    /// Read and validate the policy file at `path`.
    ///
    /// Returns `PolicyError::Load` if the file cannot be read or defines no
    /// policies: a gateway must never start without any policy loaded.
    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path).map_err(|e| PolicyError::Load {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        let file: PolicyFile = toml::from_str(&contents).map_err(|e| PolicyError::Parse {
            reason: format!("{}: {}", path.display(), e),
        })?;
        if file.policies.is_empty() {
            return Err(PolicyError::Load {
                reason: format!("policy file '{}' defines no policies", path.display()),
            });
        }
        Self::from_policy_file(file, &path.display().to_string())
    }

    /// Validate an already-deserialized policy file.
    pub fn from_policy_file(file: PolicyFile, source: &str) -> Result<Self, PolicyError> {
        let offset = FixedOffset::east_opt(file.utc_offset_minutes * 60).ok_or_else(|| {
            PolicyError::Invalid {
                policy_id: "<file>".to_string(),
                reason: format!("utc_offset_minutes {} is out of range", file.utc_offset_minutes),
            }
        })?;

        let mut seen = HashSet::new();
        let mut policies = Vec::with_capacity(file.policies.len());
        for policy in file.policies {
            if !seen.insert(policy.id.clone()) {
                return Err(invalid(&policy, "duplicate policy id"));
            }
            policies.push(load_policy(policy)?);
        }

        let store = Self { offset, policies, source: source.to_string() };
        info!(
            source = %store.source,
            policies = store.policy_count(),
            enabled = store.enabled().count(),
            rules = store.rule_count(),
            "policies loaded"
        );
        Ok(store)
    }

    /// Every loaded policy, enabled or not, in file order.
    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().map(|p| &p.policy)
    }

    /// Enabled policies only, in file order.
    pub fn enabled(&self) -> impl Iterator<Item = &LoadedPolicy> {
        self.policies.iter().filter(|p| p.policy.enabled)
    }

    /// Number of loaded policies.
    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Number of action rules across enabled policies.
    pub fn rule_count(&self) -> usize {
        self.enabled().map(|p| p.policy.actions.len()).sum()
    }

    /// The fixed offset used to evaluate time windows.
    pub fn utc_offset(&self) -> FixedOffset {
        self.offset
    }

    /// Where the policies were loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

fn invalid(policy: &Policy, reason: impl Into<String>) -> PolicyError {
    PolicyError::Invalid {
        policy_id: policy.id.clone(),
        reason: reason.into(),
    }
}

fn load_policy(policy: Policy) -> Result<LoadedPolicy, PolicyError> {
    if policy.id.trim().is_empty() {
        return Err(invalid(&policy, "policy id must not be empty"));
    }
    if policy.resource_types.is_empty() {
        return Err(invalid(&policy, "at least one resource type is required"));
    }
    if policy.actions.is_empty() {
        return Err(invalid(&policy, "at least one action rule is required"));
    }

    let mut windows: [Option<CompiledWindow>; 3] = [None, None, None];
    for (class, rule) in policy.actions.iter() {
        if rule.effect == RuleEffect::Deny && (rule.requires_approval || rule.row_limit.is_some()) {
            return Err(invalid(
                &policy,
                format!("{class} deny rule cannot set requires_approval or row_limit"),
            ));
        }
        if rule.row_limit == Some(0) {
            return Err(invalid(&policy, format!("{class} row_limit must be positive")));
        }
        if let Some(window) = &rule.time_window {
            let compiled = CompiledWindow::compile(window)
                .map_err(|reason| invalid(&policy, format!("{class} time_window: {reason}")))?;
            windows[class_index(class)] = Some(compiled);
        }
    }

    debug!(policy_id = %policy.id, enabled = policy.enabled, "policy validated");
    Ok(LoadedPolicy { policy, windows })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use warden_contracts::error::PolicyError;

    use super::PolicyStore;

    const TWO_POLICIES: &str = r#"
        utc_offset_minutes = 60

        [[policies]]
        id = "prod-db-guard"
        description = "Production databases"
        resource_types = ["database"]

        [policies.actions.read]
        effect = "allow"

        [policies.actions.write]
        effect = "allow"
        requires_approval = true
        row_limit = 500

        [[policies]]
        id = "legacy"
        enabled = false
        resource_types = ["*"]

        [policies.actions.destructive]
        effect = "deny"
    "#;

    #[test]
    fn test_counts_policies_and_enabled_rules() {
        let store = PolicyStore::from_toml_str(TWO_POLICIES).unwrap();
        assert_eq!(store.policy_count(), 2);
        assert_eq!(store.enabled().count(), 1);
        assert_eq!(store.rule_count(), 2);
        assert_eq!(store.utc_offset().local_minus_utc(), 3600);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let toml = r#"
            [[policies]]
            id = "dup"
            resource_types = ["database"]
            [policies.actions.read]
            effect = "allow"

            [[policies]]
            id = "dup"
            resource_types = ["cluster"]
            [policies.actions.read]
            effect = "allow"
        "#;
        match PolicyStore::from_toml_str(toml) {
            Err(PolicyError::Invalid { policy_id, reason }) => {
                assert_eq!(policy_id, "dup");
                assert!(reason.contains("duplicate"));
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_modifiers_on_deny_rules() {
        let toml = r#"
            [[policies]]
            id = "bad-deny"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "deny"
            row_limit = 10
        "#;
        assert!(matches!(
            PolicyStore::from_toml_str(toml),
            Err(PolicyError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_malformed_time_window() {
        let toml = r#"
            [[policies]]
            id = "freeze"
            resource_types = ["database"]
            [policies.actions.write]
            effect = "deny"
            [policies.actions.write.time_window]
            start = "6pm"
            end = "08:00"
        "#;
        match PolicyStore::from_toml_str(toml) {
            Err(PolicyError::Invalid { reason, .. }) => assert!(reason.contains("time_window")),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_policy_without_rules() {
        let toml = r#"
            [[policies]]
            id = "empty"
            resource_types = ["database"]
        "#;
        assert!(matches!(
            PolicyStore::from_toml_str(toml),
            Err(PolicyError::Invalid { .. })
        ));
    }

    #[test]
    fn test_toml_parse_error_is_reported() {
        match PolicyStore::from_toml_str("this is not valid toml ][[[") {
            Err(PolicyError::Parse { .. }) => {}
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_from_file_loads_policies() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_POLICIES.as_bytes()).unwrap();

        let store = PolicyStore::from_file(file.path()).unwrap();
        assert_eq!(store.policy_count(), 2);
        assert!(store.source().ends_with(&*file.path().file_name().unwrap().to_string_lossy()));
    }

    /// Starting with zero policies is fatal.
    #[test]
    fn test_from_file_rejects_empty_policy_set() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"policies = []\n").unwrap();

        match PolicyStore::from_file(file.path()) {
            Err(PolicyError::Load { reason }) => assert!(reason.contains("no policies")),
            other => panic!("expected Load, got {:?}", other),
        }
    }

    #[test]
    fn test_from_file_missing_path_is_load_error() {
        let result = PolicyStore::from_file(std::path::Path::new("/nonexistent/policies.toml"));
        assert!(matches!(result, Err(PolicyError::Load { .. })));
    }
}
