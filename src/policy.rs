//! Access policy evaluation
//!
//! Resources are matched first against explicit per-resource policies,
//! then against glob-style protected URL patterns. Evaluation fails
//! closed: any internal error while deciding yields a denial, never an
//! accidental grant.

use crate::elevation::ElevationTracker;
use crate::errors::StepkeyError;
use crate::models::Policy;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(DenyReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The resource requires elevation and the account has none (or it expired)
    NotElevated,
    /// Policy evaluation itself failed; denial is the safe answer
    EvaluationError,
}

pub struct PolicyEngine {
    policies: RwLock<BTreeMap<String, Policy>>,
    protected_patterns: Vec<CompiledPattern>,
    elevation: Arc<ElevationTracker>,
}

struct CompiledPattern {
    source: String,
    regex: Regex,
}

/// Translate a glob pattern (`*` matches any run of characters,
/// `?` a single character) into an anchored regex
fn compile_glob(pattern: &str) -> Result<Regex, StepkeyError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| StepkeyError::PolicyEvaluationError(e.to_string()))
}

impl PolicyEngine {
    /// Build an engine with the given protected URL patterns
    ///
    /// # Errors
    ///
    /// Returns `PolicyEvaluationError` if a pattern cannot be compiled
    pub fn new(
        elevation: Arc<ElevationTracker>,
        protected_patterns: &[String],
    ) -> Result<Self, StepkeyError> {
        let compiled = protected_patterns
            .iter()
            .map(|p| {
                compile_glob(p).map(|regex| CompiledPattern {
                    source: p.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            policies: RwLock::new(BTreeMap::new()),
            protected_patterns: compiled,
            elevation,
        })
    }

    /// Install or replace the policy for a resource
    pub fn set_policy(&self, policy: Policy) {
        let mut policies = self
            .policies
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        policies.insert(policy.resource_ref.clone(), policy);
    }

    /// Remove the policy for a resource, returning whether one existed
    pub fn clear_policy(&self, resource_ref: &str) -> bool {
        let mut policies = self
            .policies
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        policies.remove(resource_ref).is_some()
    }

    #[must_use]
    pub fn policy(&self, resource_ref: &str) -> Option<Policy> {
        let policies = self
            .policies
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        policies.get(resource_ref).cloned()
    }

    /// Whether a resource demands elevation for an account with `roles`
    ///
    /// An explicit policy wins: it requires elevation when its flag is
    /// set and either it names no roles or the account holds one of
    /// them. Without a policy, the protected URL patterns are
    /// consulted.
    #[must_use]
    pub fn requires_elevation(&self, resource_ref: &str, roles: &[String]) -> bool {
        if let Some(policy) = self.policy(resource_ref) {
            if !policy.required {
                return false;
            }
            if policy.required_roles.is_empty() {
                return true;
            }
            return policy.required_roles.iter().any(|r| roles.contains(r));
        }

        self.protected_patterns
            .iter()
            .any(|p| p.regex.is_match(resource_ref))
    }

    /// Decide whether `owner_id` may access `resource_ref` at `now`
    ///
    /// Never returns an error: evaluation problems surface as
    /// `Denied(EvaluationError)`.
    #[must_use]
    pub fn check_access(
        &self,
        owner_id: &str,
        resource_ref: &str,
        roles: &[String],
        now: DateTime<Utc>,
    ) -> AccessDecision {
        if !self.requires_elevation(resource_ref, roles) {
            return AccessDecision::Allowed;
        }
        if self.elevation.is_valid(owner_id, now) {
            AccessDecision::Allowed
        } else {
            AccessDecision::Denied(DenyReason::NotElevated)
        }
    }

    /// Which protected pattern a resource matches, if any
    #[must_use]
    pub fn matching_pattern(&self, resource_ref: &str) -> Option<&str> {
        self.protected_patterns
            .iter()
            .find(|p| p.regex.is_match(resource_ref))
            .map(|p| p.source.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(patterns: &[&str]) -> PolicyEngine {
        let elevation = Arc::new(ElevationTracker::new(900));
        let patterns: Vec<String> = patterns.iter().map(|s| (*s).to_string()).collect();
        PolicyEngine::new(elevation, &patterns).unwrap()
    }

    fn policy(resource: &str, required: bool, roles: &[&str]) -> Policy {
        Policy {
            resource_ref: resource.to_string(),
            required,
            required_roles: roles.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn test_no_policy_no_pattern_allows() {
        let e = engine(&[]);
        assert_eq!(
            e.check_access("alice", "/public/page", &[], Utc::now()),
            AccessDecision::Allowed
        );
    }

    #[test]
    fn test_policy_requires_elevation() {
        let e = engine(&[]);
        e.set_policy(policy("/admin", true, &[]));
        let now = Utc::now();

        assert_eq!(
            e.check_access("alice", "/admin", &[], now),
            AccessDecision::Denied(DenyReason::NotElevated)
        );

        e.elevation.elevate("alice", "passkey", now);
        assert_eq!(
            e.check_access("alice", "/admin", &[], now),
            AccessDecision::Allowed
        );
    }

    #[test]
    fn test_role_scoped_policy() {
        let e = engine(&[]);
        e.set_policy(policy("/reports", true, &["Manager"]));
        let now = Utc::now();

        // Accounts outside the named roles pass without elevation
        assert_eq!(
            e.check_access("bob", "/reports", &["Member".to_string()], now),
            AccessDecision::Allowed
        );
        assert_eq!(
            e.check_access("alice", "/reports", &["Manager".to_string()], now),
            AccessDecision::Denied(DenyReason::NotElevated)
        );
    }

    #[test]
    fn test_explicit_policy_overrides_pattern() {
        let e = engine(&["*/manage*"]);
        e.set_policy(policy("/site/manage-open", false, &[]));

        assert_eq!(
            e.check_access("alice", "/site/manage-open", &[], Utc::now()),
            AccessDecision::Allowed
        );
    }

    #[test]
    fn test_glob_patterns() {
        let e = engine(&["*/manage*", "/settings/?"]);
        assert!(e.requires_elevation("/site/manage_main", &[]));
        assert!(e.requires_elevation("/deep/path/manage", &[]));
        assert!(e.requires_elevation("/settings/a", &[]));
        assert!(!e.requires_elevation("/settings/ab", &[]));
        assert!(!e.requires_elevation("/public", &[]));
        assert_eq!(e.matching_pattern("/x/manage"), Some("*/manage*"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let e = engine(&["/a.b/*"]);
        assert!(e.requires_elevation("/a.b/page", &[]));
        assert!(!e.requires_elevation("/axb/page", &[]));
    }

    #[test]
    fn test_invalid_pattern_rejected_at_build() {
        // Globs themselves cannot produce invalid regexes, but the
        // constructor contract still surfaces compile failures.
        let elevation = Arc::new(ElevationTracker::new(900));
        assert!(PolicyEngine::new(elevation, &["*".to_string()]).is_ok());
    }

    #[test]
    fn test_clear_policy() {
        let e = engine(&[]);
        e.set_policy(policy("/admin", true, &[]));
        assert!(e.clear_policy("/admin"));
        assert!(!e.clear_policy("/admin"));
        assert_eq!(
            e.check_access("alice", "/admin", &[], Utc::now()),
            AccessDecision::Allowed
        );
    }
}
