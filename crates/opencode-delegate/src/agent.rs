//! Agent definitions and the permission patterns that gate them.

use globset::Glob;
use serde::{Deserialize, Serialize};

/// Decision for one permission pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    /// Allowed without asking.
    Allow,
    /// Requires interactive approval.
    Ask,
    /// Denied.
    Deny,
}

/// One permission pattern, e.g. `task *` or `task explore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Action pattern (glob over action strings).
    pub pattern: String,
    /// Decision when the pattern matches.
    pub decision: PermissionDecision,
}

/// An ordered permission set; the last matching rule wins and
/// unmatched actions are allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    rules: Vec<PermissionRule>,
}

impl PermissionSet {
    /// Create a set from ordered rules.
    #[must_use]
    pub fn new(rules: Vec<PermissionRule>) -> Self {
        Self { rules }
    }

    /// A set that allows everything.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Evaluate an action string against the set.
    #[must_use]
    pub fn evaluate(&self, action: &str) -> PermissionDecision {
        let mut decision = PermissionDecision::Allow;
        for rule in &self.rules {
            let matched = rule.pattern == action
                || Glob::new(&rule.pattern)
                    .map(|g| g.compile_matcher().is_match(action))
                    .unwrap_or(false);
            if matched {
                decision = rule.decision;
            }
        }
        decision
    }

    /// Whether the set explicitly grants `task` delegation (used to
    /// decide if a child agent may itself run `task`).
    #[must_use]
    pub fn grants_task(&self) -> bool {
        self.rules.iter().any(|r| {
            r.decision == PermissionDecision::Allow
                && (r.pattern == "task" || r.pattern.starts_with("task "))
        })
    }
}

/// A named agent that can be delegated to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    /// Agent name (e.g. `explore`).
    pub name: String,
    /// Human description shown in error listings.
    pub description: String,
    /// Declared model as `provider/model`, if pinned.
    pub model: Option<String>,
    /// The agent's own permission set.
    pub permissions: PermissionSet,
}

/// Registry of delegable agents. Implemented by the host.
pub trait AgentRegistry: Send + Sync {
    /// Look up an agent by name.
    fn get(&self, name: &str) -> Option<AgentDef>;

    /// All registered agents.
    fn list(&self) -> Vec<AgentDef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_action_is_allowed() {
        let set = PermissionSet::allow_all();
        assert_eq!(set.evaluate("task explore"), PermissionDecision::Allow);
    }

    #[test]
    fn test_last_matching_rule_wins() {
        let set = PermissionSet::new(vec![
            PermissionRule {
                pattern: "task *".to_owned(),
                decision: PermissionDecision::Deny,
            },
            PermissionRule {
                pattern: "task explore".to_owned(),
                decision: PermissionDecision::Allow,
            },
        ]);
        assert_eq!(set.evaluate("task explore"), PermissionDecision::Allow);
        assert_eq!(set.evaluate("task builder"), PermissionDecision::Deny);
    }

    #[test]
    fn test_grants_task() {
        let grants = PermissionSet::new(vec![PermissionRule {
            pattern: "task *".to_owned(),
            decision: PermissionDecision::Allow,
        }]);
        assert!(grants.grants_task());

        let denies = PermissionSet::new(vec![PermissionRule {
            pattern: "task *".to_owned(),
            decision: PermissionDecision::Deny,
        }]);
        assert!(!denies.grants_task());

        assert!(!PermissionSet::allow_all().grants_task());
    }
}
