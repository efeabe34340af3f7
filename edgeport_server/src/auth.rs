//! Authentication method selection.

use crate::sys_config::{AuthConfig, SystemConfig};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Matches any user or database name
pub const WILDCARD: &str = "*";

/// Name of the method used when no rules are configured at all
pub const DEFAULT_AUTH_METHOD: &str = "SCRAM";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum AuthMethod {
    Trust,
    #[strum(serialize = "SCRAM")]
    #[serde(rename = "SCRAM")]
    Scram,
    Password,
}

impl AuthMethod {
    /// Look up a method by its configuration name
    pub fn by_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

impl Default for AuthMethod {
    fn default() -> Self {
        Self::by_name(DEFAULT_AUTH_METHOD).unwrap_or(Self::Scram)
    }
}

impl AuthConfig {
    fn matches(&self, user: &str, database: &str) -> bool {
        (self.user.contains(user) || self.user.contains(WILDCARD))
            && (self.database.contains(database) || self.database.contains(WILDCARD))
    }
}

/// An immutable, priority-ordered snapshot of the configured auth rules.
#[derive(Clone, Debug, Default)]
pub struct AuthRuleSet {
    rules: Vec<AuthConfig>,
}

impl AuthRuleSet {
    pub fn new(mut rules: Vec<AuthConfig>) -> Self {
        // Stable, so equal priorities keep their configuration order
        rules.sort_by_key(|rule| rule.priority);
        Self { rules }
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(config.auth.clone())
    }

    pub fn rules(&self) -> &[AuthConfig] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Choose the authentication method for a connection attempt.
    ///
    /// `None` means no rule admits this user and database, and the connection
    /// must be refused.
    pub fn resolve(&self, user: &str, database: &str) -> Option<AuthMethod> {
        if self.rules.is_empty() {
            return Some(AuthMethod::default());
        }

        self.rules
            .iter()
            .find(|rule| rule.matches(user, database))
            .map(|rule| rule.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(users: &[&str], databases: &[&str], priority: i64, method: AuthMethod) -> AuthConfig {
        AuthConfig {
            user: users.iter().map(|s| s.to_string()).collect(),
            database: databases.iter().map(|s| s.to_string()).collect(),
            priority,
            method,
        }
    }

    #[test]
    fn empty_rules_give_default() {
        let rules = AuthRuleSet::default();
        assert_eq!(rules.resolve("alice", "db1"), Some(AuthMethod::Scram));
        assert_eq!(rules.resolve("", ""), Some(AuthMethod::Scram));
    }

    #[test]
    fn lower_priority_wins() {
        let rules = AuthRuleSet::new(vec![
            rule(&["*"], &["*"], 10, AuthMethod::Trust),
            rule(&["alice"], &["*"], 1, AuthMethod::Password),
        ]);

        assert_eq!(rules.resolve("alice", "db1"), Some(AuthMethod::Password));
        assert_eq!(rules.resolve("bob", "db1"), Some(AuthMethod::Trust));
    }

    #[test]
    fn both_patterns_must_match() {
        let rules = AuthRuleSet::new(vec![
            rule(&["alice", "carol"], &["sales"], 0, AuthMethod::Trust),
            rule(&["*"], &["reports"], 5, AuthMethod::Password),
        ]);

        assert_eq!(rules.resolve("carol", "sales"), Some(AuthMethod::Trust));
        assert_eq!(rules.resolve("alice", "reports"), Some(AuthMethod::Password));
        assert_eq!(rules.resolve("bob", "sales"), None);
        assert_eq!(rules.resolve("alice", "other"), None);
    }

    #[test]
    fn equal_priorities_keep_order() {
        let rules = AuthRuleSet::new(vec![
            rule(&["*"], &["*"], 3, AuthMethod::Password),
            rule(&["*"], &["*"], 3, AuthMethod::Trust),
        ]);

        assert_eq!(rules.resolve("anyone", "anywhere"), Some(AuthMethod::Password));
    }

    #[test]
    fn method_names() {
        assert_eq!(AuthMethod::by_name("SCRAM"), Some(AuthMethod::Scram));
        assert_eq!(AuthMethod::by_name("Trust"), Some(AuthMethod::Trust));
        assert_eq!(AuthMethod::by_name("Kerberos"), None);
        assert_eq!(AuthMethod::default().to_string(), DEFAULT_AUTH_METHOD);
    }
}
