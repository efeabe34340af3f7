//! The live system configuration: the listener and authentication objects an
//! administrator can insert and remove, and scalar settings.

use crate::auth::AuthMethod;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_concurrency() -> usize {
    100
}

/// One entry of the `ports` setting. Its value is its identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortConfig {
    pub protocol: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// One entry of the `auth` setting
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthConfig {
    pub user: BTreeSet<String>,
    pub database: BTreeSet<String>,
    pub priority: i64,
    pub method: AuthMethod,
}

/// A snapshot of the system configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub auth: Vec<AuthConfig>,
    #[serde(default, flatten)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

/// A configuration object belonging to a multi-valued setting
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "setting", content = "value", rename_all = "lowercase")]
pub enum ConfigObject {
    Ports(PortConfig),
    Auth(AuthConfig),
}

impl ConfigObject {
    pub fn setting_name(&self) -> &'static str {
        match self {
            Self::Ports(_) => "ports",
            Self::Auth(_) => "auth",
        }
    }
}

/// A single committed mutation of the system configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigChange {
    Insert(ConfigObject),
    Remove(ConfigObject),
    Set {
        name: String,
        value: serde_json::Value,
    },
    Reset {
        name: String,
    },
}

impl SystemConfig {
    /// Apply a change to this snapshot. Inserting an object already present, or
    /// removing one that is absent, leaves the snapshot unchanged.
    pub fn apply(&mut self, change: &ConfigChange) {
        match change {
            ConfigChange::Insert(ConfigObject::Ports(port)) => {
                if !self.ports.contains(port) {
                    self.ports.push(port.clone());
                }
            }
            ConfigChange::Insert(ConfigObject::Auth(auth)) => {
                if !self.auth.contains(auth) {
                    self.auth.push(auth.clone());
                }
            }
            ConfigChange::Remove(ConfigObject::Ports(port)) => self.ports.retain(|p| p != port),
            ConfigChange::Remove(ConfigObject::Auth(auth)) => self.auth.retain(|a| a != auth),
            ConfigChange::Set { name, value } => {
                self.settings.insert(name.clone(), value.clone());
            }
            ConfigChange::Reset { name } => {
                self.settings.remove(name);
            }
        }
    }

    /// The changes which turn `self` into `other`: removals first, then
    /// insertions, then scalar settings.
    pub fn diff(&self, other: &SystemConfig) -> Vec<ConfigChange> {
        let mut changes = Vec::new();

        for port in self.ports.iter().filter(|p| !other.ports.contains(p)) {
            changes.push(ConfigChange::Remove(ConfigObject::Ports(port.clone())));
        }
        for auth in self.auth.iter().filter(|a| !other.auth.contains(a)) {
            changes.push(ConfigChange::Remove(ConfigObject::Auth(auth.clone())));
        }
        for port in other.ports.iter().filter(|p| !self.ports.contains(p)) {
            changes.push(ConfigChange::Insert(ConfigObject::Ports(port.clone())));
        }
        for auth in other.auth.iter().filter(|a| !self.auth.contains(a)) {
            changes.push(ConfigChange::Insert(ConfigObject::Auth(auth.clone())));
        }

        for (name, value) in &other.settings {
            if self.settings.get(name) != Some(value) {
                changes.push(ConfigChange::Set {
                    name: name.clone(),
                    value: value.clone(),
                });
            }
        }
        for name in self.settings.keys() {
            if !other.settings.contains_key(name) {
                changes.push(ConfigChange::Reset { name: name.clone() });
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn port(number: u16) -> PortConfig {
        PortConfig {
            protocol: "edgeql+http".to_string(),
            address: "127.0.0.1".to_string(),
            port: number,
            database: None,
            user: None,
            concurrency: 10,
        }
    }

    #[test]
    fn parse_snapshot() {
        let text = r#"{
            ports: [
                { protocol: "graphql+http", address: "localhost", port: 8080, database: "main" },
            ],
            auth: [
                { user: ["*"], database: ["*"], priority: 0, method: "SCRAM" },
            ],
            session_idle_timeout: "60s",
        }"#;
        let config: SystemConfig = json5::from_str(text).unwrap();

        assert_eq!(config.ports.len(), 1);
        assert_eq!(config.ports[0].database.as_deref(), Some("main"));
        assert_eq!(config.ports[0].user, None);
        assert_eq!(config.ports[0].concurrency, 100);
        assert_eq!(config.auth[0].method, AuthMethod::Scram);
        assert_eq!(
            config.settings.get("session_idle_timeout"),
            Some(&serde_json::json!("60s"))
        );
    }

    #[test]
    fn apply_is_set_like() {
        let mut config = SystemConfig::default();
        let insert = ConfigChange::Insert(ConfigObject::Ports(port(1)));

        config.apply(&insert);
        config.apply(&insert);
        assert_eq!(config.ports, vec![port(1)]);

        config.apply(&ConfigChange::Remove(ConfigObject::Ports(port(2))));
        assert_eq!(config.ports, vec![port(1)]);

        config.apply(&ConfigChange::Remove(ConfigObject::Ports(port(1))));
        assert!(config.ports.is_empty());
    }

    #[test]
    fn diff_orders_removals_first() {
        let mut old = SystemConfig::default();
        old.ports = vec![port(1), port(2)];
        old.settings.insert("a".to_string(), serde_json::json!(1));

        let mut new = SystemConfig::default();
        new.ports = vec![port(2), port(3)];
        new.settings.insert("b".to_string(), serde_json::json!(true));

        assert_eq!(
            old.diff(&new),
            vec![
                ConfigChange::Remove(ConfigObject::Ports(port(1))),
                ConfigChange::Insert(ConfigObject::Ports(port(3))),
                ConfigChange::Set {
                    name: "b".to_string(),
                    value: serde_json::json!(true)
                },
                ConfigChange::Reset {
                    name: "a".to_string()
                },
            ]
        );

        let mut applied = old.clone();
        for change in old.diff(&new) {
            applied.apply(&change);
        }
        assert_eq!(applied, new);
    }
}
