//! Engine configuration
//!
//! Options are read once at startup and shared read-only between requests.
//! Hosts either build an [`EngineConfig`] directly, read it from the process
//! environment, or deserialize it from YAML.

use crate::entity::EntityKind;
use crate::error::EngineError;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;

pub const ENV_STATELESS_KINDS: &str = "PARTNERSHIP_STATELESS_KINDS";
pub const ENV_DISABLE_AUTO_TRANSITIONS: &str = "PARTNERSHIP_DISABLE_AUTO_TRANSITIONS";
pub const ENV_MONEY_ROUNDING: &str = "PARTNERSHIP_MONEY_ROUNDING";

const DEFAULT_MONEY_ROUNDING: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Kinds for which the transition and state phases are skipped.
    pub stateless_kinds: BTreeSet<EntityKind>,
    /// Skip the auto-transition phase of every save.
    pub disable_auto_transitions: bool,
    /// Minor-unit precision used when comparing monetary fields.
    pub money_rounding: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stateless_kinds: BTreeSet::new(),
            disable_auto_transitions: false,
            money_rounding: DEFAULT_MONEY_ROUNDING,
        }
    }
}

impl EngineConfig {
    pub fn is_stateless(&self, kind: EntityKind) -> bool {
        self.stateless_kinds.contains(&kind)
    }

    pub fn with_stateless(mut self, kind: EntityKind) -> Self {
        self.stateless_kinds.insert(kind);
        self
    }

    pub fn without_auto_transitions(mut self) -> Self {
        self.disable_auto_transitions = true;
        self
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read options from the process environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(kinds) = lookup(ENV_STATELESS_KINDS) {
            for tag in kinds.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                let kind = EntityKind::from_tag(tag).ok_or_else(|| {
                    EngineError::Config(format!("unknown entity kind '{tag}' in {ENV_STATELESS_KINDS}"))
                })?;
                config.stateless_kinds.insert(kind);
            }
        }

        if let Some(flag) = lookup(ENV_DISABLE_AUTO_TRANSITIONS) {
            config.disable_auto_transitions = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(EngineError::Config(format!(
                        "{ENV_DISABLE_AUTO_TRANSITIONS} must be a boolean, got '{other}'"
                    )));
                }
            };
        }

        if let Some(rounding) = lookup(ENV_MONEY_ROUNDING) {
            config.money_rounding = rounding.trim().parse().map_err(|_| {
                EngineError::Config(format!("{ENV_MONEY_ROUNDING} must be a non-negative integer"))
            })?;
        }

        debug!(?config, "engine configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_round_money_to_two_places() {
        let config = EngineConfig::default();
        assert_eq!(config.money_rounding, 2);
        assert!(!config.disable_auto_transitions);
        assert!(config.stateless_kinds.is_empty());
    }

    #[test]
    fn reads_all_options_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_STATELESS_KINDS, "partners.agreement, partners.intervention"),
            (ENV_DISABLE_AUTO_TRANSITIONS, "true"),
            (ENV_MONEY_ROUNDING, "3"),
        ]);

        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert!(config.is_stateless(EntityKind::Agreement));
        assert!(config.is_stateless(EntityKind::Intervention));
        assert!(config.disable_auto_transitions);
        assert_eq!(config.money_rounding, 3);
    }

    #[test]
    fn rejects_unknown_kind_and_bad_flag() {
        let bad_kind = EngineConfig::from_lookup(|k| {
            (k == ENV_STATELESS_KINDS).then(|| "partners.trip".to_string())
        });
        assert!(matches!(bad_kind, Err(EngineError::Config(_))));

        let bad_flag = EngineConfig::from_lookup(|k| {
            (k == ENV_DISABLE_AUTO_TRANSITIONS).then(|| "maybe".to_string())
        });
        assert!(matches!(bad_flag, Err(EngineError::Config(_))));
    }

    #[test]
    fn parses_yaml() {
        let config = EngineConfig::from_yaml_str(
            "stateless_kinds: [agreement]\ndisable_auto_transitions: true\n",
        )
        .unwrap();

        assert!(config.is_stateless(EntityKind::Agreement));
        assert!(config.disable_auto_transitions);
        assert_eq!(config.money_rounding, 2);
    }
}
