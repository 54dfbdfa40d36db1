use crate::error::SessionError;
use chainwatch_core::{GroupScope, Identity, TopicPattern};
use tracing::warn;

pub const DEFAULT_INBOUND_CAPACITY: usize = 256;
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// How a session resolves its group scope when the identity carries none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopePolicy {
    #[default]
    RequireExplicit,
    Fallback(GroupScope),
}

impl ScopePolicy {
    pub fn resolve(&self, identity: &Identity) -> Result<GroupScope, SessionError> {
        match (identity.group_scope, self) {
            (Some(scope), _) => Ok(scope),
            (None, ScopePolicy::Fallback(scope)) => {
                warn!(
                    event = "scope_fallback_applied",
                    user_id = %identity.user_id,
                    scope = %scope
                );
                Ok(*scope)
            }
            (None, ScopePolicy::RequireExplicit) => Err(SessionError::MissingScope {
                user_id: identity.user_id.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub topic_pattern: TopicPattern,
    pub scope_policy: ScopePolicy,
    pub inbound_capacity: usize,
    pub command_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            topic_pattern: TopicPattern::all_chains(),
            scope_policy: ScopePolicy::RequireExplicit,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Reads `CHAINWATCH_TOPIC_PATTERN`, `CHAINWATCH_FALLBACK_SCOPE` and
    /// `CHAINWATCH_INBOUND_CAPACITY`; unset or invalid values keep the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = non_empty(lookup("CHAINWATCH_TOPIC_PATTERN")) {
            match TopicPattern::parse(&raw) {
                Ok(pattern) => config.topic_pattern = pattern,
                Err(err) => warn!(
                    event = "config_invalid",
                    key = "CHAINWATCH_TOPIC_PATTERN",
                    error = %err
                ),
            }
        }

        if let Some(raw) = non_empty(lookup("CHAINWATCH_FALLBACK_SCOPE")) {
            match raw.parse::<GroupScope>() {
                Ok(scope) => config.scope_policy = ScopePolicy::Fallback(scope),
                Err(err) => warn!(
                    event = "config_invalid",
                    key = "CHAINWATCH_FALLBACK_SCOPE",
                    error = %err
                ),
            }
        }

        if let Some(raw) = non_empty(lookup("CHAINWATCH_INBOUND_CAPACITY")) {
            match raw.trim().parse::<usize>() {
                Ok(value) if value > 0 => config.inbound_capacity = value,
                _ => warn!(
                    event = "config_invalid",
                    key = "CHAINWATCH_INBOUND_CAPACITY",
                    value = %raw
                ),
            }
        }

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn explicit_scope_wins_over_fallback() {
        let identity = Identity::new("pilot", Some(GroupScope(7)));
        let policy = ScopePolicy::Fallback(GroupScope(1));
        assert_eq!(policy.resolve(&identity), Ok(GroupScope(7)));
    }

    #[test]
    fn missing_scope_is_rejected_by_default() {
        let identity = Identity::new("pilot", None);
        assert!(matches!(
            ScopePolicy::default().resolve(&identity),
            Err(SessionError::MissingScope { .. })
        ));
    }

    #[test]
    fn env_enables_fallback_and_pattern() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("CHAINWATCH_FALLBACK_SCOPE", "1"),
            ("CHAINWATCH_TOPIC_PATTERN", "chain_intel:C1"),
            ("CHAINWATCH_INBOUND_CAPACITY", "0"),
        ]));
        assert_eq!(config.scope_policy, ScopePolicy::Fallback(GroupScope(1)));
        assert_eq!(config.topic_pattern.as_str(), "chain_intel:C1");
        assert_eq!(config.inbound_capacity, DEFAULT_INBOUND_CAPACITY);
    }

    #[test]
    fn invalid_env_values_keep_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("CHAINWATCH_FALLBACK_SCOPE", "corp"),
            ("CHAINWATCH_TOPIC_PATTERN", "chain*:x"),
        ]));
        assert_eq!(config.scope_policy, ScopePolicy::RequireExplicit);
        assert_eq!(config.topic_pattern, TopicPattern::all_chains());
    }
}
