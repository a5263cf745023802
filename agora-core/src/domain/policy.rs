//! TTL and rate limit policy tables
//!
//! Both the admission controller and the cache layer derive everything they
//! store from these tables: how long a resource class stays cached, and how
//! many requests a scope admits per window and per which identity.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::keys::ResourceClass;
use crate::application::errors::SelectorError;
use crate::config::{CacheConfig, RateLimitConfig};

/// How callers of a scope are bucketed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Authenticated user id when present, network origin otherwise
    #[default]
    PerClient,
    /// Network origin only, even for authenticated callers
    PerIp,
}

impl KeyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStrategy::PerClient => "per_client",
            KeyStrategy::PerIp => "per_ip",
        }
    }
}

/// Rate limit policy of one protected scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopePolicy {
    /// Requests admitted per window
    pub limit: u32,
    /// Window length in seconds, fixed when the window is created
    pub window_seconds: u64,
    pub key_strategy: KeyStrategy,
}

impl ScopePolicy {
    pub fn new(limit: u32, window_seconds: u64, key_strategy: KeyStrategy) -> Self {
        Self {
            limit,
            window_seconds,
            key_strategy,
        }
    }
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self {
            limit: 100,
            window_seconds: 60,
            key_strategy: KeyStrategy::PerClient,
        }
    }
}

/// Scope name to policy lookup with a fallback scope for unlisted routes
#[derive(Debug, Clone)]
pub struct ScopeTable {
    default_scope: String,
    policies: HashMap<String, ScopePolicy>,
}

impl ScopeTable {
    pub fn new(default_scope: impl Into<String>, policies: HashMap<String, ScopePolicy>) -> Self {
        Self {
            default_scope: default_scope.into(),
            policies,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.default_scope.clone(), config.scopes.clone())
    }

    /// Resolve a scope, falling back to the default scope's policy.
    ///
    /// Returns the name of the scope whose policy applies so that counters
    /// for unlisted scopes are shared with the default.
    pub fn resolve<'a>(&'a self, scope: &'a str) -> (&'a str, ScopePolicy) {
        if let Some(policy) = self.policies.get(scope) {
            return (scope, *policy);
        }
        let policy = self
            .policies
            .get(&self.default_scope)
            .copied()
            .unwrap_or_default();
        (&self.default_scope, policy)
    }

    pub fn default_scope(&self) -> &str {
        &self.default_scope
    }
}

/// Per-resource-class TTL table
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default_ttl: Duration,
    per_class: HashMap<ResourceClass, Duration>,
}

impl TtlPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            per_class: HashMap::new(),
        }
    }

    pub fn with_class_ttl(mut self, class: ResourceClass, ttl: Duration) -> Self {
        self.per_class.insert(class, ttl);
        self
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, SelectorError> {
        let mut policy = Self::new(Duration::from_secs(config.default_ttl_seconds));
        for (name, seconds) in &config.resource_ttls {
            policy = policy.with_class_ttl(
                ResourceClass::new(name.as_str())?,
                Duration::from_secs(*seconds),
            );
        }
        Ok(policy)
    }

    pub fn ttl_for(&self, class: &ResourceClass) -> Duration {
        self.per_class
            .get(class)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

/// Counter key for one client within one scope
pub fn rate_limit_key(prefix: &str, scope: &str, client_key: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + scope.len() + client_key.len() + 2);
    key.push_str(prefix);
    key.push(':');
    key.push_str(scope);
    key.push(':');
    key.push_str(client_key);
    key
}
