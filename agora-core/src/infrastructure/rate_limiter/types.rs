//! Admission types: caller identity and admission decisions

use std::net::IpAddr;

use serde::Serialize;

use crate::application::errors::ApplicationError;
use crate::domain::policy::KeyStrategy;

/// Identity of an inbound caller, as resolved by upstream auth and transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Authenticated user id, if any
    pub user_id: Option<String>,
    /// Raw `X-Forwarded-For` chain; only its first hop is used
    pub forwarded_for: Option<String>,
    /// Direct transport peer
    pub peer: Option<IpAddr>,
}

impl ClientIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_forwarded_for(mut self, chain: impl Into<String>) -> Self {
        self.forwarded_for = Some(chain.into());
        self
    }

    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// First hop of the forwarded chain, else the transport peer
    pub fn network_origin(&self) -> Option<String> {
        let first_hop = self
            .forwarded_for
            .as_deref()
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());

        match first_hop {
            Some(hop) => Some(hop.to_string()),
            None => self.peer.map(|ip| ip.to_string()),
        }
    }

    /// Key used to bucket this caller under `strategy`
    pub fn client_key(&self, strategy: KeyStrategy) -> String {
        if strategy == KeyStrategy::PerClient
            && let Some(user) = self.user_id.as_deref().filter(|u| !u.is_empty())
        {
            return format!("user:{}", user);
        }
        match self.network_origin() {
            Some(origin) => format!("ip:{}", origin),
            None => "ip:unknown".to_string(),
        }
    }
}

/// Which counter store produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Counted in the shared store
    Shared,
    /// Counted in this process only
    Local,
    /// The store failed and the request was admitted uncounted
    Degraded,
    /// Rate limiting is switched off
    Disabled,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Shared => "shared",
            DecisionSource::Local => "local",
            DecisionSource::Degraded => "degraded",
            DecisionSource::Disabled => "disabled",
        }
    }
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the current window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Seconds until the current window ends
    pub reset_seconds: u64,
    pub source: DecisionSource,
}

impl AdmissionDecision {
    /// Admit without counting because the limiter is switched off
    pub fn disabled() -> Self {
        Self {
            allowed: true,
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_seconds: 0,
            source: DecisionSource::Disabled,
        }
    }

    /// Admit without counting because the store failed
    pub fn degraded(limit: u32, window_seconds: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_seconds: window_seconds,
            source: DecisionSource::Degraded,
        }
    }

    /// Seconds a rejected client should wait; mirrors `reset_seconds`
    pub fn retry_after(&self) -> Option<u64> {
        (!self.allowed).then_some(self.reset_seconds)
    }

    /// Turn a rejection into [`ApplicationError::RateLimitExceeded`]
    pub fn into_result(self, scope: &str) -> Result<Self, ApplicationError> {
        if self.allowed {
            return Ok(self);
        }
        Err(ApplicationError::RateLimitExceeded {
            scope: scope.to_string(),
            limit: self.limit,
            retry_after: self.reset_seconds,
        })
    }
}
