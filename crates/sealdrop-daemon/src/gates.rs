//! Eligibility and rate-limit gates consulted before any ledger operation.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: String,
}

impl Eligibility {
    pub fn eligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: true,
            reason: reason.into(),
        }
    }

    pub fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("eligibility gate unavailable: {0}")]
    Unavailable(String),
}

/// Decides whether a wallet may claim. Proof verification lives behind this.
#[async_trait]
pub trait EligibilityGate: Send + Sync {
    async fn is_eligible(&self, wallet: &str) -> Result<Eligibility, GateError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityConfig {
    pub allow_all: bool,
    pub allowlist: Vec<String>,
}

/// Config-driven gate: everyone when `allow_all`, else the allowlist.
#[derive(Debug, Clone, Default)]
pub struct StaticEligibilityGate {
    allow_all: bool,
    allowlist: HashSet<String>,
}

impl StaticEligibilityGate {
    pub fn new(cfg: &EligibilityConfig) -> Self {
        Self {
            allow_all: cfg.allow_all,
            allowlist: cfg.allowlist.iter().cloned().collect(),
        }
    }

    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            allowlist: HashSet::new(),
        }
    }
}

#[async_trait]
impl EligibilityGate for StaticEligibilityGate {
    async fn is_eligible(&self, wallet: &str) -> Result<Eligibility, GateError> {
        if self.allow_all {
            return Ok(Eligibility::eligible("open_distribution"));
        }
        if self.allowlist.contains(wallet) {
            Ok(Eligibility::eligible("allowlisted"))
        } else {
            Ok(Eligibility::ineligible("not_allowlisted"))
        }
    }
}

pub trait RateLimiter: Send + Sync {
    fn allow(&self, identity: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn allow(&self, _identity: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
struct RateLimitState {
    started_at: Instant,
    count: u32,
}

/// Per-identity fixed window counter.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    max_tracked: usize,
    state: Mutex<HashMap<String, RateLimitState>>,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            max_tracked: 65_536,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn allow(&self, identity: &str) -> bool {
        let mut guard = self.state.lock();
        if guard.len() >= self.max_tracked && !guard.contains_key(identity) {
            let window = self.window;
            guard.retain(|_, s| s.started_at.elapsed() < window);
        }
        let entry = guard
            .entry(identity.to_string())
            .or_insert_with(|| RateLimitState {
                started_at: Instant::now(),
                count: 0,
            });
        if entry.started_at.elapsed() >= self.window {
            entry.started_at = Instant::now();
            entry.count = 0;
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count = entry.count.saturating_add(1);
        true
    }
}
