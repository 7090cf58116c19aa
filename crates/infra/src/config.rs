//! Engine configuration.
//!
//! Defaults are usable as-is; deployments override them through
//! `PERMGRAPH_TX_*` environment variables.

use std::time::Duration;

use permgraph_core::{DomainError, DomainResult};

pub const ENV_MAX_ATTEMPTS: &str = "PERMGRAPH_TX_MAX_ATTEMPTS";
pub const ENV_BASE_BACKOFF_MS: &str = "PERMGRAPH_TX_BASE_BACKOFF_MS";
pub const ENV_MAX_BACKOFF_MS: &str = "PERMGRAPH_TX_MAX_BACKOFF_MS";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn from_env() -> DomainResult<Self> {
        Ok(Self {
            retry: RetryPolicy::from_env()?,
        })
    }
}

/// Bounded retry for transactions that lose an optimistic race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always >= 1.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, without sleeping. Handy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn from_env() -> DomainResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a policy from an arbitrary key lookup, falling back to defaults
    /// for missing keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DomainResult<Self> {
        let defaults = Self::default();

        let max_attempts = match lookup(ENV_MAX_ATTEMPTS) {
            Some(raw) => parse_u64(ENV_MAX_ATTEMPTS, &raw).and_then(|v| {
                u32::try_from(v).map_err(|_| {
                    DomainError::validation(format!("{ENV_MAX_ATTEMPTS} is out of range: {v}"))
                })
            })?,
            None => defaults.max_attempts,
        };
        let base_backoff = match lookup(ENV_BASE_BACKOFF_MS) {
            Some(raw) => Duration::from_millis(parse_u64(ENV_BASE_BACKOFF_MS, &raw)?),
            None => defaults.base_backoff,
        };
        let max_backoff = match lookup(ENV_MAX_BACKOFF_MS) {
            Some(raw) => Duration::from_millis(parse_u64(ENV_MAX_BACKOFF_MS, &raw)?),
            None => defaults.max_backoff,
        };

        let policy = Self {
            max_attempts,
            base_backoff,
            max_backoff,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.max_attempts == 0 {
            return Err(DomainError::validation("max_attempts must be at least 1"));
        }
        if self.max_backoff < self.base_backoff {
            return Err(DomainError::validation(
                "max_backoff must not be smaller than base_backoff",
            ));
        }
        Ok(())
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    ///
    /// Exponential: `base * 2^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let pow = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(pow)
            .min(self.max_backoff)
    }
}

fn parse_u64(key: &str, raw: &str) -> DomainResult<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        DomainError::validation(format!("{key} must be a non-negative integer, got {raw:?}"))
    })
}
