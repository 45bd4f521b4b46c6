//! Engine tuning knobs.
//!
//! Every threshold the acquisition scripts used to hard-code lives here as a
//! documented default, so independent runs can be tuned without code drift.

use std::num::NonZeroU32;
use std::time::Duration;

use crate::proxy_pool::ProxyPoolConfig;
use crate::throttle::GovernorConfig;
use crate::ValidationError;

/// How the engine treats the proxy pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    /// Use proxies when one is available, fall back to direct fetches when
    /// the pool is exhausted or empty.
    #[default]
    Auto,
    /// Never fetch directly; a run cannot start with an empty pool.
    Required,
    /// Ignore the pool entirely.
    Disabled,
}

/// Run parameters with documented defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size.
    pub concurrency: usize,
    /// Total tries per symbol across tiers.
    pub attempts: u32,
    /// Hard per-attempt deadline.
    pub request_timeout: Duration,
    pub proxy_mode: ProxyMode,
    /// Enables the third (history) fetch tier.
    pub history_tier: bool,
    /// Optional steady request-rate cap across all workers.
    pub requests_per_second: Option<NonZeroU32>,
    /// Completions between progress snapshots.
    pub progress_every: usize,
    /// Drain budget after cancellation before in-flight work is abandoned.
    pub grace: Duration,
    pub pool: ProxyPoolConfig,
    pub governor: GovernorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            attempts: 3,
            request_timeout: Duration::from_secs(4),
            proxy_mode: ProxyMode::Auto,
            history_tier: false,
            requests_per_second: None,
            progress_every: 50,
            grace: Duration::from_secs(5),
            pool: ProxyPoolConfig::default(),
            governor: GovernorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_proxy_mode(mut self, mode: ProxyMode) -> Self {
        self.proxy_mode = mode;
        self
    }

    pub fn with_history_tier(mut self, enabled: bool) -> Self {
        self.history_tier = enabled;
        self
    }

    pub fn with_requests_per_second(mut self, rps: Option<NonZeroU32>) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let reject = |reason: &str| {
            Err(ValidationError::InvalidConfig {
                reason: reason.to_owned(),
            })
        };

        if self.concurrency == 0 {
            return reject("concurrency must be at least 1");
        }
        if self.attempts == 0 {
            return reject("attempts must be at least 1");
        }
        if self.request_timeout.is_zero() {
            return reject("request_timeout must be non-zero");
        }
        if self.progress_every == 0 {
            return reject("progress_every must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().expect("defaults hold");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = EngineConfig::default()
            .with_concurrency(0)
            .validate()
            .expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidConfig { .. }));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(EngineConfig::default().with_attempts(0).validate().is_err());
    }
}
