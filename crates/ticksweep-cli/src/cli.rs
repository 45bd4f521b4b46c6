use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use ticksweep_core::{EngineConfig, GovernorConfig, ProxyMode, ProxyPoolConfig};

/// Sweep a symbol universe for current quotes through a rotating proxy pool.
#[derive(Debug, Parser)]
#[command(name = "ticksweep", version, about)]
pub struct Cli {
    /// File with one symbol per line (`#` starts a comment).
    #[arg(long, value_name = "PATH")]
    pub symbols: PathBuf,

    /// File with one proxy per line, `scheme://host:port` or `host:port`.
    #[arg(long, value_name = "PATH")]
    pub proxies: Option<PathBuf>,

    /// Sweep only the first N symbols of the universe.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Worker pool size.
    #[arg(long, default_value_t = 50)]
    pub concurrency: usize,

    /// Total tries per symbol across tiers.
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,

    /// Hard per-request deadline in milliseconds.
    #[arg(long, default_value_t = 4_000)]
    pub timeout_ms: u64,

    /// Consecutive failures before a proxy is blocked.
    #[arg(long, default_value_t = 3)]
    pub failure_threshold: u32,

    /// Blocked-proxy cooldown in seconds.
    #[arg(long, default_value_t = 300)]
    pub cooldown_secs: u64,

    #[arg(long, value_enum, default_value_t = ProxyModeArg::Auto)]
    pub proxy_mode: ProxyModeArg,

    /// Enable the third (history) fetch tier.
    #[arg(long)]
    pub history_tier: bool,

    /// Steady request-rate cap across all workers.
    #[arg(long, value_name = "N")]
    pub rps: Option<NonZeroU32>,

    /// Completions between progress lines.
    #[arg(long, default_value_t = 50)]
    pub progress_every: usize,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProxyModeArg {
    /// Prefer proxies, fall back to direct fetches.
    Auto,
    /// Refuse to fetch without a proxy.
    Required,
    /// Ignore the proxy pool.
    Disabled,
}

impl From<ProxyModeArg> for ProxyMode {
    fn from(value: ProxyModeArg) -> Self {
        match value {
            ProxyModeArg::Auto => Self::Auto,
            ProxyModeArg::Required => Self::Required,
            ProxyModeArg::Disabled => Self::Disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            concurrency: self.concurrency,
            attempts: self.attempts,
            request_timeout: Duration::from_millis(self.timeout_ms),
            proxy_mode: self.proxy_mode.into(),
            history_tier: self.history_tier,
            requests_per_second: self.rps,
            progress_every: self.progress_every,
            pool: ProxyPoolConfig {
                failure_threshold: self.failure_threshold,
                cooldown: Duration::from_secs(self.cooldown_secs),
            },
            governor: GovernorConfig::default(),
            ..EngineConfig::default()
        }
    }
}
