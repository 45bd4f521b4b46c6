//! # Ticksweep Core
//!
//! High-throughput, proxy-rotating market-data acquisition engine.
//!
//! ## Overview
//!
//! Given a large symbol universe, the engine retrieves a current quote for
//! each symbol inside a tight wall-clock budget while contending with a
//! rate-limited, anti-scraping upstream reachable through a mostly
//! unhealthy proxy pool. The pieces:
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`domain`] | Validated symbols, quotes, and result taxonomy |
//! | [`proxy_pool`] | Proxy health, circuit breaking, RAII leases |
//! | [`throttle`] | Global adaptive rate-limit governor |
//! | [`strategy`] | Tiered per-symbol fetch state machine |
//! | [`dispatcher`] | Bounded worker pool, progress, cancellation |
//! | [`metrics`] | Atomic counters and derived snapshots |
//! | [`upstream`] | Quote endpoint construction and parsing |
//! | [`http`] | Transport abstraction (reqwest / test fakes) |
//! | [`boundary`] | Symbol/proxy sources and the result sink |
//! | [`config`] | Tuning knobs with documented defaults |
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   leases    ┌───────────┐
//! │ Dispatcher │────────────▶│ ProxyPool │
//! │ (workers)  │             └───────────┘
//! └─────┬──────┘   signals   ┌───────────────────┐
//!       │─────────────────── ▶│ RateLimitGovernor │
//!       ▼                    └───────────────────┘
//! ┌───────────────┐          ┌──────────────────┐
//! │ FetchStrategy │─────────▶│ QuoteTransport   │──▶ upstream
//! │ (tier machine)│          │ (per-proxy client)│
//! └─────┬─────────┘          └──────────────────┘
//!       ▼
//! ┌──────────────┐   fills   ┌────────────┐
//! │ FetchResult  │──────────▶│ ResultSink │
//! └──────────────┘           └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ticksweep_core::{
//!     CancelHandle, Dispatcher, EngineConfig, ReqwestTransport, normalize_proxy_list,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxies = normalize_proxy_list(["10.0.0.1:8080", "socks5://10.0.0.2:1080"]);
//!     let dispatcher = Dispatcher::new(
//!         EngineConfig::default().with_concurrency(100),
//!         Arc::new(ReqwestTransport::new()),
//!         proxies,
//!     );
//!
//!     let outcome = dispatcher
//!         .run(["AAPL", "MSFT", "NVDA"], CancelHandle::new())
//!         .await?;
//!     println!("{} filled", outcome.metrics.succeeded);
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Model
//!
//! Per-symbol failures are values, not errors: each symbol terminates as a
//! [`FetchResult`], and a run always completes with a best-effort result
//! set plus a metrics summary. Only configuration problems abort a run:
//!
//! ```rust
//! use ticksweep_core::EngineError;
//!
//! fn explain(error: &EngineError) -> &'static str {
//!     match error {
//!         EngineError::EmptyUniverse => "nothing to fetch",
//!         EngineError::NoProxies => "proxy-required mode with an empty pool",
//!         EngineError::InvalidConfig(_) => "rejected tuning knob",
//!     }
//! }
//! ```

pub mod boundary;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod http;
pub mod metrics;
pub mod proxy;
pub mod proxy_pool;
pub mod strategy;
pub mod throttle;
pub mod upstream;

// Re-export commonly used types at crate root for convenience

pub use boundary::{
    InMemoryProxies, InMemorySymbols, MemorySink, NullSink, ProxySource, ResultSink, SymbolSource,
};
pub use config::{EngineConfig, ProxyMode};
pub use dispatcher::{CancelHandle, Dispatcher, ProgressFn, RunOutcome};
pub use domain::{
    normalize_universe, validate_currency_code, FailReason, FetchResult, Quote, SourceTier,
    Symbol, UtcDateTime,
};
pub use error::{EngineError, SinkError, ValidationError};
pub use http::{
    HttpRequest, HttpResponse, NoopTransport, QuoteTransport, ReqwestTransport, TransportError,
    TransportErrorKind,
};
pub use metrics::{FailureBreakdown, MetricsCollector, MetricsSnapshot};
pub use proxy::{normalize_proxy_list, ProxyAddress, ProxyScheme};
pub use proxy_pool::{ProxyId, ProxyLease, ProxyPool, ProxyPoolConfig, ProxyStatus};
pub use strategy::{FetchStrategy, FetchTask};
pub use throttle::{GovernorConfig, RateLimitGovernor};
pub use upstream::{QuoteFields, TierReply, UpstreamApi};
