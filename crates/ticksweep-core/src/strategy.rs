//! Per-symbol retrieval state machine.
//!
//! `TryFast → TryFallback → TryHistory (optional) → Terminal`. Every attempt
//! produces a classified value, never an exception; retry and tier-fallback
//! decisions are a table over those values:
//!
//! | Observation | Proxy health | Next step |
//! |-------------|--------------|-----------|
//! | transport error | penalized | retry, different proxy |
//! | timeout | penalized | retry, different proxy |
//! | 429 / 999 | untouched | governor signal, retry |
//! | 404 | untouched | terminal `NoData` |
//! | other non-2xx | penalized | retry, different proxy |
//! | garbled body | penalized | retry, different proxy |
//! | valid, no price | untouched | escalate tier or terminal `NoData` |
//! | usable price | success | terminal `Filled` |

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use governor::DefaultDirectRateLimiter;

use crate::dispatcher::CancelHandle;
use crate::proxy_pool::{ProxyId, ProxyLease, ProxyPool};
use crate::throttle::RateLimitGovernor;
use crate::upstream::{self, QuoteFields, TierReply, UpstreamApi};
use crate::{
    EngineConfig, FailReason, FetchResult, MetricsCollector, ProxyMode, QuoteTransport, Quote,
    SourceTier, Symbol, TransportErrorKind, UtcDateTime,
};

/// One symbol's unit of work: attempt counter plus the proxies already
/// burned, so a retry never immediately reuses the route that just failed.
#[derive(Debug)]
pub struct FetchTask {
    pub symbol: Symbol,
    pub attempt: u32,
    pub tried: HashSet<ProxyId>,
}

impl FetchTask {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            attempt: 0,
            tried: HashSet::new(),
        }
    }
}

enum Route {
    Proxied(ProxyLease),
    Direct,
    /// Required mode with nothing leasable right now.
    Starved,
}

/// Tiered fetch executor shared by all workers of a run.
pub struct FetchStrategy {
    transport: Arc<dyn QuoteTransport>,
    api: UpstreamApi,
    pool: Arc<ProxyPool>,
    governor: Arc<RateLimitGovernor>,
    metrics: Arc<MetricsCollector>,
    pacer: Option<Arc<DefaultDirectRateLimiter>>,
    config: EngineConfig,
}

impl FetchStrategy {
    pub fn new(
        transport: Arc<dyn QuoteTransport>,
        api: UpstreamApi,
        pool: Arc<ProxyPool>,
        governor: Arc<RateLimitGovernor>,
        metrics: Arc<MetricsCollector>,
        pacer: Option<Arc<DefaultDirectRateLimiter>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            transport,
            api,
            pool,
            governor,
            metrics,
            pacer,
            config,
        }
    }

    /// Drive one symbol to a terminal outcome.
    ///
    /// Returns `None` only when cancellation is observed between attempts —
    /// the symbol counts as unprocessed and appears nowhere in the result
    /// set.
    pub async fn fetch(&self, symbol: Symbol, cancel: &CancelHandle) -> Option<FetchResult> {
        let mut task = FetchTask::new(symbol);
        let mut tier = SourceTier::Fast;
        let mut last_reason = FailReason::ProxyError;

        while task.attempt < self.config.attempts {
            if cancel.is_cancelled() {
                return None;
            }
            task.attempt += 1;

            // Pacing and the governor's global slowdown both apply before
            // the request goes out, never as a retroactive penalty.
            if let Some(pacer) = &self.pacer {
                pacer.until_ready().await;
            }
            let slowdown = self.governor.current_delay();
            if !slowdown.is_zero() {
                tokio::time::sleep(slowdown).await;
            }

            let (lease, proxy) = match self.route(&task) {
                Route::Proxied(lease) => {
                    let addr = lease.addr().clone();
                    (Some(lease), Some(addr))
                }
                Route::Direct => (None, None),
                Route::Starved => {
                    last_reason = FailReason::ProxyError;
                    self.backoff().await;
                    continue;
                }
            };

            let request =
                self.api
                    .request(tier, &task.symbol, self.config.request_timeout, proxy);

            match self.transport.execute(request).await {
                Err(error) => {
                    let reason = match error.kind() {
                        TransportErrorKind::Timeout => FailReason::Timeout,
                        TransportErrorKind::Connect | TransportErrorKind::Other => {
                            FailReason::ProxyError
                        }
                    };
                    tracing::trace!(symbol = %task.symbol, %tier, %error, "transport fault");
                    if let Some(lease) = lease {
                        task.tried.insert(lease.id());
                        lease.fail(reason);
                    }
                    last_reason = reason;
                    self.backoff().await;
                }
                Ok(response) if response.is_rate_limited() => {
                    self.governor.signal();
                    self.metrics.record_rate_limit_hit();
                    // Throttling is upstream's verdict on us, not on the
                    // proxy; the lease ends with health untouched.
                    if let Some(lease) = lease {
                        task.tried.insert(lease.id());
                        drop(lease);
                    }
                    last_reason = FailReason::RateLimited;
                    self.backoff().await;
                }
                Ok(response) if response.status == 404 => {
                    if let Some(lease) = lease {
                        lease.succeed();
                    }
                    return Some(FetchResult::Missed {
                        symbol: task.symbol,
                        reason: FailReason::NoData,
                    });
                }
                Ok(response) if !response.is_success() => {
                    tracing::trace!(
                        symbol = %task.symbol,
                        status = response.status,
                        "upstream rejected attempt"
                    );
                    if let Some(lease) = lease {
                        task.tried.insert(lease.id());
                        lease.fail(FailReason::ProxyError);
                    }
                    last_reason = FailReason::ProxyError;
                    self.backoff().await;
                }
                Ok(response) => {
                    match upstream::parse_reply(tier, &task.symbol, &response.body) {
                        TierReply::Quote(fields) => {
                            if let Some(lease) = lease {
                                lease.succeed();
                            }
                            return Some(self.terminal_quote(&task.symbol, tier, fields));
                        }
                        TierReply::NoData => {
                            if let Some(lease) = lease {
                                lease.succeed();
                            }
                            match tier.escalate(self.config.history_tier) {
                                Some(next) => {
                                    last_reason = FailReason::NoData;
                                    tier = next;
                                }
                                None => {
                                    return Some(FetchResult::Missed {
                                        symbol: task.symbol,
                                        reason: FailReason::NoData,
                                    });
                                }
                            }
                        }
                        TierReply::Garbled(detail) => {
                            tracing::trace!(symbol = %task.symbol, detail, "garbled body");
                            if let Some(lease) = lease {
                                task.tried.insert(lease.id());
                                lease.fail(FailReason::ProxyError);
                            }
                            last_reason = FailReason::ProxyError;
                            self.backoff().await;
                        }
                    }
                }
            }
        }

        Some(FetchResult::Missed {
            symbol: task.symbol,
            reason: last_reason,
        })
    }

    fn route(&self, task: &FetchTask) -> Route {
        match self.config.proxy_mode {
            ProxyMode::Disabled => Route::Direct,
            ProxyMode::Auto => match self.pool.lease(&task.tried) {
                Some(lease) => Route::Proxied(lease),
                None => Route::Direct,
            },
            ProxyMode::Required => match self.pool.lease(&task.tried) {
                Some(lease) => Route::Proxied(lease),
                None => Route::Starved,
            },
        }
    }

    fn terminal_quote(&self, symbol: &Symbol, tier: SourceTier, fields: QuoteFields) -> FetchResult {
        let built = Quote::new(
            symbol.clone(),
            fields.price,
            fields.bid,
            fields.ask,
            fields.volume,
            fields.currency.as_deref().unwrap_or("USD"),
            UtcDateTime::now(),
            tier,
        );

        match built {
            Ok(quote) => FetchResult::Filled(quote),
            // Upstream answered with values our domain refuses; the data is
            // unusable, not the route.
            Err(error) => {
                tracing::debug!(%symbol, %error, "rejecting unusable upstream values");
                FetchResult::Missed {
                    symbol: symbol.clone(),
                    reason: FailReason::NoData,
                }
            }
        }
    }

    /// Fixed jitter plus the governor's current delay.
    async fn backoff(&self) {
        let jitter = Duration::from_millis(fastrand::u64(40..=160));
        tokio::time::sleep(jitter + self.governor.current_delay()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use crate::proxy_pool::ProxyPoolConfig;
    use crate::throttle::GovernorConfig;
    use crate::{HttpRequest, HttpResponse, ProxyAddress, TransportError};

    /// Replays a scripted sequence of transport outcomes, then 200 `{}`.
    struct SeqTransport {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl SeqTransport {
        fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn recorded(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("request log").clone()
        }
    }

    impl QuoteTransport for SeqTransport {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>
        {
            self.requests.lock().expect("request log").push(request);
            let reply = self
                .replies
                .lock()
                .expect("scripted replies")
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::ok_json("{}")));
            Box::pin(async move { reply })
        }
    }

    fn quote_body(symbol: &str, price: f64) -> HttpResponse {
        HttpResponse::ok_json(format!(
            r#"{{"quoteResponse":{{"result":[{{"symbol":"{symbol}","regularMarketPrice":{price},"regularMarketVolume":1000,"currency":"USD"}}],"error":null}}}}"#
        ))
    }

    fn chart_body(price: f64) -> HttpResponse {
        HttpResponse::ok_json(format!(
            r#"{{"chart":{{"result":[{{"meta":{{"regularMarketPrice":{price},"currency":"USD"}},"indicators":{{"quote":[{{"close":[{price}],"volume":[500]}}]}}}}],"error":null}}}}"#
        ))
    }

    fn empty_quote_body() -> HttpResponse {
        HttpResponse::ok_json(r#"{"quoteResponse":{"result":[],"error":null}}"#)
    }

    fn pool_of(n: usize) -> Arc<ProxyPool> {
        let addresses = (0..n)
            .map(|i| ProxyAddress::parse(&format!("10.9.0.{}:3128", i + 1)).expect("valid"));
        Arc::new(ProxyPool::new(addresses, ProxyPoolConfig::default()))
    }

    fn strategy(
        transport: Arc<SeqTransport>,
        pool: Arc<ProxyPool>,
        config: EngineConfig,
    ) -> (FetchStrategy, Arc<RateLimitGovernor>, Arc<MetricsCollector>) {
        let governor = Arc::new(RateLimitGovernor::new(GovernorConfig::default()));
        let metrics = Arc::new(MetricsCollector::new(1));
        let strategy = FetchStrategy::new(
            transport,
            UpstreamApi::default(),
            pool,
            Arc::clone(&governor),
            Arc::clone(&metrics),
            None,
            config,
        );
        (strategy, governor, metrics)
    }

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    #[tokio::test(start_paused = true)]
    async fn fast_tier_success_fills_on_first_attempt() {
        let transport = SeqTransport::new(vec![Ok(quote_body("AAPL", 187.2))]);
        let (strategy, _, _) = strategy(Arc::clone(&transport), pool_of(2), EngineConfig::default());

        let result = strategy
            .fetch(symbol("AAPL"), &CancelHandle::new())
            .await
            .expect("not cancelled");

        let FetchResult::Filled(quote) = result else {
            panic!("expected fill, got {result:?}");
        };
        assert_eq!(quote.tier, SourceTier::Fast);
        assert_eq!(quote.price, 187.2);
        assert_eq!(transport.recorded().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_fast_reply_escalates_to_fallback_tier() {
        let transport =
            SeqTransport::new(vec![Ok(empty_quote_body()), Ok(chart_body(55.5))]);
        let (strategy, _, _) = strategy(Arc::clone(&transport), pool_of(2), EngineConfig::default());

        let result = strategy
            .fetch(symbol("THIN"), &CancelHandle::new())
            .await
            .expect("not cancelled");

        let FetchResult::Filled(quote) = result else {
            panic!("expected fill, got {result:?}");
        };
        assert_eq!(quote.tier, SourceTier::Fallback);

        let urls: Vec<String> = transport.recorded().iter().map(|r| r.url.clone()).collect();
        assert!(urls[0].contains("/v7/finance/quote"));
        assert!(urls[1].contains("/v8/finance/chart"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_faults_rotate_to_a_different_proxy() {
        let transport = SeqTransport::new(vec![
            Err(TransportError::connect("refused")),
            Ok(quote_body("MSFT", 410.0)),
        ]);
        let pool = pool_of(3);
        let (strategy, _, _) =
            strategy(Arc::clone(&transport), Arc::clone(&pool), EngineConfig::default());

        let result = strategy
            .fetch(symbol("MSFT"), &CancelHandle::new())
            .await
            .expect("not cancelled");
        assert!(result.is_filled());

        let requests = transport.recorded();
        let first = requests[0].proxy.clone().expect("proxied");
        let second = requests[1].proxy.clone().expect("proxied");
        assert_ne!(first, second, "retry must not reuse the failed proxy");

        let penalized = pool
            .statuses()
            .iter()
            .filter(|s| s.consecutive_failures > 0)
            .count();
        assert_eq!(penalized, 1, "exactly the faulty route took the penalty");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_feeds_governor_without_burning_the_proxy() {
        let transport = SeqTransport::new(vec![
            Ok(HttpResponse {
                status: 999,
                body: String::new(),
            }),
            Ok(quote_body("NVDA", 900.0)),
        ]);
        let pool = pool_of(2);
        let (strategy, governor, metrics) =
            strategy(Arc::clone(&transport), Arc::clone(&pool), EngineConfig::default());

        let result = strategy
            .fetch(symbol("NVDA"), &CancelHandle::new())
            .await
            .expect("not cancelled");
        assert!(result.is_filled());

        assert_eq!(governor.hits(), 1);
        assert_eq!(metrics.snapshot().rate_limit_hits, 1);
        assert!(
            pool.statuses().iter().all(|s| s.consecutive_failures == 0),
            "throttling never penalizes proxy health"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_terminates_as_no_data_without_retry() {
        let transport = SeqTransport::new(vec![Ok(HttpResponse {
            status: 404,
            body: String::new(),
        })]);
        let (strategy, _, _) = strategy(Arc::clone(&transport), pool_of(1), EngineConfig::default());

        let result = strategy
            .fetch(symbol("GONE"), &CancelHandle::new())
            .await
            .expect("not cancelled");

        assert_eq!(result.reason(), Some(FailReason::NoData));
        assert_eq!(transport.recorded().len(), 1, "no retry after NoData");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_surface_the_last_classified_reason() {
        let transport = SeqTransport::new(vec![
            Err(TransportError::connect("refused")),
            Err(TransportError::connect("refused")),
            Err(TransportError::timeout("deadline")),
        ]);
        let (strategy, _, _) = strategy(Arc::clone(&transport), pool_of(4), EngineConfig::default());

        let result = strategy
            .fetch(symbol("DOWN"), &CancelHandle::new())
            .await
            .expect("not cancelled");

        assert_eq!(result.reason(), Some(FailReason::Timeout));
        assert_eq!(transport.recorded().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_in_auto_mode_fetches_direct() {
        let transport = SeqTransport::new(vec![Ok(quote_body("SOLO", 12.0))]);
        let (strategy, _, _) = strategy(Arc::clone(&transport), pool_of(0), EngineConfig::default());

        let result = strategy
            .fetch(symbol("SOLO"), &CancelHandle::new())
            .await
            .expect("not cancelled");
        assert!(result.is_filled());
        assert!(transport.recorded()[0].proxy.is_none(), "direct fetch");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_between_attempts_abandons_the_task() {
        let transport = SeqTransport::new(vec![]);
        let (strategy, _, _) = strategy(Arc::clone(&transport), pool_of(1), EngineConfig::default());

        let cancel = CancelHandle::new();
        cancel.cancel();

        let outcome = strategy.fetch(symbol("LATE"), &cancel).await;
        assert!(outcome.is_none(), "cancelled before the first attempt");
        assert!(transport.recorded().is_empty());
    }
}
