//! Shared fixtures for the behavior suite: a scriptable upstream whose
//! behavior is keyed by proxy route and symbol.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ticksweep_core::{HttpRequest, HttpResponse, QuoteTransport, TransportError};

/// Fake upstream with configurable failure behavior.
///
/// - requests routed through a "dead" proxy always fail at transport level;
/// - symbols in the `no_data` set answer with an empty result body;
/// - the first `rate_limited_first` requests answer HTTP 999;
/// - every request optionally takes `latency` (virtual under paused time).
#[derive(Debug, Default)]
pub struct FlakyUpstream {
    dead_proxies: HashSet<String>,
    no_data: HashSet<String>,
    rate_limited_first: u64,
    latency: Option<Duration>,
    requests: AtomicU64,
}

impl FlakyUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a proxy (by `scheme://host:port` url) as always failing.
    pub fn with_dead_proxy(mut self, url: impl Into<String>) -> Self {
        self.dead_proxies.insert(url.into());
        self
    }

    pub fn with_no_data_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.no_data.insert(symbol.into());
        self
    }

    pub fn with_rate_limited_first(mut self, n: u64) -> Self {
        self.rate_limited_first = n;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn symbol_from_url(url: &str) -> String {
        if let Some(rest) = url.split("symbols=").nth(1) {
            return rest.split('&').next().unwrap_or("UNKNOWN").to_owned();
        }
        // chart form: .../v8/finance/chart/<symbol>?range=...
        url.split("/chart/")
            .nth(1)
            .and_then(|rest| rest.split('?').next())
            .unwrap_or("UNKNOWN")
            .to_owned()
    }

    fn fill_body(symbol: &str) -> String {
        format!(
            r#"{{"quoteResponse":{{"result":[{{"symbol":"{symbol}","regularMarketPrice":50.0,"regularMarketVolume":1200,"currency":"USD"}}],"error":null}}}}"#
        )
    }

    fn fill_chart_body() -> String {
        r#"{"chart":{"result":[{"meta":{"regularMarketPrice":50.0,"currency":"USD"},"indicators":{"quote":[{"close":[50.0],"volume":[1200]}]}}],"error":null}}"#
            .to_owned()
    }

    fn empty_body() -> String {
        r#"{"quoteResponse":{"result":[],"error":null}}"#.to_owned()
    }

    fn empty_chart_body() -> String {
        r#"{"chart":{"result":[],"error":null}}"#.to_owned()
    }
}

impl QuoteTransport for FlakyUpstream {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            let sequence = self.requests.fetch_add(1, Ordering::Relaxed);

            if let Some(proxy) = &request.proxy {
                if self.dead_proxies.contains(&proxy.url()) {
                    return Err(TransportError::connect("connection refused"));
                }
            }

            if sequence < self.rate_limited_first {
                return Ok(HttpResponse {
                    status: 999,
                    body: String::new(),
                });
            }

            let symbol = Self::symbol_from_url(&request.url);
            let is_chart = request.url.contains("/chart/");
            let body = match (self.no_data.contains(&symbol), is_chart) {
                (true, true) => Self::empty_chart_body(),
                (true, false) => Self::empty_body(),
                (false, true) => Self::fill_chart_body(),
                (false, false) => Self::fill_body(&symbol),
            };

            Ok(HttpResponse::ok_json(body))
        })
    }
}
