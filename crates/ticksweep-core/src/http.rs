//! HTTP transport abstraction.
//!
//! The engine never talks to `reqwest` directly; workers build an
//! [`HttpRequest`] envelope (optionally routed through a leased proxy) and
//! hand it to a [`QuoteTransport`]. Tests substitute scripted transports.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use crate::ProxyAddress;

/// Yahoo-style upstreams answer throttled callers with 999 as well as 429.
const RATE_LIMIT_STATUSES: [u16; 2] = [429, 999];

/// Outbound GET envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub proxy: Option<ProxyAddress>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(4),
            proxy: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn via_proxy(mut self, proxy: Option<ProxyAddress>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Inbound response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn is_rate_limited(&self) -> bool {
        RATE_LIMIT_STATUSES.contains(&self.status)
    }
}

/// Transport-level failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The per-request deadline elapsed.
    Timeout,
    /// Connection could not be established (includes proxy handshakes).
    Connect,
    Other,
}

/// Transport failure with enough shape for fault attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Other,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Transport contract for quote fetches.
pub trait QuoteTransport: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;
}

/// No-op transport for deterministic offline tests.
#[derive(Debug, Default)]
pub struct NoopTransport;

impl QuoteTransport for NoopTransport {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        let _ = request;
        Box::pin(async move { Ok(HttpResponse::ok_json("{}")) })
    }
}

/// Production transport backed by `reqwest`.
///
/// `reqwest` binds a proxy at client construction, not per request, so this
/// transport keeps one direct client plus a lazily-built client per distinct
/// proxy address. The cache lock is never held across an await.
pub struct ReqwestTransport {
    direct: reqwest::Client,
    per_proxy: Mutex<HashMap<String, reqwest::Client>>,
    user_agent: String,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let user_agent = format!("ticksweep/{}", env!("CARGO_PKG_VERSION"));
        Self {
            direct: Self::build_client(&user_agent, None)
                .unwrap_or_else(|_| reqwest::Client::new()),
            per_proxy: Mutex::new(HashMap::new()),
            user_agent,
        }
    }

    fn build_client(
        user_agent: &str,
        proxy: Option<&ProxyAddress>,
    ) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(4));

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy.url())
                .map_err(|e| TransportError::connect(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| TransportError::other(format!("client build failed: {e}")))
    }

    fn client_for(&self, proxy: Option<&ProxyAddress>) -> Result<reqwest::Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let key = proxy.url();
        let mut cache = self
            .per_proxy
            .lock()
            .expect("proxy client cache lock is not poisoned");
        if let Some(client) = cache.get(&key) {
            return Ok(client.clone());
        }

        let client = Self::build_client(&self.user_agent, Some(proxy))?;
        cache.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteTransport for ReqwestTransport {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client_for(request.proxy.as_ref())?;

            let mut builder = client.get(&request.url).timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::connect(format!("connection failed: {e}"))
                } else {
                    TransportError::other(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::other(format!("failed to read body: {e}")))?;

            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_statuses_are_recognized() {
        for status in [429, 999] {
            let response = HttpResponse {
                status,
                body: String::new(),
            };
            assert!(response.is_rate_limited());
            assert!(!response.is_success());
        }
        assert!(!HttpResponse::ok_json("{}").is_rate_limited());
    }

    #[test]
    fn request_builder_lowercases_header_names() {
        let request = HttpRequest::get("https://example.test/quote")
            .with_header("Referer", "https://example.test/");
        assert_eq!(
            request.headers.get("referer").map(String::as_str),
            Some("https://example.test/")
        );
    }

    #[test]
    fn proxy_routing_is_carried_on_the_envelope() {
        let proxy = ProxyAddress::parse("10.1.1.1:3128").expect("valid");
        let request = HttpRequest::get("https://example.test").via_proxy(Some(proxy.clone()));
        assert_eq!(request.proxy, Some(proxy));
    }
}
