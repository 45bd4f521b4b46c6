//! Upstream quote API: endpoint construction and response parsing.
//!
//! Two cost tiers against the Yahoo-shaped public endpoints, plus an
//! optional history tier:
//!
//! | Tier | Endpoint | Payload |
//! |------|----------|---------|
//! | Fast | `/v7/finance/quote` | minimal-field quote row |
//! | Fallback | `/v8/finance/chart` (1d range) | chart meta + closes |
//! | History | `/v8/finance/chart` (5d range) | same, wider window |
//!
//! Parsing never throws: every body maps to a [`TierReply`] value, keeping
//! the strategy's retry/fallback logic a pure decision table.

use std::time::Duration;

use serde::Deserialize;

use crate::{HttpRequest, ProxyAddress, SourceTier, Symbol};

const DEFAULT_QUOTE_HOST: &str = "https://query1.finance.yahoo.com";
const FAST_FIELDS: &str = "regularMarketPrice,regularMarketVolume,regularMarketBid,regularMarketAsk,currency";

/// Endpoint builder for the upstream quote service. The host is swappable so
/// tests and mirrors can point elsewhere.
#[derive(Debug, Clone)]
pub struct UpstreamApi {
    host: String,
}

impl Default for UpstreamApi {
    fn default() -> Self {
        Self {
            host: DEFAULT_QUOTE_HOST.to_owned(),
        }
    }
}

impl UpstreamApi {
    pub fn with_host(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn url_for(&self, tier: SourceTier, symbol: &Symbol) -> String {
        let encoded = urlencoding::encode(symbol.as_str());
        match tier {
            SourceTier::Fast => format!(
                "{}/v7/finance/quote?symbols={}&fields={}",
                self.host, encoded, FAST_FIELDS
            ),
            SourceTier::Fallback => format!(
                "{}/v8/finance/chart/{}?range=1d&interval=1d&includePrePost=false",
                self.host, encoded
            ),
            SourceTier::History => format!(
                "{}/v8/finance/chart/{}?range=5d&interval=1d",
                self.host, encoded
            ),
        }
    }

    /// Full request envelope for one attempt.
    pub fn request(
        &self,
        tier: SourceTier,
        symbol: &Symbol,
        timeout: Duration,
        proxy: Option<ProxyAddress>,
    ) -> HttpRequest {
        HttpRequest::get(self.url_for(tier, symbol))
            .with_header("referer", "https://finance.yahoo.com/")
            .with_header("accept", "application/json")
            .with_timeout(timeout)
            .via_proxy(proxy)
    }
}

/// Raw quote fields extracted from one tier's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteFields {
    pub price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<u64>,
    pub currency: Option<String>,
}

/// Classified payload of one successful HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum TierReply {
    /// A usable price was present.
    Quote(QuoteFields),
    /// Structurally valid response, data legitimately absent (unknown
    /// symbol, or zero trading activity with no price).
    NoData,
    /// Body was not the expected shape — typical of proxies injecting
    /// interstitial HTML. Attributed to the proxy, not the symbol.
    Garbled(String),
}

/// Parse a 2xx body for the given tier.
pub fn parse_reply(tier: SourceTier, symbol: &Symbol, body: &str) -> TierReply {
    match tier {
        SourceTier::Fast => parse_quote_body(symbol, body),
        SourceTier::Fallback | SourceTier::History => parse_chart_body(body),
    }
}

fn parse_quote_body(symbol: &Symbol, body: &str) -> TierReply {
    let envelope: QuoteEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(error) => return TierReply::Garbled(error.to_string()),
    };

    if let Some(error) = envelope.quote_response.error {
        if !error.is_empty() {
            return TierReply::NoData;
        }
    }

    let row = envelope
        .quote_response
        .result
        .into_iter()
        .find(|row| row.symbol.eq_ignore_ascii_case(symbol.as_str()));
    let Some(row) = row else {
        return TierReply::NoData;
    };

    classify_fields(QuoteFields {
        price: row.regular_market_price.unwrap_or(0.0),
        bid: row.regular_market_bid,
        ask: row.regular_market_ask,
        volume: row.regular_market_volume.and_then(|v| u64::try_from(v).ok()),
        currency: row.currency,
    })
}

fn parse_chart_body(body: &str) -> TierReply {
    let envelope: ChartEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(error) => return TierReply::Garbled(error.to_string()),
    };

    if let Some(error) = envelope.chart.error {
        if !error.is_empty() {
            return TierReply::NoData;
        }
    }

    let Some(result) = envelope.chart.result.into_iter().next() else {
        return TierReply::NoData;
    };

    // Meta price is authoritative when present; otherwise fall back to the
    // last non-null close in the window.
    let closes = result
        .indicators
        .quote
        .first()
        .map(|quote| quote.close.as_slice())
        .unwrap_or(&[]);
    let last_close = closes.iter().rev().find_map(|close| *close);
    let price = result.meta.regular_market_price.or(last_close);

    let volumes = result
        .indicators
        .quote
        .first()
        .map(|quote| quote.volume.as_slice())
        .unwrap_or(&[]);
    let last_volume = volumes
        .iter()
        .rev()
        .find_map(|volume| *volume)
        .and_then(|v| u64::try_from(v).ok());

    classify_fields(QuoteFields {
        price: price.unwrap_or(0.0),
        bid: None,
        ask: None,
        volume: last_volume,
        currency: result.meta.currency,
    })
}

/// Zero price with zero activity is a legitimate empty market, not an error.
fn classify_fields(fields: QuoteFields) -> TierReply {
    if fields.price > 0.0 && fields.price.is_finite() {
        TierReply::Quote(fields)
    } else {
        TierReply::NoData
    }
}

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResponseData,
}

#[derive(Debug, Deserialize)]
struct QuoteResponseData {
    #[serde(default)]
    result: Vec<QuoteRow>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteRow {
    symbol: String,
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "regularMarketBid")]
    regular_market_bid: Option<f64>,
    #[serde(rename = "regularMarketAsk")]
    regular_market_ask: Option<f64>,
    #[serde(rename = "regularMarketVolume")]
    regular_market_volume: Option<i64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    result: Vec<ChartResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}
