use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{Symbol, UtcDateTime, ValidationError};

/// Which retrieval tier produced a quote. Tiers are ordered by upstream cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Fast,
    Fallback,
    History,
}

impl SourceTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Fallback => "fallback",
            Self::History => "history",
        }
    }

    /// The next, more expensive tier, if any. `history_enabled` gates the
    /// final tier.
    pub const fn escalate(self, history_enabled: bool) -> Option<Self> {
        match self {
            Self::Fast => Some(Self::Fallback),
            Self::Fallback if history_enabled => Some(Self::History),
            Self::Fallback | Self::History => None,
        }
    }
}

impl Display for SourceTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure classification for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// Upstream throttled the caller (HTTP 429/999).
    RateLimited,
    /// Transport, connection, or proxy-specific fault.
    ProxyError,
    /// Upstream reachable, data legitimately absent.
    NoData,
    /// Per-request deadline exceeded; health-equivalent to a proxy fault.
    Timeout,
}

impl FailReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ProxyError => "proxy_error",
            Self::NoData => "no_data",
            Self::Timeout => "timeout",
        }
    }

    /// Whether this reason counts against the health of the proxy that
    /// carried the attempt.
    pub const fn penalizes_proxy(self) -> bool {
        matches!(self, Self::ProxyError | Self::Timeout)
    }
}

impl Display for FailReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated quote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<u64>,
    pub currency: String,
    pub as_of: UtcDateTime,
    pub tier: SourceTier,
}

impl Quote {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        price: f64,
        bid: Option<f64>,
        ask: Option<f64>,
        volume: Option<u64>,
        currency: impl AsRef<str>,
        as_of: UtcDateTime,
        tier: SourceTier,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("price", price)?;
        validate_optional_non_negative("bid", bid)?;
        validate_optional_non_negative("ask", ask)?;

        Ok(Self {
            symbol,
            price,
            bid,
            ask,
            volume,
            currency: validate_currency_code(currency.as_ref())?,
            as_of,
            tier,
        })
    }
}

/// Terminal outcome for one symbol. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchResult {
    Filled(Quote),
    Missed { symbol: Symbol, reason: FailReason },
}

impl FetchResult {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Filled(quote) => &quote.symbol,
            Self::Missed { symbol, .. } => symbol,
        }
    }

    pub const fn is_filled(&self) -> bool {
        matches!(self, Self::Filled(_))
    }

    pub fn reason(&self) -> Option<FailReason> {
        match self {
            Self::Filled(_) => None,
            Self::Missed { reason, .. } => Some(*reason),
        }
    }
}

/// Validate and normalize a currency to an uppercase 3-letter code.
pub fn validate_currency_code(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    let is_valid = normalized.len() == 3 && normalized.chars().all(|ch| ch.is_ascii_alphabetic());

    if !is_valid {
        return Err(ValidationError::InvalidCurrency {
            value: input.to_owned(),
        });
    }

    Ok(normalized)
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_non_negative(field, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    #[test]
    fn validates_currency() {
        assert_eq!(
            validate_currency_code("usd").expect("must normalize"),
            "USD"
        );
        assert!(matches!(
            validate_currency_code("USDT"),
            Err(ValidationError::InvalidCurrency { .. })
        ));
    }

    #[test]
    fn rejects_negative_price() {
        let err = Quote::new(
            symbol("AAPL"),
            -1.0,
            None,
            None,
            None,
            "USD",
            UtcDateTime::now(),
            SourceTier::Fast,
        )
        .expect_err("must fail");
        assert!(matches!(err, ValidationError::NegativeValue { field: "price" }));
    }

    #[test]
    fn tier_escalation_is_bounded() {
        assert_eq!(SourceTier::Fast.escalate(false), Some(SourceTier::Fallback));
        assert_eq!(SourceTier::Fallback.escalate(false), None);
        assert_eq!(
            SourceTier::Fallback.escalate(true),
            Some(SourceTier::History)
        );
        assert_eq!(SourceTier::History.escalate(true), None);
    }

    #[test]
    fn only_transport_faults_penalize_proxies() {
        assert!(FailReason::ProxyError.penalizes_proxy());
        assert!(FailReason::Timeout.penalizes_proxy());
        assert!(!FailReason::RateLimited.penalizes_proxy());
        assert!(!FailReason::NoData.penalizes_proxy());
    }
}
