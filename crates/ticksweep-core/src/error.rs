use thiserror::Error;

/// Domain construction failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("symbol is {len} characters long, maximum is {max}")]
    SymbolTooLong { len: usize, max: usize },

    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },

    #[error("field '{field}' must not be negative")]
    NegativeValue { field: &'static str },

    #[error("currency '{value}' is not a 3-letter code")]
    InvalidCurrency { value: String },

    #[error("proxy address '{value}' is malformed")]
    MalformedProxy { value: String },

    #[error("timestamp is not valid UTC: {reason}")]
    InvalidTimestamp { reason: String },

    #[error("configuration rejected: {reason}")]
    InvalidConfig { reason: String },
}

/// Run-aborting conditions. Per-symbol failures never surface here; they are
/// values in the result set.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("symbol universe is empty after normalization")]
    EmptyUniverse,

    #[error("proxy usage is required but the pool holds no candidates")]
    NoProxies,

    #[error(transparent)]
    InvalidConfig(#[from] ValidationError),
}

/// Persistence boundary failure reported by a [`ResultSink`].
///
/// [`ResultSink`]: crate::boundary::ResultSink
#[derive(Debug, Clone, Error)]
#[error("sink rejected record: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
