//! External collaborator boundaries.
//!
//! The engine only ever sees these traits; where symbols and proxies come
//! from and where records go is the caller's business. In-memory
//! implementations back tests and small CLI runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::{Quote, SinkError};

/// Origin of the raw symbol universe. The engine normalizes and dedupes
/// whatever this yields.
pub trait SymbolSource: Send + Sync {
    fn load(&self) -> std::io::Result<Vec<String>>;
}

/// Origin of the raw proxy list. Malformed entries are skipped downstream,
/// never fatal.
pub trait ProxySource: Send + Sync {
    fn load(&self) -> std::io::Result<Vec<String>>;
}

/// Consumer of successfully fetched records. Called once per fill; the
/// engine counts persistence failures in metrics but never retries them.
pub trait ResultSink: Send + Sync {
    fn persist<'a>(
        &'a self,
        quote: &'a Quote,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;
}

/// Discards every record. Default sink for callers that only want the
/// result vector.
#[derive(Debug, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn persist<'a>(
        &'a self,
        quote: &'a Quote,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        let _ = quote;
        Box::pin(async move { Ok(()) })
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Quote>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Quote> {
        self.records.lock().expect("sink store").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("sink store").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn persist<'a>(
        &'a self,
        quote: &'a Quote,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            self.records.lock().expect("sink store").push(quote.clone());
            Ok(())
        })
    }
}

/// Fixed in-memory symbol list.
#[derive(Debug, Default)]
pub struct InMemorySymbols(pub Vec<String>);

impl SymbolSource for InMemorySymbols {
    fn load(&self) -> std::io::Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Fixed in-memory proxy list.
#[derive(Debug, Default)]
pub struct InMemoryProxies(pub Vec<String>);

impl ProxySource for InMemoryProxies {
    fn load(&self) -> std::io::Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SourceTier, Symbol, UtcDateTime};

    #[tokio::test]
    async fn memory_sink_accumulates_records() {
        let sink = MemorySink::new();
        let quote = Quote::new(
            Symbol::parse("AAPL").expect("valid"),
            101.5,
            None,
            None,
            Some(1_000),
            "USD",
            UtcDateTime::now(),
            SourceTier::Fast,
        )
        .expect("valid quote");

        sink.persist(&quote).await.expect("persist");
        sink.persist(&quote).await.expect("persist");
        assert_eq!(sink.len(), 2);
    }
}
