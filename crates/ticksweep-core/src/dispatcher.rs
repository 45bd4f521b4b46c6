//! Run orchestration: one bounded worker pool per run, fed by a shared
//! queue, collecting unordered results.
//!
//! The dispatcher never fails a run over individual symbols — partial
//! failure across thousands of symbols is the steady state. The only
//! aborting conditions are configuration errors (empty universe, proxies
//! required with none configured) and caller cancellation, which still
//! yields the partial result set.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use governor::{Quota, RateLimiter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::boundary::{NullSink, ResultSink};
use crate::domain::normalize_universe;
use crate::metrics::MetricsSnapshot;
use crate::proxy_pool::ProxyPool;
use crate::strategy::FetchStrategy;
use crate::throttle::RateLimitGovernor;
use crate::upstream::UpstreamApi;
use crate::{
    EngineConfig, EngineError, FetchResult, MetricsCollector, ProxyAddress, ProxyMode,
    QuoteTransport,
};

/// Run-scoped cooperative cancellation flag. Cloneable; workers observe it
/// between attempts, the collector wakes on it immediately.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation trips; immediately if it already has.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Periodic observability callback. Dropping snapshots has no correctness
/// impact.
pub type ProgressFn = Arc<dyn Fn(&MetricsSnapshot) + Send + Sync>;

/// Everything a finished (or cancelled) run hands back.
#[derive(Debug)]
pub struct RunOutcome {
    pub results: Vec<FetchResult>,
    pub metrics: MetricsSnapshot,
}

/// Acquisition run coordinator.
///
/// Owns the pool and governor for its runs; nothing here is process-global,
/// so independent dispatchers can coexist in one process (and one test).
pub struct Dispatcher {
    config: EngineConfig,
    transport: Arc<dyn QuoteTransport>,
    api: UpstreamApi,
    pool: Arc<ProxyPool>,
    governor: Arc<RateLimitGovernor>,
    sink: Arc<dyn ResultSink>,
    progress: Option<ProgressFn>,
}

impl Dispatcher {
    /// Build a dispatcher over the given proxy candidates. The pool and
    /// governor are constructed from `config`.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn QuoteTransport>,
        proxies: Vec<ProxyAddress>,
    ) -> Self {
        let pool = Arc::new(ProxyPool::new(proxies, config.pool));
        let governor = Arc::new(RateLimitGovernor::new(config.governor.clone()));
        Self {
            config,
            transport,
            api: UpstreamApi::default(),
            pool,
            governor,
            sink: Arc::new(NullSink),
            progress: None,
        }
    }

    pub fn with_api(mut self, api: UpstreamApi) -> Self {
        self.api = api;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn pool(&self) -> Arc<ProxyPool> {
        Arc::clone(&self.pool)
    }

    pub fn governor(&self) -> Arc<RateLimitGovernor> {
        Arc::clone(&self.governor)
    }

    /// Execute one run to completion or cancellation.
    ///
    /// Exactly one [`FetchResult`] per processed symbol, in completion
    /// order. Under cancellation the set stays 1:1 with the symbols that
    /// finished before the flag tripped.
    pub async fn run<I, S>(
        &self,
        symbols: I,
        cancel: CancelHandle,
    ) -> Result<RunOutcome, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.validate()?;

        let universe = normalize_universe(symbols);
        if universe.is_empty() {
            return Err(EngineError::EmptyUniverse);
        }
        if matches!(self.config.proxy_mode, ProxyMode::Required) && self.pool.is_empty() {
            return Err(EngineError::NoProxies);
        }

        let total = universe.len();
        let metrics = Arc::new(MetricsCollector::new(total));
        tracing::info!(
            run_id = %metrics.run_id(),
            total,
            concurrency = self.config.concurrency,
            proxies = self.pool.len(),
            "acquisition run starting"
        );

        let pacer = self
            .config
            .requests_per_second
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        let strategy = Arc::new(FetchStrategy::new(
            Arc::clone(&self.transport),
            self.api.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.governor),
            Arc::clone(&metrics),
            pacer,
            self.config.clone(),
        ));

        let queue = Arc::new(Mutex::new(universe.into_iter().collect::<VecDeque<_>>()));
        let (tx, mut rx) = mpsc::unbounded_channel::<FetchResult>();

        let workers = self.config.concurrency.min(total).max(1);
        let mut join_set = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let strategy = Arc::clone(&strategy);
            let metrics = Arc::clone(&metrics);
            let sink = Arc::clone(&self.sink);
            let cancel = cancel.clone();
            let tx = tx.clone();

            join_set.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().expect("work queue lock").pop_front();
                    let Some(symbol) = next else {
                        break;
                    };

                    let Some(result) = strategy.fetch(symbol, &cancel).await else {
                        // Abandoned mid-retry; the symbol is unprocessed.
                        break;
                    };

                    match &result {
                        FetchResult::Filled(quote) => {
                            metrics.record_success();
                            if let Err(error) = sink.persist(quote).await {
                                metrics.record_persist_error();
                                tracing::warn!(symbol = %quote.symbol, %error, "persist failed");
                            }
                        }
                        FetchResult::Missed { reason, .. } => {
                            metrics.record_failure(*reason);
                        }
                    }

                    if tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        loop {
            let next = if cancel.is_cancelled() {
                match tokio::time::timeout(self.config.grace, rx.recv()).await {
                    Ok(next) => next,
                    Err(_elapsed) => {
                        tracing::warn!(
                            grace_secs = self.config.grace.as_secs(),
                            "grace elapsed; abandoning in-flight attempts"
                        );
                        join_set.abort_all();
                        // Keep anything that completed before the abort.
                        while let Ok(result) = rx.try_recv() {
                            results.push(result);
                        }
                        None
                    }
                }
            } else {
                tokio::select! {
                    next = rx.recv() => next,
                    // Arm the grace timeout the moment cancellation trips.
                    _ = cancel.cancelled() => continue,
                }
            };

            let Some(result) = next else {
                break;
            };
            results.push(result);

            if results.len() % self.config.progress_every == 0 {
                self.emit_progress(&metrics);
            }
        }

        while join_set.join_next().await.is_some() {}

        let snapshot = metrics.snapshot();
        if let Some(progress) = &self.progress {
            progress(&snapshot);
        }
        tracing::info!(
            run_id = %snapshot.run_id,
            processed = snapshot.processed,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            success_rate = format!("{:.1}%", snapshot.success_rate * 100.0),
            throughput = format!("{:.1}/s", snapshot.throughput_per_sec),
            "acquisition run finished"
        );

        Ok(RunOutcome {
            results,
            metrics: snapshot,
        })
    }

    fn emit_progress(&self, metrics: &MetricsCollector) {
        let snapshot = metrics.snapshot();
        tracing::info!(
            processed = snapshot.processed,
            total = snapshot.total,
            success_rate = format!("{:.1}%", snapshot.success_rate * 100.0),
            eta_secs = format!("{:.0}", snapshot.eta_seconds),
            throttled = self.governor.should_slow_down(),
            "progress"
        );
        if let Some(progress) = &self.progress {
            progress(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::future::Future;
    use std::pin::Pin;

    use crate::boundary::MemorySink;
    use crate::{HttpRequest, HttpResponse, SinkError, TransportError};

    /// Answers every fast-tier request with a fill for the symbol named in
    /// the URL.
    struct EchoTransport;

    fn symbol_from_url(url: &str) -> String {
        url.split("symbols=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap_or("UNKNOWN")
            .to_owned()
    }

    impl QuoteTransport for EchoTransport {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>
        {
            let symbol = symbol_from_url(&request.url);
            Box::pin(async move {
                Ok(HttpResponse::ok_json(format!(
                    r#"{{"quoteResponse":{{"result":[{{"symbol":"{symbol}","regularMarketPrice":50.0,"regularMarketVolume":100,"currency":"USD"}}],"error":null}}}}"#
                )))
            })
        }
    }

    struct RejectingSink;

    impl ResultSink for RejectingSink {
        fn persist<'a>(
            &'a self,
            _quote: &'a crate::Quote,
        ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
            Box::pin(async move { Err(SinkError::new("storage offline")) })
        }
    }

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("SYM{i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn every_symbol_yields_exactly_one_result() {
        let dispatcher = Dispatcher::new(
            EngineConfig::default().with_concurrency(8),
            Arc::new(EchoTransport),
            Vec::new(),
        );

        let outcome = dispatcher
            .run(symbols(40), CancelHandle::new())
            .await
            .expect("run completes");

        assert_eq!(outcome.results.len(), 40);
        let unique: HashSet<&str> = outcome
            .results
            .iter()
            .map(|r| r.symbol().as_str())
            .collect();
        assert_eq!(unique.len(), 40, "no duplicates, no drops");
        assert_eq!(outcome.metrics.processed, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_and_junk_input_is_normalized_away() {
        let dispatcher = Dispatcher::new(
            EngineConfig::default(),
            Arc::new(EchoTransport),
            Vec::new(),
        );

        let input = vec!["aapl", "AAPL", " msft ", "!!!", "MSFT"];
        let outcome = dispatcher
            .run(input, CancelHandle::new())
            .await
            .expect("run completes");

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.metrics.total, 2);
    }

    #[tokio::test]
    async fn empty_universe_aborts_the_run() {
        let dispatcher = Dispatcher::new(
            EngineConfig::default(),
            Arc::new(EchoTransport),
            Vec::new(),
        );

        let error = dispatcher
            .run(Vec::<String>::new(), CancelHandle::new())
            .await
            .expect_err("must abort");
        assert!(matches!(error, EngineError::EmptyUniverse));
    }

    #[tokio::test]
    async fn required_proxy_mode_refuses_an_empty_pool() {
        let dispatcher = Dispatcher::new(
            EngineConfig::default().with_proxy_mode(ProxyMode::Required),
            Arc::new(EchoTransport),
            Vec::new(),
        );

        let error = dispatcher
            .run(symbols(3), CancelHandle::new())
            .await
            .expect_err("must abort");
        assert!(matches!(error, EngineError::NoProxies));
    }

    #[tokio::test(start_paused = true)]
    async fn fills_flow_into_the_sink() {
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Dispatcher::new(
            EngineConfig::default(),
            Arc::new(EchoTransport),
            Vec::new(),
        )
        .with_sink(Arc::clone(&sink) as Arc<dyn ResultSink>);

        dispatcher
            .run(symbols(5), CancelHandle::new())
            .await
            .expect("run completes");

        assert_eq!(sink.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn persist_failures_are_counted_not_retried() {
        let dispatcher = Dispatcher::new(
            EngineConfig::default(),
            Arc::new(EchoTransport),
            Vec::new(),
        )
        .with_sink(Arc::new(RejectingSink));

        let outcome = dispatcher
            .run(symbols(4), CancelHandle::new())
            .await
            .expect("run completes despite sink failures");

        assert_eq!(outcome.metrics.persist_errors, 4);
        assert_eq!(outcome.metrics.succeeded, 4, "fetches still count");
    }

    #[tokio::test(start_paused = true)]
    async fn progress_callback_observes_the_run() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let dispatcher = Dispatcher::new(
            EngineConfig::default().with_progress_every(10),
            Arc::new(EchoTransport),
            Vec::new(),
        )
        .with_progress(Arc::new(move |snapshot: &MetricsSnapshot| {
            sink.lock().expect("progress log").push(snapshot.processed);
        }));

        dispatcher
            .run(symbols(25), CancelHandle::new())
            .await
            .expect("run completes");

        let seen = seen.lock().expect("progress log");
        assert!(
            seen.len() >= 2,
            "periodic snapshots plus the final one, got {seen:?}"
        );
        assert_eq!(*seen.last().expect("final snapshot"), 25);
    }
}
