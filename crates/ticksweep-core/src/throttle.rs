//! Process-wide rate-limit governor.
//!
//! Workers report definitive throttle signals (HTTP 429/999) here instead of
//! reacting individually; the governor converts cumulative hits into one
//! global pre-request delay so a detected block slows the whole pool down at
//! once.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Governor thresholds and delay tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorConfig {
    /// A signal within this window means "actively throttled".
    pub recent_window: Duration,
    /// Cumulative hits past this mark force slowdown even without a recent
    /// signal.
    pub high_water: u32,
    /// Hits reset once the last signal is older than this.
    pub stale_after: Duration,
    /// `(min_hits, delay)` tiers, ascending. Delay is the largest tier whose
    /// threshold is met.
    pub tiers: Vec<(u32, Duration)>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            recent_window: Duration::from_secs(5),
            high_water: 10,
            stale_after: Duration::from_secs(60),
            tiers: vec![
                (3, Duration::from_millis(500)),
                (6, Duration::from_secs(1)),
                (10, Duration::from_secs(2)),
            ],
        }
    }
}

#[derive(Debug, Default)]
struct GovernorState {
    hits: u32,
    last_hit_at: Option<Instant>,
}

impl GovernorState {
    fn decay_if_stale(&mut self, stale_after: Duration, now: Instant) {
        if let Some(last) = self.last_hit_at {
            if now.duration_since(last) >= stale_after {
                self.hits = 0;
                self.last_hit_at = None;
            }
        }
    }
}

/// Shared throttle-signal aggregator. Construct once per run and share via
/// `Arc`; no process-global state.
#[derive(Debug)]
pub struct RateLimitGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
}

impl Default for RateLimitGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

impl RateLimitGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GovernorState::default()),
        }
    }

    /// Record one definitive throttle response.
    pub fn signal(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.decay_if_stale(self.config.stale_after, now);
        state.hits = state.hits.saturating_add(1);
        state.last_hit_at = Some(now);
        tracing::debug!(hits = state.hits, "rate-limit signal recorded");
    }

    /// Whether callers should pace themselves right now.
    pub fn should_slow_down(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        state.decay_if_stale(self.config.stale_after, now);

        let recent = state
            .last_hit_at
            .is_some_and(|last| now.duration_since(last) < self.config.recent_window);
        recent || state.hits >= self.config.high_water
    }

    /// Pre-request delay. A monotonic step function of cumulative hits:
    /// zero until the first tier threshold, then the configured tiers.
    pub fn current_delay(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.lock();
        state.decay_if_stale(self.config.stale_after, now);

        self.config
            .tiers
            .iter()
            .filter(|(min_hits, _)| state.hits >= *min_hits)
            .map(|(_, delay)| *delay)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Cumulative non-stale hit count.
    pub fn hits(&self) -> u32 {
        let now = Instant::now();
        let mut state = self.lock();
        state.decay_if_stale(self.config.stale_after, now);
        state.hits
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GovernorState> {
        self.state.lock().expect("governor lock is not poisoned")
    }
}
