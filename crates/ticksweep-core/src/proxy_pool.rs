//! Proxy candidate set with per-proxy health and circuit breaking.
//!
//! The pool owns all mutable proxy state behind one mutex. Callers hold a
//! [`ProxyLease`] guard for the duration of an attempt; dropping the guard
//! releases the slot, so a lease can never leak across early returns or task
//! cancellation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{FailReason, ProxyAddress};

/// Circuit-breaking thresholds for pool entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyPoolConfig {
    /// Consecutive failures before an entry is blocked.
    pub failure_threshold: u32,
    /// How long a blocked entry is skipped by `lease`.
    pub cooldown: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Stable identity of one pool entry. Ids are not reused across `refresh`,
/// so stale reports against a swapped-out generation are silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyId(u64);

#[derive(Debug)]
struct ProxyEntry {
    id: ProxyId,
    addr: ProxyAddress,
    consecutive_failures: u32,
    success_count: u64,
    blocked_until: Option<Instant>,
    last_failure_at: Option<Instant>,
    leased: bool,
}

impl ProxyEntry {
    fn new(id: ProxyId, addr: ProxyAddress) -> Self {
        Self {
            id,
            addr,
            consecutive_failures: 0,
            success_count: 0,
            blocked_until: None,
            last_failure_at: None,
            leased: false,
        }
    }

    fn blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}

/// Read-only health view of one entry, for observability and tests.
#[derive(Debug, Clone)]
pub struct ProxyStatus {
    pub addr: ProxyAddress,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub blocked: bool,
    pub leased: bool,
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: Vec<ProxyEntry>,
    next_id: u64,
}

impl PoolInner {
    fn push(&mut self, addr: ProxyAddress) {
        let id = ProxyId(self.next_id);
        self.next_id += 1;
        self.entries.push(ProxyEntry::new(id, addr));
    }

    fn entry_mut(&mut self, id: ProxyId) -> Option<&mut ProxyEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }
}

/// Thread-safe proxy pool. Construct once per run and share via [`Arc`].
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    inner: Mutex<PoolInner>,
}

impl ProxyPool {
    pub fn new<I>(addresses: I, config: ProxyPoolConfig) -> Self
    where
        I: IntoIterator<Item = ProxyAddress>,
    {
        let mut inner = PoolInner::default();
        for addr in addresses {
            inner.push(addr);
        }
        Self {
            config,
            inner: Mutex::new(inner),
        }
    }

    /// Lease the healthiest eligible proxy: not leased, not in `exclude`,
    /// and not blocked (or past cooldown). Candidates are ranked by ascending
    /// consecutive-failure count.
    ///
    /// When every candidate is blocked the pool degrades gracefully by
    /// unblocking the least-recently-failed entry instead of starving the
    /// caller. `None` means no candidate exists at all; callers fall back to
    /// direct fetching or wait, never abort.
    pub fn lease(self: &Arc<Self>, exclude: &HashSet<ProxyId>) -> Option<ProxyLease> {
        let mut inner = self.lock();
        let now = Instant::now();

        let pick = {
            let mut eligible: Vec<&ProxyEntry> = inner
                .entries
                .iter()
                .filter(|entry| !entry.leased && !exclude.contains(&entry.id))
                .collect();
            if eligible.is_empty() {
                return None;
            }

            let any_unblocked = eligible.iter().any(|entry| !entry.blocked(now));
            if any_unblocked {
                eligible.retain(|entry| !entry.blocked(now));
                eligible.sort_by_key(|entry| entry.consecutive_failures);
                eligible.first().map(|entry| entry.id)
            } else {
                // Whole pool is cooling down. Revive the entry that failed
                // longest ago rather than returning permanently empty.
                eligible.sort_by_key(|entry| entry.last_failure_at);
                let revived = eligible.first().map(|entry| entry.id);
                if let Some(id) = revived {
                    tracing::warn!(?id, "all proxies blocked; reviving least-recently-failed");
                }
                revived
            }
        };

        let id = pick?;
        let entry = inner.entry_mut(id).expect("picked entry exists");
        entry.blocked_until = None;
        entry.leased = true;
        let addr = entry.addr.clone();

        Some(ProxyLease {
            pool: Arc::clone(self),
            id,
            addr,
            settled: false,
        })
    }

    /// Clear the lease bit. Idempotent; unknown ids (stale generation) are
    /// ignored.
    pub fn release(&self, id: ProxyId) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entry_mut(id) {
            entry.leased = false;
        }
    }

    /// Record a successful attempt: health resets, block clears, lease ends.
    pub fn report_success(&self, id: ProxyId) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entry_mut(id) {
            entry.consecutive_failures = 0;
            entry.blocked_until = None;
            entry.success_count += 1;
            entry.leased = false;
        }
    }

    /// Record a failed attempt. Only reasons that penalize proxies advance
    /// the failure counter; crossing the threshold blocks the entry for the
    /// configured cooldown. The lease ends either way.
    pub fn report_failure(&self, id: ProxyId, reason: FailReason) {
        let threshold = self.config.failure_threshold;
        let cooldown = self.config.cooldown;

        let mut inner = self.lock();
        let Some(entry) = inner.entry_mut(id) else {
            return;
        };
        entry.leased = false;

        if !reason.penalizes_proxy() {
            return;
        }

        let now = Instant::now();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_failure_at = Some(now);

        if entry.consecutive_failures >= threshold && !entry.blocked(now) {
            entry.blocked_until = Some(now + cooldown);
            tracing::debug!(
                proxy = %entry.addr,
                failures = entry.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "proxy blocked"
            );
        }
    }

    /// Atomically swap the candidate set. All leases are cleared; guards
    /// still outstanding settle against the old generation as no-ops.
    pub fn refresh<I>(&self, addresses: I)
    where
        I: IntoIterator<Item = ProxyAddress>,
    {
        let mut inner = self.lock();
        inner.entries.clear();
        for addr in addresses {
            inner.push(addr);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Entries currently eligible for a fresh lease.
    pub fn available(&self) -> usize {
        let inner = self.lock();
        let now = Instant::now();
        inner
            .entries
            .iter()
            .filter(|entry| !entry.leased && !entry.blocked(now))
            .count()
    }

    pub fn statuses(&self) -> Vec<ProxyStatus> {
        let inner = self.lock();
        let now = Instant::now();
        inner
            .entries
            .iter()
            .map(|entry| ProxyStatus {
                addr: entry.addr.clone(),
                consecutive_failures: entry.consecutive_failures,
                success_count: entry.success_count,
                blocked: entry.blocked(now),
                leased: entry.leased,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("proxy pool lock is not poisoned")
    }
}

/// Scoped binding of one proxy to one in-flight attempt.
///
/// Exactly one of three things ends the lease: [`succeed`](Self::succeed),
/// [`fail`](Self::fail), or the guard dropping (plain release, no health
/// change).
#[derive(Debug)]
pub struct ProxyLease {
    pool: Arc<ProxyPool>,
    id: ProxyId,
    addr: ProxyAddress,
    settled: bool,
}

impl ProxyLease {
    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn addr(&self) -> &ProxyAddress {
        &self.addr
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.pool.report_success(self.id);
    }

    pub fn fail(mut self, reason: FailReason) {
        self.settled = true;
        self.pool.report_failure(self.id, reason);
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        if !self.settled {
            self.pool.release(self.id);
        }
    }
}
