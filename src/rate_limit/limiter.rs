//! Fixed-window rate limiting with a bounded FIFO wait queue
//!
//! Each key counts admissions in a window of `window` length. Once the cap
//! is reached, callers wait in a queue of at most `queue_size` entries. When
//! the window resets, queued callers are admitted in arrival order up to the
//! fresh capacity. A queued caller whose own `queue_timeout` fires first is
//! removed from the queue and fails.
//!
//! Draining and timing out both resolve under the entry lock, so each waiter
//! completes exactly once.
//!
//! # Example
//!
//! ```rust
//! use lighter_gateway::rate_limit::{RateLimit, RateLimiter, RateLimiterConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::new(RateLimiterConfig::default());
//! let limit = RateLimit::default();
//!
//! let permit = limiter.acquire("10.0.0.1", &limit).await?;
//! // ... handle the request ...
//! permit.complete(true);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

/// Queue timeout applied to latency-sensitive routes
pub const LATENCY_SENSITIVE_QUEUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for configured windows and waits, in milliseconds (one day)
pub const MAX_LIMIT_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// Admission limits for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub window: Duration,
    pub max_requests: u32,
    /// Waiters held once the window is full
    pub queue_size: usize,
    /// How long a waiter may stay queued
    pub queue_timeout: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            queue_size: 10,
            queue_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub default_limit: RateLimit,
    /// Refund the slot of requests that completed successfully
    pub skip_successful_requests: bool,
    /// Refund the slot of requests that failed
    pub skip_failed_requests: bool,
    pub cleanup_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: RateLimit::default(),
            skip_successful_requests: false,
            skip_failed_requests: false,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Window cap reached and the wait queue is full
    #[error("Rate limit exceeded for {key}: queue is full")]
    QueueFull { key: String, retry_after: Duration },

    /// Queued past the wait budget
    #[error("Rate limit queue timeout for {key} after {waited:?}")]
    Timeout { key: String, waited: Duration },
}

/// Outcome of [`RateLimiter::admit`]
#[derive(Debug)]
pub enum Admission {
    Admitted(Permit),
    Queued(Ticket),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub total_requests: u64,
    pub admitted: u64,
    pub queued: u64,
    /// Rejected because the queue was full
    pub rejected: u64,
    pub timed_out: u64,
    pub active_keys: usize,
    /// Waiters currently queued across all keys
    pub waiting: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    pub key: String,
    pub count: u32,
    pub max_requests: u32,
    pub queue_length: usize,
    pub queue_size: usize,
    pub resets_in_ms: u64,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<u64>,
}

struct Entry {
    count: u32,
    window_reset_at: Instant,
    /// Bumped on every window rollover
    window_seq: u64,
    limit: RateLimit,
    queue: VecDeque<Waiter>,
    drain_scheduled: bool,
}

impl Entry {
    fn new(limit: RateLimit, now: Instant) -> Self {
        Self {
            count: 0,
            window_reset_at: now + limit.window,
            window_seq: 0,
            limit,
            queue: VecDeque::new(),
            drain_scheduled: false,
        }
    }

    fn roll_over(&mut self, now: Instant) {
        self.count = 0;
        self.window_reset_at = now + self.limit.window;
        self.window_seq += 1;
    }

    fn is_dormant(&self, now: Instant) -> bool {
        now >= self.window_reset_at && self.queue.is_empty()
    }
}

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    admitted: AtomicU64,
    queued: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
}

struct Shared {
    entries: DashMap<String, Entry>,
    next_waiter: AtomicU64,
    counters: Counters,
    skip_successful_requests: bool,
    skip_failed_requests: bool,
}

impl Shared {
    /// Admit queued waiters FIFO while capacity remains. Caller holds the entry.
    fn drain(&self, entry: &mut Entry) {
        while entry.count < entry.limit.max_requests {
            let Some(waiter) = entry.queue.pop_front() else {
                break;
            };
            // A closed receiver means the waiter gave up; its slot stays free.
            if waiter.tx.send(entry.window_seq).is_ok() {
                entry.count += 1;
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_rate_limit_decision("drained");
            }
        }
    }

    /// Called by the drain timer at window reset
    fn drain_due(self: &Arc<Self>, key: &str) {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.drain_scheduled = false;

        let now = Instant::now();
        if now >= entry.window_reset_at {
            entry.roll_over(now);
        }
        self.drain(&mut entry);

        if !entry.queue.is_empty() {
            self.schedule_drain(key, &mut entry);
        }
    }

    fn schedule_drain(self: &Arc<Self>, key: &str, entry: &mut Entry) {
        if entry.drain_scheduled {
            return;
        }
        entry.drain_scheduled = true;

        let shared = Arc::clone(self);
        let key = key.to_string();
        let at = tokio::time::Instant::from_std(entry.window_reset_at);
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            shared.drain_due(&key);
        });
    }

    /// Give back one slot of window `seq`
    fn release(&self, key: &str, seq: u64) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.window_seq == seq && entry.count > 0 {
                entry.count -= 1;
                self.drain(&mut entry);
            }
        }
    }

    /// Remove a waiter that stopped waiting.
    ///
    /// Returns the admission if the waiter was drained before it could be
    /// removed.
    fn withdraw(&self, key: &str, id: u64, rx: &mut oneshot::Receiver<u64>) -> Option<u64> {
        let mut entry = self.entries.get_mut(key);
        if let Some(entry) = entry.as_mut() {
            if let Some(position) = entry.queue.iter().position(|waiter| waiter.id == id) {
                entry.queue.remove(position);
                return None;
            }
        }
        // Not queued any more: the drain already sent our admission.
        rx.try_recv().ok()
    }
}

/// Admission slot held for the duration of a request
pub struct Permit {
    shared: Option<Arc<Shared>>,
    key: String,
    window_seq: u64,
}

impl Permit {
    fn unlimited(key: &str) -> Self {
        Self {
            shared: None,
            key: key.to_string(),
            window_seq: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Report the request outcome; refunds the slot when configured to skip it
    pub fn complete(self, success: bool) {
        let Some(shared) = &self.shared else {
            return;
        };
        let skip = if success {
            shared.skip_successful_requests
        } else {
            shared.skip_failed_requests
        };
        if skip {
            shared.release(&self.key, self.window_seq);
        }
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("key", &self.key)
            .field("window_seq", &self.window_seq)
            .finish()
    }
}

/// Place in a key's wait queue
pub struct Ticket {
    shared: Arc<Shared>,
    key: String,
    id: u64,
    position: usize,
    eta: Duration,
    enqueued_at: Instant,
    deadline: Instant,
    rx: oneshot::Receiver<u64>,
    settled: bool,
}

impl Ticket {
    /// 1-based position at enqueue time
    pub fn position(&self) -> usize {
        self.position
    }

    /// Estimated wait until admission
    pub fn eta(&self) -> Duration {
        self.eta
    }

    pub fn eta_seconds(&self) -> u64 {
        self.eta.as_millis().div_ceil(1000) as u64
    }

    /// Wait until drained into a window or until the queue timeout fires.
    ///
    /// The timeout counts from the moment the caller was queued.
    pub async fn wait(mut self) -> Result<Permit, RateLimitError> {
        let deadline = tokio::time::sleep_until(tokio::time::Instant::from_std(self.deadline));

        let drained = tokio::select! {
            biased;
            admitted = &mut self.rx => admitted.ok(),
            _ = deadline => None,
        };

        let admitted = match drained {
            Some(seq) => Some(seq),
            None => self.shared.withdraw(&self.key, self.id, &mut self.rx),
        };
        self.settled = true;

        match admitted {
            Some(window_seq) => Ok(Permit {
                shared: Some(Arc::clone(&self.shared)),
                key: self.key.clone(),
                window_seq,
            }),
            None => {
                self.shared.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_rate_limit_decision("timeout");
                let waited = self.enqueued_at.elapsed();
                tracing::warn!(key = %self.key, waited = ?waited, "Queued request timed out");
                Err(RateLimitError::Timeout {
                    key: self.key.clone(),
                    waited,
                })
            }
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Abandoned without waiting: free the queue slot, or the window slot
        // if the drain got there first.
        if let Some(seq) = self.shared.withdraw(&self.key, self.id, &mut self.rx) {
            self.shared.release(&self.key, seq);
        }
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("key", &self.key)
            .field("position", &self.position)
            .field("eta", &self.eta)
            .finish()
    }
}

pub struct RateLimiter {
    shared: Arc<Shared>,
    config: RateLimiterConfig,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: DashMap::with_shard_amount((num_cpus::get() * 4).next_power_of_two()),
                next_waiter: AtomicU64::new(0),
                counters: Counters::default(),
                skip_successful_requests: config.skip_successful_requests,
                skip_failed_requests: config.skip_failed_requests,
            }),
            config,
            cleanup: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn default_limit(&self) -> &RateLimit {
        &self.config.default_limit
    }

    /// Decide admission for `key` without waiting.
    ///
    /// Must be called within a tokio runtime when the caller may be queued.
    #[tracing::instrument(skip(self, limit), fields(key = %key))]
    pub fn admit(&self, key: &str, limit: &RateLimit) -> Result<Admission, RateLimitError> {
        if !self.config.enabled {
            return Ok(Admission::Admitted(Permit::unlimited(key)));
        }

        let counters = &self.shared.counters;
        counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut entry = self
            .shared
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(limit.clone(), now));

        if entry.limit != *limit {
            entry.limit = limit.clone();
        }
        if now >= entry.window_reset_at {
            entry.roll_over(now);
            self.shared.drain(&mut entry);
        }

        if entry.count < entry.limit.max_requests && entry.queue.is_empty() {
            entry.count += 1;
            counters.admitted.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_rate_limit_decision("admitted");
            return Ok(Admission::Admitted(Permit {
                shared: Some(Arc::clone(&self.shared)),
                key: key.to_string(),
                window_seq: entry.window_seq,
            }));
        }

        let until_reset = entry.window_reset_at.saturating_duration_since(now);

        if entry.queue.len() >= entry.limit.queue_size {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_rate_limit_decision("rejected");
            tracing::warn!(
                count = entry.count,
                queue_length = entry.queue.len(),
                retry_after = ?until_reset,
                "Rate limit exceeded, queue full"
            );
            return Err(RateLimitError::QueueFull {
                key: key.to_string(),
                retry_after: until_reset,
            });
        }

        let id = self.shared.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        entry.queue.push_back(Waiter { id, tx });
        let position = entry.queue.len();

        // Windows needed before this position comes up.
        let max = entry.limit.max_requests.max(1) as usize;
        let extra_windows = ((position - 1) / max) as u32;
        let eta = until_reset + entry.limit.window * extra_windows;

        self.shared.schedule_drain(key, &mut entry);

        counters.queued.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_rate_limit_decision("queued");
        tracing::debug!(position, eta = ?eta, "Request queued");

        Ok(Admission::Queued(Ticket {
            shared: Arc::clone(&self.shared),
            key: key.to_string(),
            id,
            position,
            eta,
            enqueued_at: now,
            deadline: now + entry.limit.queue_timeout,
            rx,
            settled: false,
        }))
    }

    /// Admit, waiting in the queue if needed
    pub async fn acquire(&self, key: &str, limit: &RateLimit) -> Result<Permit, RateLimitError> {
        match self.admit(key, limit)? {
            Admission::Admitted(permit) => Ok(permit),
            Admission::Queued(ticket) => ticket.wait().await,
        }
    }

    /// Start a fresh window for `key`, draining waiters into it.
    ///
    /// Returns false when the key has no entry.
    pub fn reset(&self, key: &str) -> bool {
        let Some(mut entry) = self.shared.entries.get_mut(key) else {
            return false;
        };
        entry.roll_over(Instant::now());
        self.shared.drain(&mut entry);
        tracing::info!(key = %key, "Rate limit window reset");
        true
    }

    /// Drop entries whose window expired with nothing queued
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.shared.entries.len();
        self.shared.entries.retain(|_, entry| !entry.is_dormant(now));
        let purged = before.saturating_sub(self.shared.entries.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged dormant rate limit entries");
        }
        purged
    }

    /// Spawn the periodic purge. Needs a tokio runtime; later calls are no-ops.
    pub fn start_cleanup(&self) {
        let mut cleanup = self.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
        if cleanup.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let period = self.config.cleanup_interval;
        *cleanup = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let now = Instant::now();
                shared.entries.retain(|_, entry| !entry.is_dormant(now));
            }
        }));
    }

    pub fn stop_cleanup(&self) {
        if let Some(handle) = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    pub fn key_stats(&self, key: &str) -> Option<KeyStats> {
        let now = Instant::now();
        self.shared.entries.get(key).map(|entry| KeyStats {
            key: key.to_string(),
            count: entry.count,
            max_requests: entry.limit.max_requests,
            queue_length: entry.queue.len(),
            queue_size: entry.limit.queue_size,
            resets_in_ms: entry.window_reset_at.saturating_duration_since(now).as_millis() as u64,
        })
    }

    /// Every tracked key, sorted
    pub fn all_key_stats(&self) -> Vec<KeyStats> {
        let mut keys: Vec<String> = self.shared.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.iter().filter_map(|key| self.key_stats(key)).collect()
    }

    pub fn stats(&self) -> RateLimiterStats {
        let counters = &self.shared.counters;
        RateLimiterStats {
            enabled: self.config.enabled,
            total_requests: counters.total_requests.load(Ordering::Relaxed),
            admitted: counters.admitted.load(Ordering::Relaxed),
            queued: counters.queued.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            active_keys: self.shared.entries.len(),
            waiting: self.shared.entries.iter().map(|e| e.queue.len()).sum(),
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}
